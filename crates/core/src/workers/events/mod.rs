pub mod chunk_progressed;
pub mod slides_changed;
pub mod worker_failed;
pub mod workflow_progressed;
pub mod workflow_updated;

pub use chunk_progressed::*;
pub use slides_changed::*;
pub use worker_failed::*;
pub use workflow_progressed::*;
pub use workflow_updated::*;

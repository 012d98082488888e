pub mod events;
pub mod persist_slides;
pub mod wiring;
pub mod worker;
pub mod worker_inputs;

pub use events::*;
pub use persist_slides::*;
pub use wiring::*;
pub use worker::*;
pub use worker_inputs::*;

pub mod event_log;
pub mod progress_renderer;

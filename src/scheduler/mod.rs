pub mod controller;
pub mod loop_worker;

pub use controller::ResetScheduler;
pub use loop_worker::{ResetTicker, TickOutcome};

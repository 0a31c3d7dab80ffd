pub mod controller;
pub mod worker;

pub use controller::LifecycleController;
pub use worker::{IngestionWorker, WorkOutcome};

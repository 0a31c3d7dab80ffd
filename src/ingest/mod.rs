pub mod mapper;
pub mod observer;
pub mod sink;

pub use mapper::map_document;
pub use observer::{IngestionObserver, LogObserver};
pub use sink::{GlucoseStore, IdempotentSink};

// src/lib.rs
pub mod cache;
pub mod cli;
pub mod events;
pub mod ingest;
pub mod livetail;
pub mod metric;
pub mod native;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use metric::Metric;

// Re-export tracing for use in other modules
pub use tracing;

pub use cache::{KvStore, MemoryKv, Reading, SensorWindow, TelemetryCache, MAX_WINDOW};
pub use events::{EventBus, PipelineEvent};
pub use ingest::{ActivationEvent, IngestEvent, ReadingEvent, ReadingPayload};
pub use native::build_router;
pub use pipeline::{Pipeline, PipelineOptions};
pub use registry::SensorRegistry;
pub use scheduler::{FlushReport, FlushScheduler, SchedulerHandle};
pub use store::{DurableStore, MemoryStore, SqliteStore, StoredReading};

//! Pyramid Engine - Stateful Knowledge Accumulation
//!
//! Holds a collection of pyramids and keeps them current as journal
//! evidence arrives:
//!
//! - **Routing**: extracted evidence fans out to relationship, pattern and
//!   time pyramids
//! - **Creation thresholds**: subjects mentioned too few times are buffered,
//!   then backfilled into a new pyramid
//! - **Single writer per subject**: every pyramid sits behind its own lock;
//!   readers get detached snapshots
//! - **Maturity signals**: handlers are notified when a pyramid matures
//! - **Snapshots**: versioned persistence with optimistic conflict checks
//!
//! # Example
//!
//! ```ignore
//! use pyramid_engine::{ExtractedEvidence, PyramidEngine};
//!
//! let engine = PyramidEngine::new();
//! let report = engine.ingest(evidence).await?;
//! if let Some(next) = engine.next_global_question().await {
//!     println!("{}", next.question.text);
//! }
//! ```

pub mod config;
pub mod engine;
pub mod mentions;
pub mod registry;
pub mod signal;
pub mod store;
pub mod types;

// Re-export main types
pub use config::{CreationConfig, EngineConfig, GeneralConfig, SchedulerConfig};
pub use engine::{PyramidEngine, PyramidTarget};
pub use registry::{PyramidHandle, PyramidRegistry};
pub use signal::{ChannelMaturityHandler, LoggingMaturityHandler, MaturityHandler};
pub use store::{
    JsonFileSnapshotStore, MemorySnapshotStore, PyramidSnapshot, SnapshotStore,
    SNAPSHOT_SCHEMA_VERSION,
};
pub use types::*;

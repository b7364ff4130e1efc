//! Pyramid Core - Knowledge Accumulation Model
//!
//! A pyramid gathers what the journal knows about one subject and tracks
//! how much of it has been confirmed by the user:
//!
//! - **Relationship**: interactions and dynamics with one person (7 datapoints)
//! - **Pattern**: a recurring behavior (6 datapoints)
//! - **Time**: where the hours of one period went (5 datapoints)
//!
//! Evidence from journal entries fills datapoint values; only answers to
//! questions mark them complete. Completeness drives the lifecycle
//! (`initializing → active → mature`) and the order in which questions are
//! asked across pyramids.
//!
//! # Key Components
//!
//! - [`Pyramid`]: shared base plus variant payload, with the update pipeline
//! - [`Evidence`]: records appended from extracted journal data
//! - [`question::next_question`]: per-pyramid gated question table
//! - [`scheduler::next_global_question`]: best question across a collection
//!
//! # Example
//!
//! ```ignore
//! use pyramid_core::{Evidence, InteractionRecord, Direction, Pyramid, PyramidSettings};
//!
//! let settings = PyramidSettings::default();
//! let mut bob = Pyramid::relationship("Bob", RelationshipKind::Neighbor, now);
//! bob.apply_evidence(Evidence::Interaction(record), &settings, now)?;
//! let question = pyramid_core::question::next_question(&bob, &settings, now);
//! ```

pub mod answer;
pub mod completeness;
pub mod datapoint;
pub mod error;
pub mod evidence;
pub mod metrics;
pub mod pyramid;
pub mod question;
pub mod scheduler;
pub mod settings;
pub mod subject;
pub mod types;

// Re-export main types
pub use answer::AnswerToQuestion;
pub use datapoint::Datapoint;
pub use error::{ErrorKind, PyramidError, Result};
pub use evidence::{Evidence, InteractionRecord, PatternInstance, TimeEntry};
pub use pyramid::{Applied, Pyramid, PyramidBase, PyramidBody};
pub use question::PendingQuestion;
pub use scheduler::{RecencyPolicy, ScheduledQuestion};
pub use settings::PyramidSettings;
pub use types::*;

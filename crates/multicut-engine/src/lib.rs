//! Concurrency layer for the multi-track compositing engine: one worker
//! thread per `VideoTrack`, two mixing worker threads owned by
//! `MultiTrackReader`, and the cache eviction policy that bounds them.
//!
//! `multicut_core` defines the data model and the external-collaborator
//! traits; everything that touches a thread, a lock, or an atomic lives here.

pub mod blend;
pub mod cache;
pub mod mix_task;
pub mod reader;
pub mod task;
pub mod track;

pub use blend::SoftwareBlender;
pub use mix_task::MixFrameTask;
pub use reader::{MultiTrackReader, ReadResult};
pub use task::{ReadFrameTask, ReadFrameTaskCallback, SourceRef, TaskState};
pub use track::{ClipSummary, VideoTrack};

//! Orchestration services.
//!
//! Each service owns one slice of mutable state and exposes it through
//! methods; they are wired together once in `bootstrap`.

pub mod admin_arbiter;
pub mod playback;
pub mod prefetch;
pub mod scheduler;

pub use admin_arbiter::{AdminArbiter, AttachOutcome};
pub use playback::PlaybackController;
pub use prefetch::PrefetchService;
pub use scheduler::Scheduler;

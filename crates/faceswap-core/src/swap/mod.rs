//! Face swap jobs: wire models and the polling state machine.

pub mod job;
pub mod poller;

pub use job::{JobStatus, JobStatusResponse, SwapLink, SwapResult};
pub use poller::{JobHandle, JobPoller, PollConfig, SwapEvent, SwapState, TickOutcome};

// Background job plumbing: the send-only transport and the runner that
// executes step workers for delivered jobs.

pub mod runner;
pub mod transport;

pub use runner::{JobReport, JobRunner, StepOutput, StepWorker, WorkerError};
pub use transport::{
    ChannelJobTransport, DispatchError, JobMessage, JobPayload, JobTransport, LoggingJobTransport,
    RecordingJobTransport,
};
#[cfg(any(test, feature = "testing"))]
pub use transport::MockJobTransport;

//! Screen broadcast frame relay.
//!
//! The OS delivers captured samples to a broadcast extension; this crate
//! forwards them unchanged to an engine ingestion sink and tracks the
//! broadcast lifecycle.

mod error;
mod frame;
mod relay;

pub use error::RelayError;
pub use frame::{SampleFrame, SampleKind, SampleTimestamp};
pub use relay::{BroadcastRelay, FinishReason, RelayState};

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Engine-side ingestion point for broadcast samples.
pub trait FrameSink: Send + Sync {
    /// Connect to the engine and begin accepting samples.
    fn start(&self) -> RelayResult<()>;

    /// Samples will stop arriving until [`resume`](Self::resume).
    fn pause(&self) -> RelayResult<()>;

    /// Samples will arrive again.
    fn resume(&self) -> RelayResult<()>;

    /// End the broadcast.
    fn stop(&self) -> RelayResult<()>;

    /// Ingest one sample.
    fn push(&self, frame: SampleFrame) -> RelayResult<()>;
}

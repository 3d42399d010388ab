/// Counts the bytes moved since the previous sample.
mod meter;
pub use self::meter::IntervalMeter;

/// Request and response bodies that count what flows through them.
mod body;
pub use self::body::{CountingBody, SyntheticBody, BLOCK_SIZE};

/// Hooks fired while a connection is established, and the slot keeping the connection.
mod capture;
pub use self::capture::{ConnectionSlot, ConnectionTracer};

mod error;
pub use self::error::PacerError;

/// TLS key log, readable by wireshark.
mod keylog;
pub use self::keylog::KeyLogSink;

mod verbosity;
pub use self::verbosity::Verbosity;

/// DNS, TCP, TLS and the HTTP/2 handshake.
pub mod connector;

/// Download and upload load generators.
pub mod pacer;
pub use self::pacer::{Pacer, PacerDownload, PacerUpload, SessionState};

/// Periodic throughput and telemetry samples of a running pacer.
mod sampler;
pub use self::sampler::{SampleRecord, Sampler, SamplerReport, TelemetryScope};

use thiserror::Error;

/// Error taxonomy for every fallible core operation.
///
/// One variant per `cb_result_code_t` value in the original C ABI, minus
/// `CB_OK` (which this crate represents as `Result::Ok`).
#[derive(Debug, Error)]
pub enum Error {
    /// A required pointer, slice, or buffer argument was empty or missing.
    #[error("null or empty argument")]
    NullPtr,

    /// Caller-supplied configuration violates a constraint, or a
    /// state-machine precondition was not met (e.g. `get_result` before
    /// `execute`).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// No usable timer backend could be selected.
    #[error("timer initialisation failed")]
    TimerInit,

    /// A timer read failed at runtime.
    #[error("timer read failed")]
    TimerRead,

    /// Model bundle loading failed (collaborator-level I/O).
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// Test data loading failed (collaborator-level I/O).
    #[error("data load failed: {0}")]
    DataLoad(String),

    /// Golden reference loading failed (collaborator-level I/O).
    #[error("golden reference load failed: {0}")]
    GoldenLoad(String),

    /// The inference function signalled an output mismatch.
    #[error("verification failed")]
    Verification,

    /// Integer arithmetic saturated.
    #[error("integer overflow")]
    Overflow,

    /// Serialisation or deserialisation I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Performance counters were unavailable or returned out-of-sequence
    /// data.
    #[error("hardware counters unavailable")]
    HwCounters,

    /// An environmental sensor was unavailable. Normally degraded to 0
    /// silently (spec.md §7); only raised when a caller asks for a hard
    /// read instead of the graceful `EnvProbe::snapshot` path.
    #[error("environment read failed")]
    EnvRead,

    /// Requested scratch space exceeds the compile-time ceiling
    /// (`metrics::MAX_SAMPLES`).
    #[error("requested {requested} samples exceeds ceiling of {ceiling}")]
    OutOfMemory { requested: usize, ceiling: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

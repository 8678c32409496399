//! Error handling module for the NOS synchronization layer

use core::fmt;

/// Status code reported to the OS layer for a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u32);

impl Status {
    /// Operation completed
    pub const SUCCESS: Status = Status(0x0000_0000);
    /// Not enough resources to create a kernel object
    pub const NO_MEMORY: Status = Status(0xC000_0017);
    /// Requested feature is not available
    pub const NOT_IMPLEMENTED: Status = Status(0xC000_0002);
    /// Lock released by a thread that does not own it
    pub const RESOURCE_NOT_OWNED: Status = Status(0xC000_0264);

    /// Returns true for error-severity codes
    pub const fn is_error(self) -> bool {
        self.0 & 0xC000_0000 == 0xC000_0000
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Common error type used throughout the synchronization layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The OS layer could not allocate a wait object or lock record
    ResourceExhausted,
    /// Lock discipline was violated by the caller
    UsageFault(&'static str),
    /// The current strategy or provider cannot honor the request
    Unsupported(&'static str),
}

impl Error {
    /// Status code reported to the OS layer for this error
    pub const fn status(&self) -> Status {
        match self {
            Error::ResourceExhausted => Status::NO_MEMORY,
            Error::UsageFault(_) => Status::RESOURCE_NOT_OWNED,
            Error::Unsupported(_) => Status::NOT_IMPLEMENTED,
        }
    }

    /// Unsupported requests are downgraded to no-ops instead of failing
    pub const fn is_hint(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ResourceExhausted => write!(f, "Resource exhausted"),
            Error::UsageFault(msg) => write!(f, "Usage fault: {}", msg),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// An unrecoverable failure.
///
/// Recoverable failures travel as [`Result`]. A `Fault` is what a caller
/// gets when it chose the fatal variant of an operation (for example
/// initializing a critical section without a fallible return): the only
/// thing to do with it is [`Fault::raise`], which ends the calling thread.
#[must_use = "a fault must be raised"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    error: Error,
    context: &'static str,
}

impl Fault {
    /// Creates a fault for `error` raised from `context`
    pub const fn new(error: Error, context: &'static str) -> Self {
        Self { error, context }
    }

    /// The underlying error
    pub const fn error(&self) -> Error {
        self.error
    }

    /// Status code of the underlying error
    pub const fn status(&self) -> Status {
        self.error.status()
    }

    /// Aborts the calling thread with this fault.
    ///
    /// This is the single point where a failure status turns into a
    /// non-returning abort.
    #[cold]
    #[track_caller]
    pub fn raise(self) -> ! {
        #[cfg(feature = "log")]
        log::error!("{}: raising status {} ({})", self.context, self.status(), self.error);
        panic!("{}: status {} ({})", self.context, self.status(), self.error)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}

/// Unwraps `result`, raising a [`Fault`] tagged with `context` on error
#[track_caller]
pub fn or_raise<T>(result: Result<T>, context: &'static str) -> T {
    match result {
        Ok(value) => value,
        Err(error) => Fault::new(error, context).raise(),
    }
}

/// Creates a new usage fault error
pub fn usage_fault(msg: &'static str) -> Error {
    Error::UsageFault(msg)
}

/// Creates a new unsupported-hint error
pub fn unsupported(msg: &'static str) -> Error {
    Error::Unsupported(msg)
}

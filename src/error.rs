use std::{error, fmt, result};

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically the `file:line` where the
/// error was encountered, and a message.
#[derive(Clone, Debug)]
pub enum Error {
    /// Unrecoverable internal failure, typically a broken invariant.
    /// Writes shall not proceed past a Fatal error, reads can.
    Fatal(String, String),
    /// Error converting from one type to another.
    FailConvert(String, String),
    /// Supplied parameter or argument is invalid.
    InvalidInput(String, String),
    /// Inter-thread communication failure with the drainer.
    IPCFail(String, String),
    /// Background thread failed or panicked.
    ThreadFail(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::{FailConvert, Fatal, IPCFail, InvalidInput, ThreadFail};

        match self {
            Fatal(p, m) => write!(f, "Fatal, {} {}", p, m),
            FailConvert(p, m) => write!(f, "FailConvert, {} {}", p, m),
            InvalidInput(p, m) => write!(f, "InvalidInput, {} {}", p, m),
            IPCFail(p, m) => write!(f, "IPCFail, {} {}", p, m),
            ThreadFail(p, m) => write!(f, "ThreadFail, {} {}", p, m),
        }
    }
}

impl error::Error for Error {}

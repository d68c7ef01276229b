//! Package hlix implement a hybrid two-tier ordered index for
//! `key -> u64` data, combining a read-optimized, bulk-loaded
//! learned index (the primary) with a write-optimized delta index
//! that absorbs point inserts. A background drainer periodically
//! merges the delta batch into the primary, so the index sustains
//! both bulk-built read workloads and sustained insert workloads.
//!
//! Components:
//!
//! * [primary::Primary], learned index over parallel sorted arrays,
//!   cheap to bulk-load and to rebuild, served by piecewise linear
//!   models.
//! * [pgm::Pgm], dynamically-updatable piecewise-geometric-model
//!   index, cheap for point inserts.
//! * [hybrid::Hybrid], the orchestrator. Routes reads and writes
//!   across the two indexes, owns the double-buffered swap protocol
//!   and the background drainer.
//!
//! Both indexes are used through narrow contracts defined in
//! [core][crate::core], so either side can be replaced by another
//! ordered map.

use std::result;

/// Short form to compose Error values.
///
/// Every error is tagged with the `file:line` of its origin.
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

mod error;

pub mod core;
pub mod hybrid;
pub mod model;
pub mod pgm;
pub mod primary;
pub mod search;
pub mod util;

pub use crate::error::Error;

/// Type alias for Result returned by functions and methods
/// defined in this package.
pub type Result<T> = result::Result<T, Error>;

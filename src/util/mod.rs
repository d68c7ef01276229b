//! Module `util` implement utility types shared across the package.

pub mod thread;

pub use thread::Thread;

//! Crate-level error type.
//!
//! Hand-rolled rather than pulled from `thiserror`, matching the teacher's
//! `crypto::rng::RngError` (`examples/vexr-autoseed/src/crypto/rng.rs`):
//! a plain enum with a manual `Display` and an empty `std::error::Error`
//! impl, no derive macro.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No source produced enough entropy to reach `entropy::MINLEN` bytes.
    EntropyStarved,
    /// The state page couldn't be obtained (mmap/mlock/heap allocation all
    /// failed — practically unreachable on the heap fallback, kept for the
    /// mmap path).
    AllocFailure,
    /// A caller-supplied configuration value (an EGD address, a buffer
    /// length) was invalid.
    ConfigError(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EntropyStarved => write!(f, "no entropy source produced enough seed material"),
            Error::AllocFailure => write!(f, "failed to allocate the isolated RNG state page"),
            Error::ConfigError(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

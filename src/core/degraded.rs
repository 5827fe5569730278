//! Degraded-but-valid results.
//!
//! Some operations have a defined fallback instead of a failure mode: an
//! unparseable date becomes "now", a failed embedding becomes the zero vector.
//! Those return `Result<T, Degraded<T>>` so callers and tests can see which path
//! was taken, and collapse it with [`OrFallback::or_fallback`] when they don't care.

use std::fmt;

/// A fallback value together with the reason the primary path failed
#[derive(Debug, Clone, PartialEq)]
pub struct Degraded<T> {
    pub fallback: T,
    pub reason: String,
}

impl<T> Degraded<T> {
    pub fn new(fallback: T, reason: impl Into<String>) -> Self {
        Self {
            fallback,
            reason: reason.into(),
        }
    }
}

impl<T> fmt::Display for Degraded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "degraded: {}", self.reason)
    }
}

pub trait OrFallback<T> {
    /// The primary value, or the attached fallback
    fn or_fallback(self) -> T;
}

impl<T> OrFallback<T> for Result<T, Degraded<T>> {
    fn or_fallback(self) -> T {
        match self {
            Ok(value) => value,
            Err(degraded) => degraded.fallback,
        }
    }
}

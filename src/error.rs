//! Error types.

use std::io;

use thiserror::Error;

/// Raised when reporter options cannot be resolved into a configuration.
///
/// A reporter is never created from options that fail validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No primary sink was supplied.
    #[error("options.sink required")]
    MissingSink,

    /// An interval was supplied but is not a positive duration.
    #[error("expected options.{field} to be a positive duration")]
    InvalidInterval {
        /// Name of the offending option.
        field: &'static str,
    },

    /// A GC bridge was created with room for zero subscribers.
    #[error("GC subscriber capacity must be at least 1")]
    InvalidCapacity,
}

/// A host probe could not produce a value this cycle.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe is temporarily unavailable, e.g. because the process ran
    /// out of file descriptors (`EMFILE`).
    #[error("probe unavailable: {0}")]
    Unavailable(#[from] io::Error),

    /// The probe is not implemented on this platform.
    #[error("probe not supported on this platform: {0}")]
    Unsupported(&'static str),
}

/// Errors returned by the GC event bridge.
#[derive(Debug, Error)]
pub enum GcBridgeError {
    /// Every subscriber slot is taken; usually too many live reporters.
    #[error("GC bridge is full ({capacity} subscribers); too many live reporters")]
    CapacityExceeded {
        /// The bridge's subscriber capacity.
        capacity: usize,
    },
}

/// Errors surfaced by the [`ProcessReporter`](crate::ProcessReporter) facade.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The GC subscription could not be created.
    #[error(transparent)]
    Gc(#[from] GcBridgeError),
}

//! Error types for the simulation core.
//!
//! The taxonomy follows the failure model of the engine:
//! - [`ConfigError`]: malformed or inconsistent input, rejected before any
//!   time step runs.
//! - [`NumericalFailure`]: invalid state (NaN, emptied cell) detected during
//!   integration; fatal for the run.
//! - [`TrajectoryError`]: trajectory file could not be opened or positioned.
//!   Short reads/writes are reported as partial cell counts by the trajectory
//!   layer, not as errors.
//!
//! Junction non-convergence is deliberately *not* an error: it degrades the
//! step and is reported through [`crate::junction::JunctionReport`].

use std::path::PathBuf;

use thiserror::Error;

/// Configuration and validation errors, detected before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O while loading the configuration document.
    #[error("cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document failed to deserialize.
    #[error("cannot parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A channel needs at least two cross sections to span a reach.
    #[error("channel '{channel}' has {count} cross sections (need at least 2)")]
    TooFewSections { channel: String, count: usize },

    /// Cross-section positions must strictly increase along the channel.
    #[error("channel '{channel}': cross section '{section}' at x={x} is not downstream of its predecessor")]
    NonMonotonicSections {
        channel: String,
        section: String,
        x: f64,
    },

    /// A controlled section or junction references a channel that does not exist.
    #[error("'{referrer}' references unknown channel '{name}'")]
    UnknownChannel { referrer: String, name: String },

    /// A controlled section references a section name not present in the target channel.
    #[error("'{referrer}' references unknown section '{name}' in channel '{channel}'")]
    UnknownSection {
        referrer: String,
        channel: String,
        name: String,
    },

    /// Junction capacity fractions must be non-negative and sum to at most one.
    #[error("boundary '{boundary}': junction fractions sum to {sum} (must be non-negative and at most 1)")]
    BadJunctionSplit { boundary: String, sum: f64 },

    /// A time series must have strictly increasing times.
    #[error("time series '{name}': non-monotonic time at entry {index}")]
    NonMonotonicSeries { name: String, index: usize },

    /// An empty time series cannot be evaluated.
    #[error("time series '{name}' is empty")]
    EmptySeries { name: String },

    /// Geometry values out of physical range.
    #[error("section '{section}': {message}")]
    BadGeometry { section: String, message: String },

    /// Generic structural inconsistency.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal numerical failure inside a time step.
///
/// Carries enough context to identify the offending cell: results past this
/// point would be physically meaningless, so the run aborts rather than
/// clamping.
#[derive(Debug, Clone, Error)]
#[error("numerical failure at t={time:.6}: cell {cell} (thread {thread}, step {step}): {reason}")]
pub struct NumericalFailure {
    /// Global index of the offending cell.
    pub cell: usize,
    /// Worker slice that detected the failure.
    pub thread: usize,
    /// Step counter at failure.
    pub step: usize,
    /// Simulation time at failure.
    pub time: f64,
    /// What was detected (NaN, non-positive area, ...).
    pub reason: String,
}

/// Trajectory file errors (open/seek); partial transfers are counts, not errors.
#[derive(Debug, Error)]
pub enum TrajectoryError {
    /// Underlying file error.
    #[error("trajectory I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File length is not consistent with any whole number of records.
    #[error("trajectory {path}: no complete saved step (len {len} bytes, step size {step_size})")]
    Empty {
        path: PathBuf,
        len: u64,
        step_size: u64,
    },

    /// Requested step index is beyond the complete steps in the file.
    #[error("saved step {requested} out of range (file holds {available} complete steps)")]
    StepOutOfRange { requested: usize, available: usize },

    /// The file was written for a different mesh.
    #[error("trajectory holds {file_cells} cells but the mesh has {mesh_cells}")]
    MeshMismatch { file_cells: usize, mesh_cells: usize },
}

/// Top-level error for a simulation run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Numerical(#[from] NumericalFailure),

    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),

    /// The trajectory writer reported a partial write at a checkpoint.
    #[error("short write at t={time:.6}: {written} of {expected} cells persisted")]
    ShortWrite {
        time: f64,
        written: usize,
        expected: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::TooFewSections {
            channel: "main".into(),
            count: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("main"));
        assert!(msg.contains("at least 2"));
    }

    #[test]
    fn test_numerical_failure_display() {
        let err = NumericalFailure {
            cell: 42,
            thread: 3,
            step: 100,
            time: 12.5,
            reason: "NaN discharge".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cell 42"));
        assert!(msg.contains("thread 3"));
        assert!(msg.contains("NaN discharge"));
    }

    #[test]
    fn test_simulation_error_from_config() {
        let err: SimulationError = ConfigError::Invalid("bad".into()).into();
        assert!(matches!(err, SimulationError::Config(_)));
    }
}

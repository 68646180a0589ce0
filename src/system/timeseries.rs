//! Tabulated (t, value) series for boundary conditions and control laws.
//!
//! Values are linearly interpolated between entries. Outside the tabulated
//! range the nearest value is held (clamped on both ends): a hydrograph that
//! ends at t=3600 keeps supplying its last discharge afterwards.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A single (time, value) entry.
///
/// Also used for control laws, where the abscissa is the measured variable
/// rather than time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub t: f64,
    pub value: f64,
}

/// Piecewise-linear series with hold-last extrapolation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSeries {
    points: Vec<SeriesPoint>,
}

impl TimeSeries {
    /// Build a series from raw (t, value) pairs.
    ///
    /// Entries must already be in increasing abscissa order; use
    /// [`TimeSeries::validate`] to enforce it.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self {
            points: pairs
                .iter()
                .map(|&(t, value)| SeriesPoint { t, value })
                .collect(),
        }
    }

    /// A series holding one constant value for all time.
    pub fn constant(value: f64) -> Self {
        Self::from_pairs(&[(0.0, value)])
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    /// Check non-emptiness and strict monotonicity of the abscissa.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.points.is_empty() {
            return Err(ConfigError::EmptySeries { name: name.into() });
        }
        for i in 1..self.points.len() {
            if self.points[i].t <= self.points[i - 1].t {
                return Err(ConfigError::NonMonotonicSeries {
                    name: name.into(),
                    index: i,
                });
            }
        }
        Ok(())
    }

    /// Evaluate the series at `t`.
    ///
    /// - Before the first entry: first value (held).
    /// - After the last entry: last value (held).
    /// - Otherwise: linear interpolation between the bracketing entries.
    ///
    /// An empty series evaluates to 0.0; validation rejects empty series up
    /// front, so this only matters for defaulted optional laws.
    pub fn sample(&self, t: f64) -> f64 {
        let points = &self.points;
        match points.len() {
            0 => 0.0,
            1 => points[0].value,
            _ => {
                if t <= points[0].t {
                    return points[0].value;
                }
                if t >= points[points.len() - 1].t {
                    return points[points.len() - 1].value;
                }
                // partition_point finds the first entry past t
                let hi = points.partition_point(|p| p.t <= t);
                let p0 = points[hi - 1];
                let p1 = points[hi];
                let w = (t - p0.t) / (p1.t - p0.t);
                p0.value + w * (p1.value - p0.value)
            }
        }
    }

    /// Time range covered, or (0, 0) if empty.
    pub fn range(&self) -> (f64, f64) {
        match (self.points.first(), self.points.last()) {
            (Some(a), Some(b)) => (a.t, b.t),
            _ => (0.0, 0.0),
        }
    }
}

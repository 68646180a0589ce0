//! Trapezoidal cross-section geometry.
//!
//! Every cross section is a symmetric trapezoidal prism described by its
//! bottom elevation, bottom width and side slope (horizontal per unit
//! vertical; 0 gives a rectangle). The hydraulic algebra needed by the solver
//! lives here:
//!
//! - wetted area          A(h) = h (b + z h)
//! - free-surface width   B(h) = b + 2 z h
//! - wetted perimeter     P(h) = b + 2 h sqrt(1 + z²)
//! - pressure integral    I1(h) = b h²/2 + z h³/3   (so the momentum flux is
//!   Q²/A + g I1)
//!
//! Depth recovery from area inverts the quadratic in closed form.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Gravitational acceleration (m/s²).
pub const GRAVITY: f64 = 9.81;

/// Trapezoidal section shape at one point along a channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionGeometry {
    /// Bottom elevation above datum (m).
    pub z_bottom: f64,
    /// Bottom width (m).
    pub bottom_width: f64,
    /// Side slope, horizontal/vertical (0 = rectangular).
    #[serde(default)]
    pub side_slope: f64,
}

impl SectionGeometry {
    pub fn new(z_bottom: f64, bottom_width: f64, side_slope: f64) -> Self {
        Self {
            z_bottom,
            bottom_width,
            side_slope,
        }
    }

    /// Rectangular section of the given width.
    pub fn rectangular(z_bottom: f64, width: f64) -> Self {
        Self::new(z_bottom, width, 0.0)
    }

    /// Check physical plausibility.
    pub fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if !(self.bottom_width > 0.0) {
            return Err(ConfigError::BadGeometry {
                section: section.into(),
                message: format!("bottom width {} must be positive", self.bottom_width),
            });
        }
        if self.side_slope < 0.0 {
            return Err(ConfigError::BadGeometry {
                section: section.into(),
                message: format!("side slope {} must be non-negative", self.side_slope),
            });
        }
        if !self.z_bottom.is_finite() {
            return Err(ConfigError::BadGeometry {
                section: section.into(),
                message: "bottom elevation is not finite".into(),
            });
        }
        Ok(())
    }

    /// Wetted area at depth h.
    pub fn area(&self, h: f64) -> f64 {
        let h = h.max(0.0);
        h * (self.bottom_width + self.side_slope * h)
    }

    /// Free-surface width at depth h.
    pub fn surface_width(&self, h: f64) -> f64 {
        self.bottom_width + 2.0 * self.side_slope * h.max(0.0)
    }

    /// Wetted perimeter at depth h.
    pub fn wetted_perimeter(&self, h: f64) -> f64 {
        let h = h.max(0.0);
        self.bottom_width + 2.0 * h * (1.0 + self.side_slope * self.side_slope).sqrt()
    }

    /// Hydraulic radius A/P at depth h.
    pub fn hydraulic_radius(&self, h: f64) -> f64 {
        let p = self.wetted_perimeter(h);
        if p > 0.0 { self.area(h) / p } else { 0.0 }
    }

    /// Depth from wetted area (inverse of [`SectionGeometry::area`]).
    pub fn depth_from_area(&self, a: f64) -> f64 {
        let a = a.max(0.0);
        let b = self.bottom_width;
        let z = self.side_slope;
        if z.abs() < 1e-12 {
            a / b
        } else {
            // z h² + b h - a = 0, positive root
            (-b + (b * b + 4.0 * z * a).sqrt()) / (2.0 * z)
        }
    }

    /// Hydrostatic pressure integral I1(h) = b h²/2 + z h³/3.
    pub fn pressure_integral(&self, h: f64) -> f64 {
        let h = h.max(0.0);
        0.5 * self.bottom_width * h * h + self.side_slope * h * h * h / 3.0
    }

    /// Wave celerity c = sqrt(g A / B) at the given wetted area.
    pub fn celerity(&self, a: f64) -> f64 {
        if a <= 0.0 {
            return 0.0;
        }
        let h = self.depth_from_area(a);
        let b_s = self.surface_width(h);
        if b_s > 0.0 {
            (GRAVITY * a / b_s).sqrt()
        } else {
            0.0
        }
    }

    /// Linear blend between two sections (weight w in [0, 1] toward `other`).
    ///
    /// Used both for interpolating geometry between bounding cross sections at
    /// mesh build and for time-varying (transient) sections.
    pub fn lerp(&self, other: &SectionGeometry, w: f64) -> SectionGeometry {
        let w = w.clamp(0.0, 1.0);
        SectionGeometry {
            z_bottom: self.z_bottom + w * (other.z_bottom - self.z_bottom),
            bottom_width: self.bottom_width + w * (other.bottom_width - self.bottom_width),
            side_slope: self.side_slope + w * (other.side_slope - self.side_slope),
        }
    }
}

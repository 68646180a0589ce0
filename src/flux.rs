//! HLL approximate Riemann solver for the Saint-Venant equations in (A, Q).
//!
//! Two-wave approximation with Einfeldt speed estimates:
//!
//! F* = (s_r F_l - s_l F_r + s_l s_r (q_r - q_l)) / (s_r - s_l)
//!
//! The open-channel form works on wetted area and discharge; the pressure
//! term uses the section's hydrostatic integral I1, so the physical flux is
//! [Q, Q²/A + g I1(h)]. For 1D shallow water there are only two waves (no
//! contact), which is exactly what HLL models.
//!
//! Reference: Toro, "Riemann Solvers and Numerical Methods for Fluid Dynamics"

use crate::system::{SectionGeometry, GRAVITY};

/// Numerical flux through one interface: (mass flux, momentum flux).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterfaceFlux {
    pub mass: f64,
    pub momentum: f64,
}

impl InterfaceFlux {
    pub fn zero() -> Self {
        Self {
            mass: 0.0,
            momentum: 0.0,
        }
    }
}

/// HLL flux between two cells.
///
/// # Arguments
/// * `a_l`, `q_l` - Left state (wetted area, discharge)
/// * `a_r`, `q_r` - Right state
/// * `geo_l`, `geo_r` - Section geometry on each side
/// * `a_min` - Wetted area below which a side is treated as dry
pub fn hll_flux(
    a_l: f64,
    q_l: f64,
    a_r: f64,
    q_r: f64,
    geo_l: &SectionGeometry,
    geo_r: &SectionGeometry,
    a_min: f64,
) -> InterfaceFlux {
    // Both sides dry: nothing crosses
    if a_l <= a_min && a_r <= a_min {
        return InterfaceFlux::zero();
    }

    let u_l = if a_l > a_min { q_l / a_l } else { 0.0 };
    let u_r = if a_r > a_min { q_r / a_r } else { 0.0 };

    let c_l = geo_l.celerity(a_l);
    let c_r = geo_r.celerity(a_r);

    let (s_l, s_r) = einfeldt_speeds(a_l, a_r, u_l, u_r, c_l, c_r, a_min);

    let f_l = physical_flux(a_l, q_l, u_l, geo_l, a_min);
    let f_r = physical_flux(a_r, q_r, u_r, geo_r, a_min);

    if s_l >= 0.0 {
        f_l
    } else if s_r <= 0.0 {
        f_r
    } else {
        let inv_ds = 1.0 / (s_r - s_l);
        InterfaceFlux {
            mass: inv_ds * (s_r * f_l.mass - s_l * f_r.mass + s_l * s_r * (a_r - a_l)),
            momentum: inv_ds
                * (s_r * f_l.momentum - s_l * f_r.momentum + s_l * s_r * (q_r - q_l)),
        }
    }
}

/// Physical flux F(q) = [Q, Q²/A + g I1].
fn physical_flux(
    a: f64,
    q: f64,
    u: f64,
    geometry: &SectionGeometry,
    a_min: f64,
) -> InterfaceFlux {
    if a <= a_min {
        return InterfaceFlux::zero();
    }
    let h = geometry.depth_from_area(a);
    InterfaceFlux {
        mass: q,
        momentum: q * u + GRAVITY * geometry.pressure_integral(h),
    }
}

/// Einfeldt wave speed estimates from Roe-averaged quantities.
fn einfeldt_speeds(
    a_l: f64,
    a_r: f64,
    u_l: f64,
    u_r: f64,
    c_l: f64,
    c_r: f64,
    a_min: f64,
) -> (f64, f64) {
    let sqrt_a_l = a_l.max(0.0).sqrt();
    let sqrt_a_r = a_r.max(0.0).sqrt();

    let (u_roe, c_roe) = if sqrt_a_l + sqrt_a_r > 1e-10 {
        let u_roe = (sqrt_a_l * u_l + sqrt_a_r * u_r) / (sqrt_a_l + sqrt_a_r);
        // average celerity stands in for the Roe celerity of the varying section
        let c_roe = 0.5 * (c_l + c_r);
        (u_roe, c_roe)
    } else {
        (0.0, 0.0)
    };

    let s_l = if a_l > a_min {
        (u_l - c_l).min(u_roe - c_roe)
    } else {
        // dry left: expansion toward the left
        u_r - 2.0 * c_r
    };
    let s_r = if a_r > a_min {
        (u_r + c_r).max(u_roe + c_roe)
    } else {
        u_l + 2.0 * c_l
    };

    (s_l, s_r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect() -> SectionGeometry {
        SectionGeometry::rectangular(0.0, 1.0)
    }

    #[test]
    fn test_dry_interface_is_zero() {
        let g = rect();
        let f = hll_flux(0.0, 0.0, 0.0, 0.0, &g, &g, 1e-6);
        assert_eq!(f, InterfaceFlux::zero());
    }

    #[test]
    fn test_still_water_has_no_mass_flux() {
        let g = rect();
        let a = g.area(2.0);
        let f = hll_flux(a, 0.0, a, 0.0, &g, &g, 1e-6);
        assert_relative_eq!(f.mass, 0.0, epsilon = 1e-12);
        // momentum flux is the hydrostatic pressure, g h²/2 per unit width
        assert_relative_eq!(f.momentum, 0.5 * GRAVITY * 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_uniform_flow_flux_is_physical_flux() {
        let g = rect();
        let h = 1.5;
        let a = g.area(h);
        let q = 0.75;
        let f = hll_flux(a, q, a, q, &g, &g, 1e-6);
        assert_relative_eq!(f.mass, q, epsilon = 1e-12);
        let u = q / a;
        let expected = q * u + GRAVITY * g.pressure_integral(h);
        assert_relative_eq!(f.momentum, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_supercritical_flow_upwinds_left() {
        let g = rect();
        let h = 0.5;
        let a = g.area(h);
        // velocity far above celerity: all waves go right
        let q = a * 10.0;
        let f = hll_flux(a, q, a * 0.8, q * 0.8, &g, &g, 1e-6);
        let u = q / a;
        assert_relative_eq!(f.mass, q, epsilon = 1e-12);
        assert_relative_eq!(
            f.momentum,
            q * u + GRAVITY * g.pressure_integral(h),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_dam_break_flux_positive() {
        let g = rect();
        // deep water on the left, shallow on the right: mass must flow right
        let f = hll_flux(g.area(2.0), 0.0, g.area(0.5), 0.0, &g, &g, 1e-6);
        assert!(f.mass > 0.0, "mass flux {} should be rightward", f.mass);
    }
}

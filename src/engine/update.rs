//! Per-cell update kernels and boundary application.
//!
//! `update_slice` is the only code that runs concurrently: each worker owns
//! one contiguous slice of the `next` buffer and reads the whole `current`
//! buffer immutably (neighbor cells across slice boundaries were finalized in
//! the previous phase). Everything else in this file runs on the
//! orchestrating thread in the synchronized phases.

use crate::error::NumericalFailure;
use crate::flux::hll_flux;
use crate::mesh::Mesh;
use crate::state::CellState;
use crate::system::{BoundaryCondition, BoundaryFlow, MeasuredVariable, System, GRAVITY};

/// Inputs shared by every worker during one interior-update phase.
#[derive(Clone, Copy)]
pub(crate) struct StepInputs<'a> {
    pub system: &'a System,
    pub mesh: &'a Mesh,
    pub dt: f64,
    pub t: f64,
    pub step: usize,
    /// Wetted area below which a cell counts as dry.
    pub a_min: f64,
}

/// Stability bound of one cell: dx / (|u| + c).
fn stable_dt_cell(cell_index: usize, states: &[CellState], inputs: &StepInputs) -> f64 {
    let cell = &inputs.mesh.cells[cell_index];
    let s = &states[cell_index];
    if s.a <= inputs.a_min {
        return f64::INFINITY;
    }
    let u = s.velocity(inputs.a_min).abs();
    let c = cell.geometry.celerity(s.a);
    let speed = u + c;
    if speed > 0.0 {
        cell.dx / speed
    } else {
        f64::INFINITY
    }
}

/// Minimum stability bound over one thread slice.
pub(crate) fn stable_dt_slice(
    lo: usize,
    hi: usize,
    states: &[CellState],
    inputs: &StepInputs,
) -> f64 {
    (lo..hi)
        .map(|i| stable_dt_cell(i, states, inputs))
        .fold(f64::INFINITY, f64::min)
}

/// Advance every interior cell of `[lo, hi)` from `current` into `slice`.
///
/// `slice` is the `next`-buffer span for exactly this range. Returns the
/// first numerical failure found after the update, if any.
pub(crate) fn update_slice(
    lo: usize,
    hi: usize,
    slice: &mut [CellState],
    current: &[CellState],
    thread: usize,
    inputs: &StepInputs,
) -> Option<NumericalFailure> {
    debug_assert_eq!(slice.len(), hi - lo);

    for i in lo..hi {
        update_cell(i, &mut slice[i - lo], current, inputs);
    }

    // post-update scan, escalated at the next barrier by the orchestrator
    for i in lo..hi {
        let s = &slice[i - lo];
        if s.has_invalid() || s.a < 0.0 {
            let reason = if s.a < 0.0 {
                format!("negative wetted area {:.3e}", s.a)
            } else {
                "non-finite state".to_string()
            };
            return Some(NumericalFailure {
                cell: i,
                thread,
                step: inputs.step,
                time: inputs.t,
                reason,
            });
        }
    }
    None
}

/// First-order finite-volume update of one cell.
fn update_cell(i: usize, out: &mut CellState, current: &[CellState], inputs: &StepInputs) {
    let mesh = inputs.mesh;
    let cell = &mesh.cells[i];
    let range = mesh.channel_ranges[cell.channel];
    let s = &current[i];
    let a_min = inputs.a_min;

    // channel-end interfaces use a zero-gradient ghost (the cell itself), so
    // the pressure term stays balanced; end-cell values are then overwritten
    // by the boundary and junction phases
    let f_left = if cell.local == 0 {
        hll_flux(s.a, s.q, s.a, s.q, &cell.geometry, &cell.geometry, a_min)
    } else {
        let l = &current[i - 1];
        hll_flux(
            l.a,
            l.q,
            s.a,
            s.q,
            &mesh.cells[i - 1].geometry,
            &cell.geometry,
            a_min,
        )
    };
    let f_right = if cell.local + 1 == range.count {
        hll_flux(s.a, s.q, s.a, s.q, &cell.geometry, &cell.geometry, a_min)
    } else {
        let r = &current[i + 1];
        hll_flux(
            s.a,
            s.q,
            r.a,
            r.q,
            &cell.geometry,
            &mesh.cells[i + 1].geometry,
            a_min,
        )
    };

    let lambda = inputs.dt / cell.dx;
    let mut a_new = s.a - lambda * (f_right.mass - f_left.mass);

    // bed slope from neighboring bottom elevations (one-sided at channel ends)
    let zb = cell.geometry.z_bottom;
    let (zb_l, dx_l) = if cell.local == 0 {
        (zb, 0.0)
    } else {
        (mesh.cells[i - 1].geometry.z_bottom, cell.dx)
    };
    let (zb_r, dx_r) = if cell.local + 1 == range.count {
        (zb, 0.0)
    } else {
        (mesh.cells[i + 1].geometry.z_bottom, cell.dx)
    };
    let span = dx_l + dx_r;
    let s0 = if span > 0.0 { (zb_l - zb_r) / span } else { 0.0 };

    let mut q_new = s.q - lambda * (f_right.momentum - f_left.momentum)
        + inputs.dt * GRAVITY * s.a * s0;

    // semi-implicit Manning friction keeps shallow cells from going stiff
    if s.a > a_min {
        let channel = &inputs.system.channels[cell.channel];
        let h = s.depth(&cell.geometry);
        let r = cell.geometry.hydraulic_radius(h).max(1e-6);
        let u = s.velocity(a_min).abs();
        let friction = GRAVITY * channel.manning * channel.manning * u / r.powf(4.0 / 3.0);
        q_new /= 1.0 + inputs.dt * friction;
    }

    if a_new <= a_min {
        a_new = a_new.max(0.0);
        q_new = 0.0;
    }

    // upwind solute advection on the same interface mass fluxes
    for si in 0..s.c.len() {
        let upwind = |flux: f64, left: usize, right: usize| -> f64 {
            if flux >= 0.0 {
                flux * current[left].c[si]
            } else {
                flux * current[right].c[si]
            }
        };
        let fs_left = if cell.local == 0 {
            f_left.mass * current[i].c[si]
        } else {
            upwind(f_left.mass, i - 1, i)
        };
        let fs_right = if cell.local + 1 == range.count {
            f_right.mass * current[i].c[si]
        } else {
            upwind(f_right.mass, i, i + 1)
        };
        let mass_new = s.a * s.c[si] - lambda * (fs_right - fs_left);
        out.c[si] = if a_new > a_min {
            (mass_new / a_new).max(0.0)
        } else {
            0.0
        };
    }

    out.a = a_new;
    out.q = q_new;
}

/// Apply controlled-section feedback: the target cell's bottom elevation
/// follows the control law of the measured variable.
///
/// Runs on the orchestrating thread before the interior update; it mutates
/// mesh geometry, which workers read immutably afterwards.
pub(crate) fn apply_controls(mesh: &mut Mesh, states: &[CellState]) {
    for ci in 0..mesh.controls.len() {
        let binding = &mesh.controls[ci];
        let measured_cell = &mesh.cells[binding.measured_cell];
        let s = &states[binding.measured_cell];
        let measured = match binding.variable {
            MeasuredVariable::Discharge => s.q,
            MeasuredVariable::Depth => s.depth(&measured_cell.geometry),
            MeasuredVariable::Level => s.level(&measured_cell.geometry),
        };
        let z = mesh.controls[ci].law.sample(measured);
        let target = mesh.controls[ci].target_cell;
        mesh.cells[target].geometry.z_bottom = z;
    }
}

/// Evaluate and apply one external boundary to a channel-end cell.
fn apply_end_boundary(
    boundary: &BoundaryFlow,
    end_cell: usize,
    neighbor: usize,
    states: &mut [CellState],
    inputs: &StepInputs,
) {
    let cell = &inputs.mesh.cells[end_cell];
    match &boundary.condition {
        BoundaryCondition::Discharge { series } => {
            states[end_cell].q = series.sample(inputs.t);
        }
        BoundaryCondition::Depth { series } => {
            let h = series.sample(inputs.t).max(0.0);
            states[end_cell].a = cell.geometry.area(h);
            states[end_cell].q = states[neighbor].q;
        }
        BoundaryCondition::Level { series } => {
            let h = (series.sample(inputs.t) - cell.geometry.z_bottom).max(0.0);
            states[end_cell].a = cell.geometry.area(h);
            states[end_cell].q = states[neighbor].q;
        }
        BoundaryCondition::Gate {
            opening,
            coefficient,
            width,
        } => {
            let h = states[end_cell].depth(&cell.geometry);
            let a = opening.sample(inputs.t).max(0.0);
            states[end_cell].q = coefficient * a * width * (2.0 * GRAVITY * h.max(0.0)).sqrt();
        }
        // resolved by the junction coupler in its own phase
        BoundaryCondition::Junction => {}
    }
}

/// Apply all external (inlet/outlet) boundary values and inlet solute
/// concentrations to the first/last cells of every channel.
pub(crate) fn apply_boundaries(states: &mut [CellState], inputs: &StepInputs) {
    let system = inputs.system;
    for (ci, channel) in system.channels.iter().enumerate() {
        let range = inputs.mesh.channel_ranges[ci];
        let first = range.first;
        let last = range.last();

        apply_end_boundary(&channel.inlet, first, (first + 1).min(last), states, inputs);
        apply_end_boundary(&channel.outlet, last, last.saturating_sub(1).max(first), states, inputs);

        // inflow concentrations ride in with a positive inlet discharge
        if states[first].q > 0.0 {
            for transport in &channel.transports {
                let Some(inflow) = &transport.inflow else {
                    continue;
                };
                if let Some(si) = system
                    .solutes
                    .iter()
                    .position(|s| s.name == transport.solute)
                {
                    states[first].c[si] = inflow.sample(inputs.t).max(0.0);
                }
            }
        }
    }
}

/// Apply inner boundaries (gates/offtakes): impose the structure discharge
/// and move the split volume into the receiving channels.
pub(crate) fn apply_inner(states: &mut [CellState], inputs: &StepInputs) {
    let mesh = inputs.mesh;
    for binding in &mesh.inner {
        let channel = &inputs.system.channels[binding.channel];
        let boundary = &channel.inner[binding.boundary];
        let cell = &mesh.cells[binding.cell];

        let imposed = match &boundary.condition {
            BoundaryCondition::Discharge { series } => series.sample(inputs.t),
            BoundaryCondition::Gate {
                opening,
                coefficient,
                width,
            } => {
                let h = states[binding.cell].depth(&cell.geometry);
                let a = opening.sample(inputs.t).max(0.0);
                coefficient * a * width * (2.0 * GRAVITY * h.max(0.0)).sqrt()
            }
            _ => continue,
        };

        states[binding.cell].q = imposed;

        let mut taken = 0.0;
        for &(target, fraction) in &binding.split {
            let q_split = fraction * imposed;
            let target_cell = &mesh.cells[target];
            states[target].q = q_split;
            states[target].a += inputs.dt * q_split / target_cell.dx;
            taken += q_split;
        }
        if taken > 0.0 {
            let drained = inputs.dt * taken / cell.dx;
            states[binding.cell].a = (states[binding.cell].a - drained).max(0.0);
        }
    }
}

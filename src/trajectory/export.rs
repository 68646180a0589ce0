//! ASCII exports derived from the binary trajectory file.
//!
//! All exports are pure read-side transformations: they seek into the
//! trajectory, decode cell records and emit whitespace-separated rows with a
//! `#` header naming the channel/section/solute. None of them mutate the
//! binary file, and all tolerate a file shorter than expected: they work on
//! the complete steps that are there and report how many were used.

use std::io::Write;

use crate::error::TrajectoryError;
use crate::mesh::Mesh;
use crate::state::CellState;
use crate::system::System;
use crate::trajectory::TrajectoryReader;

fn check_mesh(reader: &TrajectoryReader, mesh: &Mesh) -> Result<(), TrajectoryError> {
    if reader.n_cells() != mesh.n_cells() {
        return Err(TrajectoryError::MeshMismatch {
            file_cells: reader.n_cells(),
            mesh_cells: mesh.n_cells(),
        });
    }
    Ok(())
}

fn solute_columns(system: &System) -> String {
    system
        .solutes
        .iter()
        .map(|s| format!(" {}", s.name))
        .collect()
}

/// Longitudinal profile of one channel at saved step `step`.
///
/// Columns: x depth area discharge velocity level, then one concentration
/// column per solute. Returns the number of cell rows written.
pub fn write_profile<W: Write>(
    out: &mut W,
    system: &System,
    mesh: &Mesh,
    reader: &mut TrajectoryReader,
    channel: usize,
    step: usize,
) -> Result<usize, TrajectoryError> {
    check_mesh(reader, mesh)?;
    if step >= reader.step_count() {
        return Err(TrajectoryError::StepOutOfRange {
            requested: step,
            available: reader.step_count(),
        });
    }

    let mut states = vec![CellState::dry(system.n_solutes()); mesh.n_cells()];
    if reader.read_step(step, &mut states) != mesh.n_cells() {
        return Err(TrajectoryError::StepOutOfRange {
            requested: step,
            available: reader.step_count(),
        });
    }

    let t = step as f64 * system.run.save_interval;
    let name = &system.channels[channel].name;
    writeln!(out, "# profile channel={} t={}", name, t)?;
    writeln!(
        out,
        "# x depth area discharge velocity level{}",
        solute_columns(system)
    )?;

    let a_min = dry_area(system, mesh);
    let range = mesh.channel_ranges[channel];
    for i in range.cells() {
        let cell = &mesh.cells[i];
        let s = &states[i];
        write!(
            out,
            "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            cell.x,
            s.depth(&cell.geometry),
            s.a,
            s.q,
            s.velocity(a_min),
            s.level(&cell.geometry),
        )?;
        for &c in &s.c {
            write!(out, " {:.6}", c)?;
        }
        writeln!(out)?;
    }
    Ok(range.count)
}

/// Time evolution at a fixed position `x` of one channel.
///
/// Columns: t depth area discharge velocity level, then concentrations.
/// Returns the number of saved steps used (all complete steps in the file).
pub fn write_evolution<W: Write>(
    out: &mut W,
    system: &System,
    mesh: &Mesh,
    reader: &mut TrajectoryReader,
    channel: usize,
    x: f64,
) -> Result<usize, TrajectoryError> {
    check_mesh(reader, mesh)?;

    let cell_index = mesh.cell_at(channel, x);
    let cell = &mesh.cells[cell_index];
    let name = &system.channels[channel].name;
    writeln!(out, "# evolution channel={} x={}", name, cell.x)?;
    writeln!(
        out,
        "# t depth area discharge velocity level{}",
        solute_columns(system)
    )?;

    let a_min = dry_area(system, mesh);
    let mut state = CellState::dry(system.n_solutes());
    let mut used = 0;
    for k in 0..reader.step_count() {
        if !reader.read_cell(k, cell_index, &mut state) {
            break;
        }
        let t = k as f64 * system.run.save_interval;
        write!(
            out,
            "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            t,
            state.depth(&cell.geometry),
            state.a,
            state.q,
            state.velocity(a_min),
            state.level(&cell.geometry),
        )?;
        for &c in &state.c {
            write!(out, " {:.6}", c)?;
        }
        writeln!(out)?;
        used += 1;
    }
    Ok(used)
}

/// Advance of the wetting front along one channel over time.
///
/// For every saved step, the position of the furthest downstream wet cell
/// (depth above the dry threshold); `-` when the whole channel is dry.
/// Returns the number of saved steps used.
pub fn write_advance<W: Write>(
    out: &mut W,
    system: &System,
    mesh: &Mesh,
    reader: &mut TrajectoryReader,
    channel: usize,
) -> Result<usize, TrajectoryError> {
    check_mesh(reader, mesh)?;

    let name = &system.channels[channel].name;
    writeln!(out, "# advance channel={}", name)?;
    writeln!(out, "# t front_x")?;

    let range = mesh.channel_ranges[channel];
    let mut states = vec![CellState::dry(system.n_solutes()); mesh.n_cells()];
    let mut used = 0;
    for k in 0..reader.step_count() {
        if reader.read_step(k, &mut states) != mesh.n_cells() {
            break;
        }
        let t = k as f64 * system.run.save_interval;
        let front = range
            .cells()
            .rev()
            .find(|&i| {
                let cell = &mesh.cells[i];
                states[i].depth(&cell.geometry) > system.tolerances.dry_depth
            })
            .map(|i| mesh.cells[i].x);
        match front {
            Some(x) => writeln!(out, "{:.6} {:.6}", t, x)?,
            None => writeln!(out, "{:.6} -", t)?,
        }
        used += 1;
    }
    Ok(used)
}

/// Danger plume of one solute over the whole network.
///
/// For every cell: position, maximum concentration over all saved steps, the
/// time of that maximum, and a danger flag when the solute's configured
/// danger concentration is exceeded. Returns the number of saved steps used.
pub fn write_plume<W: Write>(
    out: &mut W,
    system: &System,
    mesh: &Mesh,
    reader: &mut TrajectoryReader,
    solute: usize,
) -> Result<usize, TrajectoryError> {
    check_mesh(reader, mesh)?;

    let sol = &system.solutes[solute];
    writeln!(out, "# plume solute={}", sol.name)?;
    writeln!(out, "# channel x c_max t_max danger")?;

    let n = mesh.n_cells();
    let mut c_max = vec![0.0_f64; n];
    let mut t_max = vec![0.0_f64; n];
    let mut states = vec![CellState::dry(system.n_solutes()); n];
    let mut used = 0;
    for k in 0..reader.step_count() {
        if reader.read_step(k, &mut states) != n {
            break;
        }
        let t = k as f64 * system.run.save_interval;
        for i in 0..n {
            if states[i].c[solute] > c_max[i] {
                c_max[i] = states[i].c[solute];
                t_max[i] = t;
            }
        }
        used += 1;
    }

    for (i, cell) in mesh.cells.iter().enumerate() {
        let danger = match sol.danger_concentration {
            Some(limit) => c_max[i] >= limit,
            None => false,
        };
        writeln!(
            out,
            "{} {:.6} {:.6} {:.6} {}",
            system.channels[cell.channel].name,
            cell.x,
            c_max[i],
            t_max[i],
            danger as u8,
        )?;
    }
    Ok(used)
}

/// Boundary discharge contributions of every channel over time.
///
/// Columns: t, then inlet and outlet discharge per channel. Returns the
/// number of saved steps used.
pub fn write_contributions<W: Write>(
    out: &mut W,
    system: &System,
    mesh: &Mesh,
    reader: &mut TrajectoryReader,
) -> Result<usize, TrajectoryError> {
    check_mesh(reader, mesh)?;

    write!(out, "# contributions: t")?;
    for channel in &system.channels {
        write!(out, " {0}_in {0}_out", channel.name)?;
    }
    writeln!(out)?;

    let mut states = vec![CellState::dry(system.n_solutes()); mesh.n_cells()];
    let mut used = 0;
    for k in 0..reader.step_count() {
        if reader.read_step(k, &mut states) != mesh.n_cells() {
            break;
        }
        let t = k as f64 * system.run.save_interval;
        write!(out, "{:.6}", t)?;
        for range in &mesh.channel_ranges {
            write!(
                out,
                " {:.6} {:.6}",
                states[range.first].q,
                states[range.last()].q
            )?;
        }
        writeln!(out)?;
        used += 1;
    }
    Ok(used)
}

/// Dry-area threshold representative for the mesh (first cell's section).
fn dry_area(system: &System, mesh: &Mesh) -> f64 {
    mesh.cells
        .first()
        .map(|c| c.geometry.area(system.tolerances.dry_depth))
        .unwrap_or(0.0)
}

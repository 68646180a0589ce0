//! Mesh builder: flattens a channel network into one contiguous cell array.
//!
//! Cells are contiguous per channel and ordered by longitudinal position, so
//! a channel is a simple index range into the flat array. Thread partitioning
//! slices the flat array into near-equal contiguous ranges; a channel may be
//! split across a thread boundary (updates are local to a cell and its
//! immediate neighbors), a cell never is.
//!
//! Controlled cross sections are resolved here from (channel, section) names
//! to index handles. The mesh is derived state: it is rebuilt whenever the
//! system configuration changes and never outlives one run.

use crate::error::ConfigError;
use crate::state::CellState;
use crate::system::{
    BoundaryCondition, Channel, ChannelEnd, MeasuredVariable, SectionGeometry, System, TimeSeries,
};

/// One computational cell.
#[derive(Clone, Debug)]
pub struct Cell {
    /// Owning channel index.
    pub channel: usize,
    /// Index within the owning channel.
    pub local: usize,
    /// Center position along the channel (m).
    pub x: f64,
    /// Cell length (m).
    pub dx: f64,
    /// Section geometry interpolated to the cell center (at t = 0).
    pub geometry: SectionGeometry,
    /// Bounding cross sections (indices into the channel's section list) and
    /// the interpolation weight toward the downstream one. Kept so transient
    /// geometry can be re-evaluated during the run.
    pub section_lo: usize,
    pub section_hi: usize,
    pub section_w: f64,
}

/// Contiguous cell range of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelRange {
    /// First cell index.
    pub first: usize,
    /// Number of cells.
    pub count: usize,
}

impl ChannelRange {
    /// Index of the last cell.
    pub fn last(&self) -> usize {
        self.first + self.count - 1
    }

    pub fn cells(&self) -> std::ops::Range<usize> {
        self.first..self.first + self.count
    }
}

/// A resolved controlled-section binding.
///
/// The target cell's bottom elevation follows `law(measured)`, where the
/// measured variable is read at another cell. Index-based handles only; the
/// name lookup happened at build time.
#[derive(Clone, Debug)]
pub struct ControlBinding {
    pub target_cell: usize,
    pub measured_cell: usize,
    pub variable: MeasuredVariable,
    pub law: TimeSeries,
}

/// A resolved inner boundary (gate/offtake mid-channel).
#[derive(Clone, Debug)]
pub struct InnerBinding {
    /// Owning channel and the index of the boundary within `channel.inner`.
    pub channel: usize,
    pub boundary: usize,
    /// Cell whose interface carries the imposed structure.
    pub cell: usize,
    /// Receiving end cells for the capacity split: (cell, fraction).
    pub split: Vec<(usize, f64)>,
}

/// The flat computational mesh over the whole network.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub cells: Vec<Cell>,
    pub channel_ranges: Vec<ChannelRange>,
    pub controls: Vec<ControlBinding>,
    pub inner: Vec<InnerBinding>,
    /// Channels whose sections carry transient geometry.
    pub transient_channels: Vec<usize>,
}

impl Mesh {
    /// Build the mesh from a validated system.
    ///
    /// Channel reaches are divided into cells of roughly
    /// `system.run.cell_length`, at least two per channel.
    pub fn build(system: &System) -> Result<Self, ConfigError> {
        system.validate()?;

        let mut cells = Vec::new();
        let mut channel_ranges = Vec::with_capacity(system.channels.len());

        for (ci, channel) in system.channels.iter().enumerate() {
            let first = cells.len();
            let length = channel.length();
            let n = ((length / system.run.cell_length).round() as usize).max(2);
            let dx = length / n as f64;
            let x0 = channel.sections[0].x;

            for j in 0..n {
                let x = x0 + (j as f64 + 0.5) * dx;
                let (lo, hi, w) = bounding_sections(channel, x);
                let geometry = channel.sections[lo]
                    .geometry
                    .lerp(&channel.sections[hi].geometry, w);
                cells.push(Cell {
                    channel: ci,
                    local: j,
                    x,
                    dx,
                    geometry,
                    section_lo: lo,
                    section_hi: hi,
                    section_w: w,
                });
            }
            channel_ranges.push(ChannelRange { first, count: n });
        }

        let controls = resolve_controls(system, &cells, &channel_ranges)?;
        let inner = resolve_inner(system, &cells, &channel_ranges)?;

        let transient_channels = system
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.sections.iter().any(|s| !s.transients.is_empty()))
            .map(|(i, _)| i)
            .collect();

        Ok(Self {
            cells,
            channel_ranges,
            controls,
            inner,
            transient_channels,
        })
    }

    /// Total cell count.
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Partition the flat cell array into `nthreads` contiguous slices.
    ///
    /// Returns `cell_thread[nthreads + 1]` start indices: slice `i` owns
    /// cells `cell_thread[i]..cell_thread[i + 1]`. Slices are near-equal and
    /// non-empty unless `nthreads > n`.
    pub fn partition(&self, nthreads: usize) -> Vec<usize> {
        let nthreads = nthreads.max(1);
        let n = self.n_cells();
        (0..=nthreads).map(|i| i * n / nthreads).collect()
    }

    /// Re-evaluate transient section geometry onto cells at time `t`.
    ///
    /// Called only from the single-threaded boundary phase; channels without
    /// transient sections are skipped.
    pub fn update_transient_geometry(&mut self, system: &System, t: f64) {
        for &ci in &self.transient_channels {
            let channel = &system.channels[ci];
            let range = self.channel_ranges[ci];
            for cell in &mut self.cells[range.cells()] {
                let lo = channel.sections[cell.section_lo].geometry_at(t);
                let hi = channel.sections[cell.section_hi].geometry_at(t);
                cell.geometry = lo.lerp(&hi, cell.section_w);
            }
        }
    }

    /// Initial state of every cell from the channels' initial depth and the
    /// per-solute initial concentrations.
    pub fn initial_state(&self, system: &System) -> Vec<CellState> {
        let n_solutes = system.n_solutes();
        self.cells
            .iter()
            .map(|cell| {
                let channel = &system.channels[cell.channel];
                let a = cell.geometry.area(channel.initial_depth);
                let mut state = CellState::new(a, 0.0, n_solutes);
                for transport in &channel.transports {
                    if let Some(si) = system
                        .solutes
                        .iter()
                        .position(|s| s.name == transport.solute)
                    {
                        state.c[si] = transport.initial_concentration;
                    }
                }
                state
            })
            .collect()
    }

    /// Cell index nearest to position `x` in the given channel.
    pub fn cell_at(&self, channel: usize, x: f64) -> usize {
        nearest(&self.cells, self.channel_ranges[channel], x)
    }
}

/// Bounding sections of position `x` and the interpolation weight.
fn bounding_sections(channel: &Channel, x: f64) -> (usize, usize, f64) {
    let sections = &channel.sections;
    if x <= sections[0].x {
        return (0, 0, 0.0);
    }
    for i in 1..sections.len() {
        if x <= sections[i].x {
            let span = sections[i].x - sections[i - 1].x;
            let w = if span > 0.0 {
                (x - sections[i - 1].x) / span
            } else {
                0.0
            };
            return (i - 1, i, w);
        }
    }
    let last = sections.len() - 1;
    (last, last, 0.0)
}

fn resolve_controls(
    system: &System,
    cells: &[Cell],
    ranges: &[ChannelRange],
) -> Result<Vec<ControlBinding>, ConfigError> {
    let mut controls = Vec::new();
    for (ci, channel) in system.channels.iter().enumerate() {
        for section in &channel.sections {
            let Some(control) = &section.control else {
                continue;
            };
            let referrer = format!("{}:{}", channel.name, section.name);
            let mci = system.channel_index(&control.channel).ok_or_else(|| {
                ConfigError::UnknownChannel {
                    referrer: referrer.clone(),
                    name: control.channel.clone(),
                }
            })?;
            let msi = system.channels[mci]
                .section_index(&control.section)
                .ok_or_else(|| ConfigError::UnknownSection {
                    referrer: referrer.clone(),
                    channel: control.channel.clone(),
                    name: control.section.clone(),
                })?;
            let measured_x = system.channels[mci].sections[msi].x;
            controls.push(ControlBinding {
                target_cell: nearest(cells, ranges[ci], section.x),
                measured_cell: nearest(cells, ranges[mci], measured_x),
                variable: control.variable,
                law: control.law.clone(),
            });
        }
    }
    Ok(controls)
}

fn resolve_inner(
    system: &System,
    cells: &[Cell],
    ranges: &[ChannelRange],
) -> Result<Vec<InnerBinding>, ConfigError> {
    let mut inner = Vec::new();
    for (ci, channel) in system.channels.iter().enumerate() {
        for (bi, boundary) in channel.inner.iter().enumerate() {
            let x = boundary.x.ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "inner boundary '{}' has no position",
                    boundary.name
                ))
            })?;
            if matches!(boundary.condition, BoundaryCondition::Junction) {
                return Err(ConfigError::Invalid(format!(
                    "inner boundary '{}' cannot be of junction type",
                    boundary.name
                )));
            }
            let mut split = Vec::new();
            for jd in &boundary.junction {
                let ti = system.channel_index(&jd.channel).ok_or_else(|| {
                    ConfigError::UnknownChannel {
                        referrer: boundary.name.clone(),
                        name: jd.channel.clone(),
                    }
                })?;
                let target = match jd.end {
                    ChannelEnd::Upstream => ranges[ti].first,
                    ChannelEnd::Downstream => ranges[ti].last(),
                };
                split.push((target, jd.fraction));
            }
            inner.push(InnerBinding {
                channel: ci,
                boundary: bi,
                cell: nearest(cells, ranges[ci], x),
                split,
            });
        }
    }
    Ok(inner)
}

fn nearest(cells: &[Cell], range: ChannelRange, x: f64) -> usize {
    let mut best = range.first;
    let mut best_d = f64::INFINITY;
    for i in range.cells() {
        let d = (cells[i].x - x).abs();
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

//! Junction coupler: mass and momentum coupling between channels at network
//! nodes.
//!
//! A junction is a resolved, index-based linkage between branch-end cells of
//! the channels meeting at a node; it is built from the junction-typed
//! boundary flows once per mesh build, so no name lookups or cross-channel
//! pointers survive a configuration reload.
//!
//! Resolution runs in the synchronized phase between interior updates: it
//! touches cells owned by different thread partitions and must never run
//! concurrently with them. Each node is resolved by a bounded Newton
//! iteration that finds the volume-conserving common free-surface level,
//! then redistributes the node through-flow to the receiving branches by the
//! configured capacity fractions. Non-convergence degrades the step (the
//! last feasible distribution is kept and the step is flagged) instead of
//! aborting the run.

use tracing::warn;

use crate::error::ConfigError;
use crate::mesh::Mesh;
use crate::state::CellState;
use crate::system::{BoundaryCondition, ChannelEnd, System, Tolerances};

/// One branch of a junction.
#[derive(Clone, Debug)]
pub struct JunctionBranch {
    /// Branch-end cell (first or last cell of its channel).
    pub cell: usize,
    /// Which end of the owning channel meets the node.
    pub end: ChannelEnd,
    /// Capacity fraction for receiving branches; 0 for suppliers.
    pub weight: f64,
}

/// A resolved network node.
#[derive(Clone, Debug)]
pub struct Junction {
    pub name: String,
    pub branches: Vec<JunctionBranch>,
}

/// Outcome of resolving one junction at one step.
#[derive(Clone, Copy, Debug)]
pub struct JunctionReport {
    pub converged: bool,
    pub iterations: usize,
    /// Final level update magnitude (m).
    pub residual: f64,
}

/// All junctions of the network.
#[derive(Clone, Debug, Default)]
pub struct JunctionTable {
    pub junctions: Vec<Junction>,
}

impl JunctionTable {
    /// Build the table from the system's junction-typed boundary flows.
    ///
    /// Endpoints are grouped into nodes by following the JunctionData
    /// references from each junction boundary; every referenced endpoint
    /// joins the referring endpoint's node.
    pub fn build(system: &System, mesh: &Mesh) -> Result<Self, ConfigError> {
        // endpoint id: 2 * channel + (0 upstream | 1 downstream)
        let n_endpoints = 2 * system.channels.len();
        let mut parent: Vec<usize> = (0..n_endpoints).collect();

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        fn union(parent: &mut [usize], a: usize, b: usize) {
            let ra = find(parent, a);
            let rb = find(parent, b);
            if ra != rb {
                parent[ra] = rb;
            }
        }
        let endpoint = |channel: usize, end: ChannelEnd| match end {
            ChannelEnd::Upstream => 2 * channel,
            ChannelEnd::Downstream => 2 * channel + 1,
        };

        let mut weights = vec![0.0_f64; n_endpoints];
        let mut names: Vec<Option<String>> = vec![None; n_endpoints];
        let mut is_node = vec![false; n_endpoints];

        for (ci, channel) in system.channels.iter().enumerate() {
            for (end, boundary) in [
                (ChannelEnd::Upstream, &channel.inlet),
                (ChannelEnd::Downstream, &channel.outlet),
            ] {
                if !matches!(boundary.condition, BoundaryCondition::Junction) {
                    continue;
                }
                let own = endpoint(ci, end);
                is_node[own] = true;
                names[own] = Some(boundary.name.clone());
                for jd in &boundary.junction {
                    let ti = system.channel_index(&jd.channel).ok_or_else(|| {
                        ConfigError::UnknownChannel {
                            referrer: boundary.name.clone(),
                            name: jd.channel.clone(),
                        }
                    })?;
                    let other = endpoint(ti, jd.end);
                    is_node[other] = true;
                    weights[other] += jd.fraction;
                    union(&mut parent, own, other);
                }
            }
        }

        // collect union sets into junctions
        let mut junctions: Vec<Junction> = Vec::new();
        let mut root_of: Vec<Option<usize>> = vec![None; n_endpoints];
        for ep in 0..n_endpoints {
            if !is_node[ep] {
                continue;
            }
            let root = find(&mut parent, ep);
            let ji = match root_of[root] {
                Some(ji) => ji,
                None => {
                    junctions.push(Junction {
                        name: String::new(),
                        branches: Vec::new(),
                    });
                    root_of[root] = Some(junctions.len() - 1);
                    junctions.len() - 1
                }
            };
            let channel = ep / 2;
            let end = if ep % 2 == 0 {
                ChannelEnd::Upstream
            } else {
                ChannelEnd::Downstream
            };
            let cell = match end {
                ChannelEnd::Upstream => mesh.channel_ranges[channel].first,
                ChannelEnd::Downstream => mesh.channel_ranges[channel].last(),
            };
            junctions[ji].branches.push(JunctionBranch {
                cell,
                end,
                weight: weights[ep],
            });
            if junctions[ji].name.is_empty() {
                if let Some(name) = &names[ep] {
                    junctions[ji].name = name.clone();
                }
            }
        }

        Ok(Self { junctions })
    }

    pub fn is_empty(&self) -> bool {
        self.junctions.is_empty()
    }

    /// Resolve every junction against the given state.
    ///
    /// Returns one report per junction; the caller aggregates degraded steps.
    pub fn resolve(
        &self,
        states: &mut [CellState],
        mesh: &Mesh,
        tolerances: &Tolerances,
    ) -> Vec<JunctionReport> {
        self.junctions
            .iter()
            .map(|junction| resolve_node(junction, states, mesh, tolerances))
            .collect()
    }
}

/// Resolve one node: common surface level + weighted discharge split.
fn resolve_node(
    junction: &Junction,
    states: &mut [CellState],
    mesh: &Mesh,
    tolerances: &Tolerances,
) -> JunctionReport {
    let branches = &junction.branches;
    if branches.len() < 2 {
        return JunctionReport {
            converged: true,
            iterations: 0,
            residual: 0.0,
        };
    }

    // Stored volume over the branch-end cells must be conserved by the level
    // adjustment.
    let mut volume = 0.0;
    let mut level_guess = 0.0;
    let mut guess_weight = 0.0;
    for b in branches {
        let cell = &mesh.cells[b.cell];
        let s = &states[b.cell];
        volume += s.a * cell.dx;
        level_guess += s.level(&cell.geometry) * cell.dx;
        guess_weight += cell.dx;
    }
    let mut level = level_guess / guess_weight;

    // Newton on f(L) = sum dx_i A_i(L - zb_i) - V; f' = sum dx_i B_i > 0
    let mut converged = false;
    let mut iterations = 0;
    let mut residual = f64::INFINITY;
    for it in 0..tolerances.junction_max_iter {
        iterations = it + 1;
        let mut f = -volume;
        let mut df = 0.0;
        for b in branches {
            let cell = &mesh.cells[b.cell];
            let h = (level - cell.geometry.z_bottom).max(0.0);
            f += cell.dx * cell.geometry.area(h);
            df += cell.dx * cell.geometry.surface_width(h);
        }
        if df <= 0.0 {
            break;
        }
        let step = f / df;
        level -= step;
        residual = step.abs();
        if residual < tolerances.junction_tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        // keep the last iterate: it still conserves volume to within the
        // final residual, which beats aborting a long run
        warn!(
            junction = %junction.name,
            iterations,
            residual,
            "junction level iteration did not converge; continuing degraded"
        );
    }

    // Node through-flow from the supplying branches, positive into the node.
    let mut q_node = 0.0;
    for b in branches.iter().filter(|b| b.weight == 0.0) {
        match b.end {
            ChannelEnd::Downstream => q_node += states[b.cell].q,
            ChannelEnd::Upstream => q_node -= states[b.cell].q,
        }
    }

    let total_weight: f64 = branches.iter().map(|b| b.weight).sum();

    for b in branches {
        let cell = &mesh.cells[b.cell];
        let h = (level - cell.geometry.z_bottom).max(0.0);
        states[b.cell].a = cell.geometry.area(h);
        if b.weight > 0.0 && total_weight > 0.0 {
            let share = q_node * b.weight / total_weight;
            // a receiving upstream end carries the share downstream (q > 0);
            // a receiving downstream end is fed against its axis (q < 0)
            states[b.cell].q = match b.end {
                ChannelEnd::Upstream => share,
                ChannelEnd::Downstream => -share,
            };
        }
    }

    JunctionReport {
        converged,
        iterations,
        residual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{
        BoundaryFlow, Channel, CrossSection, JunctionData, RunSettings, SectionGeometry,
        TimeSeries,
    };
    use approx::assert_relative_eq;

    fn channel(name: &str, length: f64, inlet: BoundaryFlow, outlet: BoundaryFlow) -> Channel {
        Channel {
            name: name.into(),
            sections: vec![
                CrossSection {
                    name: format!("{name}-up"),
                    x: 0.0,
                    geometry: SectionGeometry::rectangular(0.0, 5.0),
                    transients: vec![],
                    control: None,
                },
                CrossSection {
                    name: format!("{name}-down"),
                    x: length,
                    geometry: SectionGeometry::rectangular(0.0, 5.0),
                    transients: vec![],
                    control: None,
                },
            ],
            inlet,
            outlet,
            inner: vec![],
            transports: vec![],
            manning: 0.03,
            initial_depth: 1.0,
        }
    }

    fn discharge_bc(name: &str, q: f64) -> BoundaryFlow {
        BoundaryFlow {
            name: name.into(),
            x: None,
            condition: BoundaryCondition::Discharge {
                series: TimeSeries::constant(q),
            },
            junction: vec![],
        }
    }

    fn depth_bc(name: &str, h: f64) -> BoundaryFlow {
        BoundaryFlow {
            name: name.into(),
            x: None,
            condition: BoundaryCondition::Depth {
                series: TimeSeries::constant(h),
            },
            junction: vec![],
        }
    }

    fn junction_bc(name: &str, splits: &[(&str, ChannelEnd, f64)]) -> BoundaryFlow {
        BoundaryFlow {
            name: name.into(),
            x: None,
            condition: BoundaryCondition::Junction,
            junction: splits
                .iter()
                .map(|&(channel, end, fraction)| JunctionData {
                    channel: channel.into(),
                    end,
                    fraction,
                })
                .collect(),
        }
    }

    /// Main channel splitting into two branches with a 0.6/0.4 split.
    fn three_branch_system() -> System {
        System {
            name: "fork".into(),
            channels: vec![
                channel(
                    "main",
                    500.0,
                    discharge_bc("main-in", 1.0),
                    junction_bc(
                        "node",
                        &[
                            ("left", ChannelEnd::Upstream, 0.6),
                            ("right", ChannelEnd::Upstream, 0.4),
                        ],
                    ),
                ),
                channel(
                    "left",
                    400.0,
                    junction_bc("node-left", &[("main", ChannelEnd::Downstream, 0.0)]),
                    depth_bc("left-out", 1.0),
                ),
                channel(
                    "right",
                    400.0,
                    junction_bc("node-right", &[("main", ChannelEnd::Downstream, 0.0)]),
                    depth_bc("right-out", 1.0),
                ),
            ],
            solutes: vec![],
            tolerances: Tolerances::default(),
            run: RunSettings {
                t_end: 100.0,
                save_interval: 10.0,
                cfl: 0.9,
                dt_max: None,
                cell_length: 100.0,
            },
            solution_file: "sol.tmp".into(),
            working_dir: None,
        }
    }

    #[test]
    fn test_build_groups_three_endpoints_into_one_node() {
        let sys = three_branch_system();
        let mesh = Mesh::build(&sys).unwrap();
        let table = JunctionTable::build(&sys, &mesh).unwrap();

        assert_eq!(table.junctions.len(), 1);
        assert_eq!(table.junctions[0].branches.len(), 3);
    }

    #[test]
    fn test_weighted_split_conserves_discharge() {
        let sys = three_branch_system();
        let mesh = Mesh::build(&sys).unwrap();
        let table = JunctionTable::build(&sys, &mesh).unwrap();
        let mut states = mesh.initial_state(&sys);

        // impose Q = 1 flowing into the node from the main channel
        let main_last = mesh.channel_ranges[0].last();
        states[main_last].q = 1.0;

        let reports = table.resolve(&mut states, &mesh, &sys.tolerances);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].converged);

        let left_first = mesh.channel_ranges[1].first;
        let right_first = mesh.channel_ranges[2].first;
        assert_relative_eq!(states[left_first].q, 0.6, epsilon = 1e-9);
        assert_relative_eq!(states[right_first].q, 0.4, epsilon = 1e-9);

        // split conserves the inflow
        let out = states[left_first].q + states[right_first].q;
        assert_relative_eq!(out, states[main_last].q, epsilon = 1e-9);
    }

    #[test]
    fn test_level_equalized_across_node() {
        let sys = three_branch_system();
        let mesh = Mesh::build(&sys).unwrap();
        let table = JunctionTable::build(&sys, &mesh).unwrap();
        let mut states = mesh.initial_state(&sys);

        // perturb one branch depth; resolution should even the levels out
        let main_last = mesh.channel_ranges[0].last();
        let geo = &mesh.cells[main_last].geometry;
        states[main_last].a = geo.area(2.0);

        table.resolve(&mut states, &mesh, &sys.tolerances);

        let levels: Vec<f64> = table.junctions[0]
            .branches
            .iter()
            .map(|b| states[b.cell].level(&mesh.cells[b.cell].geometry))
            .collect();
        for pair in levels.windows(2) {
            assert_relative_eq!(pair[0], pair[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_volume_conserved_by_level_adjustment() {
        let sys = three_branch_system();
        let mesh = Mesh::build(&sys).unwrap();
        let table = JunctionTable::build(&sys, &mesh).unwrap();
        let mut states = mesh.initial_state(&sys);

        let main_last = mesh.channel_ranges[0].last();
        states[main_last].a = mesh.cells[main_last].geometry.area(3.0);

        let before: f64 = table.junctions[0]
            .branches
            .iter()
            .map(|b| states[b.cell].a * mesh.cells[b.cell].dx)
            .sum();

        table.resolve(&mut states, &mesh, &sys.tolerances);

        let after: f64 = table.junctions[0]
            .branches
            .iter()
            .map(|b| states[b.cell].a * mesh.cells[b.cell].dx)
            .sum();
        assert_relative_eq!(before, after, epsilon = 1e-6);
    }

    #[test]
    fn test_no_junctions_is_empty_table() {
        let sys = System {
            channels: vec![channel(
                "solo",
                300.0,
                discharge_bc("in", 1.0),
                depth_bc("out", 1.0),
            )],
            ..three_branch_system()
        };
        let mesh = Mesh::build(&sys).unwrap();
        let table = JunctionTable::build(&sys, &mesh).unwrap();
        assert!(table.is_empty());
    }
}

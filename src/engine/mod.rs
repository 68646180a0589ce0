//! Time-stepping engine: the per-run worker pool and the phase sequence of
//! one step.
//!
//! One step runs as a fixed sequence of phases, each separated by a full
//! barrier (a pool invocation joining before the next phase starts):
//!
//! 1. transient geometry and controlled-section feedback (orchestrator)
//! 2. Courant step-size reduction over the thread slices (parallel)
//! 3. interior finite-volume update into the back buffer (parallel)
//! 4. buffer swap, junction resolution (orchestrator)
//! 5. external and inner boundary application (orchestrator)
//! 6. trajectory checkpoint when a save instant is reached
//!
//! Workers own disjoint contiguous slices of the back buffer and read the
//! whole front buffer immutably, so no locking is needed inside a phase.
//! Numerical failures found inside a slice are escalated at the phase
//! barrier; the run aborts with the state at fault. Cancellation is polled
//! once per step and finishes the step cleanly, so the trajectory stays valid
//! up to the last saved instant.

mod update;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::error::{ConfigError, NumericalFailure, SimulationError};
use crate::junction::JunctionTable;
use crate::mesh::Mesh;
use crate::state::StateBuffers;
use crate::system::System;
use crate::trajectory::TrajectoryWriter;

use update::{
    apply_boundaries, apply_controls, apply_inner, stable_dt_slice, update_slice, StepInputs,
};

/// Engine tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct EngineOptions {
    /// Worker thread count.
    pub nthreads: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            nthreads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Reached the configured end time.
    Completed,
    /// Stopped by the cancellation flag; trajectory valid up to the last
    /// saved step.
    Cancelled,
}

/// Aggregate outcome of a run.
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    pub state: RunState,
    /// Simulation time reached (s).
    pub final_time: f64,
    /// Time steps taken.
    pub steps: usize,
    /// Trajectory steps persisted.
    pub saved_steps: usize,
    /// Steps in which at least one junction did not converge.
    pub degraded_steps: usize,
    /// Smallest step size taken (s).
    pub dt_min: f64,
}

/// One prepared simulation run: mesh, junction table, state buffers and the
/// worker pool, all derived from a validated [`System`].
pub struct Simulation {
    system: System,
    mesh: Mesh,
    junctions: JunctionTable,
    buffers: StateBuffers,
    partition: Vec<usize>,
    nthreads: usize,
    pool: ThreadPool,
    cancel: Arc<AtomicBool>,
}

impl Simulation {
    /// Build a run from a validated system.
    ///
    /// Validation, mesh construction and junction resolution all happen here;
    /// a constructed `Simulation` cannot fail for configuration reasons.
    pub fn new(system: System, options: EngineOptions) -> Result<Self, SimulationError> {
        let mesh = Mesh::build(&system)?;
        let junctions = JunctionTable::build(&system, &mesh)?;
        let buffers = StateBuffers::new(mesh.initial_state(&system));
        let nthreads = options.nthreads.clamp(1, mesh.n_cells().max(1));
        let partition = mesh.partition(nthreads);
        let pool = ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build worker pool: {e}")))?;

        Ok(Self {
            system,
            mesh,
            junctions,
            buffers,
            partition,
            nthreads,
            pool,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Shared flag that stops the run at the next step boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run from t = 0 to the configured end time, writing the trajectory at
    /// every save instant (the initial state included).
    pub fn run(&mut self) -> Result<RunSummary, SimulationError> {
        let t_end = self.system.run.t_end;
        let save_interval = self.system.run.save_interval;
        let a_min = self.system.tolerances.dry_depth;
        let path = self.system.solution_path();

        let mut writer =
            TrajectoryWriter::create(&path, self.mesh.n_cells(), self.system.n_solutes())?;

        info!(
            system = %self.system.name,
            cells = self.mesh.n_cells(),
            threads = self.nthreads,
            t_end,
            "starting run"
        );

        let mut t = 0.0;
        let mut step = 0usize;
        let mut next_save = save_interval;
        let mut degraded_steps = 0usize;
        let mut dt_min = f64::INFINITY;
        let mut state = RunState::Completed;

        // initial boundary values, then the t = 0 checkpoint
        {
            let inputs = StepInputs {
                system: &self.system,
                mesh: &self.mesh,
                dt: 0.0,
                t: 0.0,
                step: 0,
                a_min,
            };
            apply_boundaries(&mut self.buffers.current, &inputs);
            apply_inner(&mut self.buffers.current, &inputs);
        }
        self.write_checkpoint(&mut writer, t)?;

        while t < t_end - 1e-12 {
            if self.cancel.load(Ordering::Relaxed) {
                state = RunState::Cancelled;
                info!(t, step, "run cancelled");
                break;
            }

            // phase 1: geometry that may move under the flow
            self.mesh.update_transient_geometry(&self.system, t);
            apply_controls(&mut self.mesh, &self.buffers.current);

            // phase 2: Courant bound over the slices
            let dt = {
                let inputs = StepInputs {
                    system: &self.system,
                    mesh: &self.mesh,
                    dt: 0.0,
                    t,
                    step,
                    a_min,
                };
                let partition = &self.partition;
                let current = &self.buffers.current;
                let nthreads = self.nthreads;
                let stable = self.pool.install(|| {
                    (0..nthreads)
                        .into_par_iter()
                        .map(|tid| {
                            stable_dt_slice(partition[tid], partition[tid + 1], current, &inputs)
                        })
                        .reduce(|| f64::INFINITY, f64::min)
                });

                let remaining = (next_save - t).min(t_end - t);
                let mut dt = if stable.is_finite() {
                    self.system.run.cfl * stable
                } else {
                    // whole network dry: jump to the next instant of interest
                    remaining
                };
                if let Some(cap) = self.system.run.dt_max {
                    dt = dt.min(cap);
                }
                dt = dt.min(remaining);
                if dt <= 0.0 {
                    dt = remaining;
                }
                dt
            };
            dt_min = dt_min.min(dt);

            // phase 3: parallel interior update
            if let Some(failure) = self.update_interior(dt, t, step, a_min) {
                return Err(failure.into());
            }
            self.buffers.swap();

            // phase 4: junction coupling on the fresh state
            let reports =
                self.junctions
                    .resolve(&mut self.buffers.current, &self.mesh, &self.system.tolerances);
            if reports.iter().any(|r| !r.converged) {
                degraded_steps += 1;
            }

            // phase 5: boundary values at the new time
            t += dt;
            step += 1;
            {
                let inputs = StepInputs {
                    system: &self.system,
                    mesh: &self.mesh,
                    dt,
                    t,
                    step,
                    a_min,
                };
                apply_boundaries(&mut self.buffers.current, &inputs);
                apply_inner(&mut self.buffers.current, &inputs);
            }

            // phase 6: checkpoint
            if t >= next_save - 1e-9 {
                self.write_checkpoint(&mut writer, t)?;
                debug!(t, step, saved = writer.steps_written(), "checkpoint");
                next_save += save_interval;
            }
        }

        let saved_steps = writer.steps_written();
        writer.finish()?;

        info!(
            final_time = t,
            steps = step,
            saved_steps,
            degraded_steps,
            "run finished"
        );

        Ok(RunSummary {
            state,
            final_time: t,
            steps: step,
            saved_steps,
            degraded_steps,
            dt_min,
        })
    }

    /// Phase 3: every worker updates its slice of the back buffer; the scope
    /// join is the barrier at which the first failure (lowest slice index)
    /// is escalated.
    fn update_interior(
        &mut self,
        dt: f64,
        t: f64,
        step: usize,
        a_min: f64,
    ) -> Option<NumericalFailure> {
        let StateBuffers { current, next } = &mut self.buffers;
        let current = &*current;
        let partition = &self.partition;
        let inputs = StepInputs {
            system: &self.system,
            mesh: &self.mesh,
            dt,
            t,
            step,
            a_min,
        };

        let mut failures: Vec<Option<NumericalFailure>> = vec![None; self.nthreads];
        self.pool.scope(|s| {
            let mut rest = next.as_mut_slice();
            for (tid, slot) in failures.iter_mut().enumerate() {
                let lo = partition[tid];
                let hi = partition[tid + 1];
                let (slice, tail) = rest.split_at_mut(hi - lo);
                rest = tail;
                s.spawn(move |_| {
                    *slot = update_slice(lo, hi, slice, current, tid, &inputs);
                });
            }
        });

        failures.into_iter().flatten().next()
    }

    fn write_checkpoint(
        &mut self,
        writer: &mut TrajectoryWriter,
        t: f64,
    ) -> Result<(), SimulationError> {
        let expected = self.mesh.n_cells();
        let written = writer.write_step(&self.buffers.current);
        if written != expected {
            return Err(SimulationError::ShortWrite {
                time: t,
                written,
                expected,
            });
        }
        Ok(())
    }
}

//! # swnet
//!
//! A shallow-water simulation core for irrigation channel networks.
//!
//! This crate provides the building blocks for 1D network simulations:
//! - System configuration (channels, cross sections, boundaries, solutes)
//! - Mesh construction over the whole network
//! - HLL numerical fluxes for the Saint-Venant equations
//! - Junction coupling between channels
//! - Parallel time-stepping engine
//! - Binary trajectory persistence and ASCII result extraction

pub mod engine;
pub mod error;
pub mod flux;
pub mod junction;
pub mod mesh;
pub mod state;
pub mod system;
pub mod trajectory;

// Re-export main types for convenience
pub use engine::{EngineOptions, RunState, RunSummary, Simulation};
pub use error::{ConfigError, NumericalFailure, SimulationError, TrajectoryError};
pub use flux::{hll_flux, InterfaceFlux};
pub use junction::{Junction, JunctionReport, JunctionTable};
pub use mesh::{Cell, ChannelRange, Mesh};
pub use state::{record_size, CellState, StateBuffers};
pub use system::{
    BoundaryCondition, BoundaryFlow, Channel, ChannelEnd, CrossSection, JunctionData,
    MeasuredVariable, RunSettings, SectionGeometry, Solute, System, TimeSeries, Tolerances,
    GRAVITY,
};
pub use trajectory::{
    export::{write_advance, write_contributions, write_evolution, write_plume, write_profile},
    TrajectoryReader, TrajectoryWriter,
};

//! Configuration entities: the validated in-memory description of a channel
//! network that the solver consumes.
//!
//! A [`System`] owns an ordered set of [`Channel`]s; each channel owns its
//! cross sections, boundary conditions and per-solute transport records.
//! Channels never reference each other directly: junctions and controlled
//! sections name their targets, and names are resolved to index handles once
//! at mesh build (the tree stays safely `Clone`-able and reloadable).
//!
//! The document format is JSON via serde; the GUI/XML editor layer of the
//! original toolchain is an external collaborator that hands the core this
//! tree.

mod geometry;
mod timeseries;

pub use geometry::{SectionGeometry, GRAVITY};
pub use timeseries::{SeriesPoint, TimeSeries};

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which end of a channel participates in a junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEnd {
    /// The first cross section (inlet).
    Upstream,
    /// The last cross section (outlet).
    Downstream,
}

/// Variable measured at a remote cross section by a control law.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasuredVariable {
    Discharge,
    Depth,
    Level,
}

/// Feedback control of a section's geometry.
///
/// The controlled section's bottom elevation (gate crest) follows
/// `law(measured)`, where the measured variable is taken at another channel's
/// cross section, referenced *by name*. Name resolution happens at mesh
/// build; an unknown name is a configuration error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectionControl {
    /// Name of the channel carrying the measured section.
    pub channel: String,
    /// Name of the measured cross section.
    pub section: String,
    /// Which variable is measured there.
    pub variable: MeasuredVariable,
    /// Maps the measured value to the controlled bottom elevation.
    pub law: TimeSeries,
}

/// A time-varying replacement geometry, active from `t` onwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransientSection {
    /// Activation time (s).
    pub t: f64,
    pub geometry: SectionGeometry,
}

/// A named geometric profile at a position along a channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrossSection {
    pub name: String,
    /// Longitudinal position along the channel (m), strictly increasing.
    pub x: f64,
    pub geometry: SectionGeometry,
    /// Optional time-varying geometry, ordered by activation time.
    #[serde(default)]
    pub transients: Vec<TransientSection>,
    /// Optional feedback control of the geometry.
    #[serde(default)]
    pub control: Option<SectionControl>,
}

impl CrossSection {
    /// Geometry at simulation time `t`.
    ///
    /// The base geometry acts as the t=0 entry; between activation times the
    /// geometry is blended linearly, and the last transient is held.
    pub fn geometry_at(&self, t: f64) -> SectionGeometry {
        if self.transients.is_empty() || t <= 0.0 {
            return self.geometry;
        }
        let mut prev_t = 0.0;
        let mut prev_g = self.geometry;
        for tr in &self.transients {
            if t <= tr.t {
                let span = tr.t - prev_t;
                let w = if span > 0.0 { (t - prev_t) / span } else { 1.0 };
                return prev_g.lerp(&tr.geometry, w);
            }
            prev_t = tr.t;
            prev_g = tr.geometry;
        }
        prev_g
    }
}

/// How a junction-attached or inner boundary splits its capacity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JunctionData {
    /// Target channel name.
    pub channel: String,
    /// Which end of the target channel joins the node / receives the split.
    #[serde(default = "JunctionData::default_end")]
    pub end: ChannelEnd,
    /// Capacity fraction (non-negative; fractions on one boundary sum to ≤ 1).
    pub fraction: f64,
}

impl JunctionData {
    fn default_end() -> ChannelEnd {
        ChannelEnd::Upstream
    }
}

/// Typed boundary condition on a channel end or internal structure.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundaryCondition {
    /// Imposed discharge hydrograph Q(t) (m³/s).
    Discharge { series: TimeSeries },
    /// Imposed water depth h(t) (m).
    Depth { series: TimeSeries },
    /// Imposed free-surface level z(t) (m above datum).
    Level { series: TimeSeries },
    /// Gate law: Q = c · a(t) · w · sqrt(2 g h) with opening a(t).
    Gate {
        opening: TimeSeries,
        coefficient: f64,
        width: f64,
    },
    /// This end meets other channels at a network node; resolved by the
    /// junction coupler, not by external boundary application.
    Junction,
}

impl BoundaryCondition {
    /// Name of the variant for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            BoundaryCondition::Discharge { .. } => "discharge",
            BoundaryCondition::Depth { .. } => "depth",
            BoundaryCondition::Level { .. } => "level",
            BoundaryCondition::Gate { .. } => "gate",
            BoundaryCondition::Junction => "junction",
        }
    }
}

/// A boundary condition attached to a channel (end or inner structure).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundaryFlow {
    pub name: String,
    /// Position along the channel for inner boundaries; ends have none.
    #[serde(default)]
    pub x: Option<f64>,
    pub condition: BoundaryCondition,
    /// Capacity redistribution to adjoining channels (junction nodes and
    /// inner offtakes).
    #[serde(default)]
    pub junction: Vec<JunctionData>,
}

/// Per-solute inflow description for one channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundaryTransport {
    /// Solute name (must exist in [`System::solutes`]).
    pub solute: String,
    /// Initial concentration over the whole channel (kg/m³).
    #[serde(default)]
    pub initial_concentration: f64,
    /// Inflow concentration at the channel inlet over time.
    #[serde(default)]
    pub inflow: Option<TimeSeries>,
}

/// A transported solute.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Solute {
    pub name: String,
    /// Concentration above which the plume export flags a cell (kg/m³).
    #[serde(default)]
    pub danger_concentration: Option<f64>,
}

/// One reach of waterway with ordered cross sections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub sections: Vec<CrossSection>,
    pub inlet: BoundaryFlow,
    pub outlet: BoundaryFlow,
    /// Internal structures (gates, offtakes) mid-channel.
    #[serde(default)]
    pub inner: Vec<BoundaryFlow>,
    /// One record per transported solute.
    #[serde(default)]
    pub transports: Vec<BoundaryTransport>,
    /// Manning roughness coefficient.
    #[serde(default = "Channel::default_manning")]
    pub manning: f64,
    /// Initial water depth over the channel (m).
    #[serde(default = "Channel::default_initial_depth")]
    pub initial_depth: f64,
}

impl Channel {
    fn default_manning() -> f64 {
        0.03
    }

    fn default_initial_depth() -> f64 {
        1.0
    }

    /// Longitudinal extent (first to last section).
    pub fn length(&self) -> f64 {
        match (self.sections.first(), self.sections.last()) {
            (Some(a), Some(b)) => b.x - a.x,
            _ => 0.0,
        }
    }

    pub fn section_index(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }
}

/// Global numeric tolerances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tolerances {
    /// Convergence tolerance of the junction coupler (m on surface level).
    pub junction_tolerance: f64,
    /// Iteration bound of the junction coupler.
    pub junction_max_iter: usize,
    /// Depth below which a cell is treated as dry (m).
    pub dry_depth: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            junction_tolerance: 1e-6,
            junction_max_iter: 50,
            dry_depth: 1e-6,
        }
    }
}

/// Run parameters stored with the simulation document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSettings {
    /// End time of the simulation (s).
    pub t_end: f64,
    /// Interval between saved trajectory steps (s).
    pub save_interval: f64,
    /// Courant number (fraction of the stability bound).
    #[serde(default = "RunSettings::default_cfl")]
    pub cfl: f64,
    /// Hard cap on the step size (s).
    #[serde(default)]
    pub dt_max: Option<f64>,
    /// Target cell length for mesh building (m).
    #[serde(default = "RunSettings::default_cell_length")]
    pub cell_length: f64,
}

impl RunSettings {
    fn default_cfl() -> f64 {
        0.9
    }

    fn default_cell_length() -> f64 {
        10.0
    }
}

/// Top-level simulation unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct System {
    #[serde(default)]
    pub name: String,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub solutes: Vec<Solute>,
    #[serde(default)]
    pub tolerances: Tolerances,
    pub run: RunSettings,
    /// Base name of the binary solution file inside the working directory.
    #[serde(default = "System::default_solution_file")]
    pub solution_file: String,
    /// Working directory for solution and export files; defaults to the
    /// directory of the configuration document.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl System {
    fn default_solution_file() -> String {
        "sol.tmp".into()
    }

    /// Load and validate a system from a JSON document on disk.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut system: System =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if system.working_dir.is_none() {
            system.working_dir = path.parent().map(Path::to_path_buf);
        }
        system.validate()?;
        Ok(system)
    }

    /// Parse and validate a system from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let system: System =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        system.validate()?;
        Ok(system)
    }

    /// Path of the binary trajectory file.
    pub fn solution_path(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) => dir.join(&self.solution_file),
            None => PathBuf::from(&self.solution_file),
        }
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn n_solutes(&self) -> usize {
        self.solutes.len()
    }

    /// Validate the whole tree; first failure wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::Invalid("system has no channels".into()));
        }
        if !(self.run.t_end > 0.0) {
            return Err(ConfigError::Invalid("t_end must be positive".into()));
        }
        if !(self.run.save_interval > 0.0) {
            return Err(ConfigError::Invalid("save_interval must be positive".into()));
        }
        if !(self.run.cell_length > 0.0) {
            return Err(ConfigError::Invalid("cell_length must be positive".into()));
        }

        for channel in &self.channels {
            self.validate_channel(channel)?;
        }
        Ok(())
    }

    fn validate_channel(&self, channel: &Channel) -> Result<(), ConfigError> {
        if channel.sections.len() < 2 {
            return Err(ConfigError::TooFewSections {
                channel: channel.name.clone(),
                count: channel.sections.len(),
            });
        }
        for (i, section) in channel.sections.iter().enumerate() {
            section.geometry.validate(&section.name)?;
            if i > 0 && section.x <= channel.sections[i - 1].x {
                return Err(ConfigError::NonMonotonicSections {
                    channel: channel.name.clone(),
                    section: section.name.clone(),
                    x: section.x,
                });
            }
            for (k, tr) in section.transients.iter().enumerate() {
                tr.geometry.validate(&section.name)?;
                let prev = if k > 0 {
                    section.transients[k - 1].t
                } else {
                    0.0
                };
                if tr.t <= prev {
                    return Err(ConfigError::NonMonotonicSeries {
                        name: format!("{}:transients", section.name),
                        index: k,
                    });
                }
            }
            if let Some(control) = &section.control {
                self.validate_control(&channel.name, &section.name, control)?;
            }
        }

        self.validate_boundary(channel, &channel.inlet)?;
        self.validate_boundary(channel, &channel.outlet)?;
        for inner in &channel.inner {
            self.validate_boundary(channel, inner)?;
        }

        for transport in &channel.transports {
            if !self.solutes.iter().any(|s| s.name == transport.solute) {
                return Err(ConfigError::Invalid(format!(
                    "channel '{}' transports unknown solute '{}'",
                    channel.name, transport.solute
                )));
            }
            if let Some(inflow) = &transport.inflow {
                inflow.validate(&format!("{}:{}", channel.name, transport.solute))?;
            }
        }
        Ok(())
    }

    fn validate_control(
        &self,
        channel_name: &str,
        section_name: &str,
        control: &SectionControl,
    ) -> Result<(), ConfigError> {
        let referrer = format!("{}:{}", channel_name, section_name);
        let target = self
            .channels
            .iter()
            .find(|c| c.name == control.channel)
            .ok_or_else(|| ConfigError::UnknownChannel {
                referrer: referrer.clone(),
                name: control.channel.clone(),
            })?;
        if target.section_index(&control.section).is_none() {
            return Err(ConfigError::UnknownSection {
                referrer,
                channel: control.channel.clone(),
                name: control.section.clone(),
            });
        }
        control.law.validate(&format!("{}:control", section_name))
    }

    fn validate_boundary(
        &self,
        channel: &Channel,
        boundary: &BoundaryFlow,
    ) -> Result<(), ConfigError> {
        match &boundary.condition {
            BoundaryCondition::Discharge { series }
            | BoundaryCondition::Depth { series }
            | BoundaryCondition::Level { series } => series.validate(&boundary.name)?,
            BoundaryCondition::Gate {
                opening,
                coefficient,
                width,
            } => {
                opening.validate(&boundary.name)?;
                if !(*coefficient > 0.0) || !(*width > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "gate '{}': coefficient and width must be positive",
                        boundary.name
                    )));
                }
            }
            BoundaryCondition::Junction => {
                if boundary.junction.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "junction boundary '{}' lists no partner channels",
                        boundary.name
                    )));
                }
            }
        }

        if !boundary.junction.is_empty() {
            let mut sum = 0.0;
            for jd in &boundary.junction {
                if self.channel_index(&jd.channel).is_none() {
                    return Err(ConfigError::UnknownChannel {
                        referrer: boundary.name.clone(),
                        name: jd.channel.clone(),
                    });
                }
                if jd.fraction < 0.0 {
                    return Err(ConfigError::BadJunctionSplit {
                        boundary: boundary.name.clone(),
                        sum: jd.fraction,
                    });
                }
                sum += jd.fraction;
            }
            // sum == 0 is a pure supplier-side linkage (no split to apply)
            if sum > 1.0 + 1e-9 {
                return Err(ConfigError::BadJunctionSplit {
                    boundary: boundary.name.clone(),
                    sum,
                });
            }
        }

        if let (Some(x), Some(first), Some(last)) =
            (boundary.x, channel.sections.first(), channel.sections.last())
        {
            let (x0, x1) = (first.x, last.x);
            if x <= x0 || x >= x1 {
                return Err(ConfigError::Invalid(format!(
                    "inner boundary '{}' at x={} lies outside channel '{}' ({}, {})",
                    boundary.name, x, channel.name, x0, x1
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_channel(name: &str) -> Channel {
        Channel {
            name: name.into(),
            sections: vec![
                CrossSection {
                    name: format!("{name}-up"),
                    x: 0.0,
                    geometry: SectionGeometry::rectangular(1.0, 5.0),
                    transients: vec![],
                    control: None,
                },
                CrossSection {
                    name: format!("{name}-down"),
                    x: 1000.0,
                    geometry: SectionGeometry::rectangular(0.0, 5.0),
                    transients: vec![],
                    control: None,
                },
            ],
            inlet: BoundaryFlow {
                name: format!("{name}-in"),
                x: None,
                condition: BoundaryCondition::Discharge {
                    series: TimeSeries::constant(1.0),
                },
                junction: vec![],
            },
            outlet: BoundaryFlow {
                name: format!("{name}-out"),
                x: None,
                condition: BoundaryCondition::Depth {
                    series: TimeSeries::constant(1.0),
                },
                junction: vec![],
            },
            inner: vec![],
            transports: vec![],
            manning: 0.03,
            initial_depth: 1.0,
        }
    }

    fn single_channel_system() -> System {
        System {
            name: "test".into(),
            channels: vec![straight_channel("main")],
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
    fn test_valid_system_passes() {
        assert!(single_channel_system().validate().is_ok());
    }

    #[test]
    fn test_too_few_sections_rejected() {
        let mut sys = single_channel_system();
        sys.channels[0].sections.truncate(1);
        let err = sys.validate().unwrap_err();
        assert!(matches!(err, ConfigError::TooFewSections { .. }));
    }

    #[test]
    fn test_non_monotonic_sections_rejected() {
        let mut sys = single_channel_system();
        sys.channels[0].sections[1].x = -5.0;
        let err = sys.validate().unwrap_err();
        assert!(matches!(err, ConfigError::NonMonotonicSections { .. }));
    }

    #[test]
    fn test_unknown_control_channel_rejected() {
        let mut sys = single_channel_system();
        sys.channels[0].sections[0].control = Some(SectionControl {
            channel: "nope".into(),
            section: "s".into(),
            variable: MeasuredVariable::Depth,
            law: TimeSeries::constant(0.5),
        });
        let err = sys.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownChannel { .. }));
    }

    #[test]
    fn test_junction_split_must_be_bounded() {
        let mut sys = single_channel_system();
        sys.channels.push(straight_channel("branch"));
        sys.channels[0].outlet = BoundaryFlow {
            name: "node".into(),
            x: None,
            condition: BoundaryCondition::Junction,
            junction: vec![JunctionData {
                channel: "branch".into(),
                end: ChannelEnd::Upstream,
                fraction: 1.5,
            }],
        };
        let err = sys.validate().unwrap_err();
        assert!(matches!(err, ConfigError::BadJunctionSplit { .. }));
    }

    #[test]
    fn test_geometry_at_transients() {
        let section = CrossSection {
            name: "s".into(),
            x: 0.0,
            geometry: SectionGeometry::rectangular(0.0, 4.0),
            transients: vec![TransientSection {
                t: 10.0,
                geometry: SectionGeometry::rectangular(0.0, 8.0),
            }],
            control: None,
        };
        assert_eq!(section.geometry_at(0.0).bottom_width, 4.0);
        assert_eq!(section.geometry_at(5.0).bottom_width, 6.0);
        assert_eq!(section.geometry_at(100.0).bottom_width, 8.0);
    }

    #[test]
    fn test_json_roundtrip() {
        let sys = single_channel_system();
        let json = serde_json::to_string(&sys).unwrap();
        let back = System::from_json(&json).unwrap();
        assert_eq!(back.channels.len(), 1);
        assert_eq!(back.channels[0].name, "main");
    }
}

//! Run configuration.
//!
//! Physical constants and grid settings travel in a [`PlumeConfig`] value
//! rather than module-level globals, so separate runs (or threads) can use
//! different settings. Per-source options live in [`SourceConfig`]. Both are
//! validated when built or loaded, so a bad tag stops the run before any
//! sounding is processed.

use std::{collections::HashSet, ops::Range, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::PlumeError, plume::SolverSettings};

/// Linear bias correction applied to the equilibrium relation,
/// `zCL = b + m * (zs + Tau * wf)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasFit {
    /// Slope
    pub m: f64,
    /// Intercept in m
    pub b: f64,
}

impl BiasFit {
    /// No correction.
    pub const IDENTITY: Self = Self { m: 1.0, b: 0.0 };

    /// Calibration of the scaling law against LES plumes (Moisseeva 2021).
    pub const MOISSEEVA_2021: Self = Self {
        m: 0.9195,
        b: 137.9193,
    };
}

impl Default for BiasFit {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Constants shared by every plume in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlumeConfig {
    /// Gravitational acceleration in m/s²
    pub g: f64,
    /// Analysis grid spacing in m
    pub dz: f64,
    /// Top of the analysis grid in m AGL
    pub zmax: f64,
    /// Fraction of the boundary layer height used as the reference height
    pub bl_frac: f64,
    /// Bias correction for the injection height
    pub bias_fit: BiasFit,
    /// Limits for the numerical solve
    pub solver: SolverSettings,
}

impl Default for PlumeConfig {
    fn default() -> Self {
        Self {
            g: 9.81,
            dz: 20.,
            zmax: 10000.,
            bl_frac: 0.75,
            bias_fit: BiasFit::IDENTITY,
            solver: SolverSettings::default(),
        }
    }
}

impl PlumeConfig {
    /// Build a configuration with the default gravity and solver settings.
    pub fn new(dz: f64, zmax: f64, bl_frac: f64, bias_fit: BiasFit) -> Result<Self, PlumeError> {
        let config = Self {
            dz,
            zmax,
            bl_frac,
            bias_fit,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration. Missing keys take their default values.
    pub fn from_json(json: &str) -> Result<Self, PlumeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings describe a usable analysis grid.
    pub fn validate(&self) -> Result<(), PlumeError> {
        let finite = [
            self.g,
            self.dz,
            self.zmax,
            self.bl_frac,
            self.bias_fit.m,
            self.bias_fit.b,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(PlumeError::InvalidConfig(
                "configuration values must be finite".into(),
            ));
        }
        if self.g <= 0. {
            return Err(PlumeError::InvalidConfig("g must be positive".into()));
        }
        if self.dz <= 0. || self.zmax < self.dz {
            return Err(PlumeError::InvalidConfig(format!(
                "need 0 < dz <= zmax, got dz = {}, zmax = {}",
                self.dz, self.zmax
            )));
        }
        // zs < zi only holds for a fraction strictly inside (0, 1)
        if !(self.bl_frac > 0. && self.bl_frac < 1.) {
            return Err(PlumeError::InvalidConfig(format!(
                "BLfrac must be in (0, 1), got {}",
                self.bl_frac
            )));
        }
        self.solver.validate()
    }

    /// Number of levels in the analysis grid, `0..=zmax` in steps of `dz`.
    pub fn num_levels(&self) -> usize {
        (self.zmax / self.dz).floor() as usize + 1
    }
}

/// How the cross-wind intensity is derived for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IntensityMethod {
    /// Empirical surface heat flux from vent temperature and wind
    HeatTransfer,
    /// Kinematic mass flux from a measured emission rate
    MassFlux,
}

impl IntensityMethod {
    /// Tag used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntensityMethod::HeatTransfer => "hc",
            IntensityMethod::MassFlux => "mass",
        }
    }
}

impl FromStr for IntensityMethod {
    type Err = PlumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hc" | "heat_transfer" | "heat-transfer" => Ok(IntensityMethod::HeatTransfer),
            "mass" | "mass_flux" | "mass-flux" => Ok(IntensityMethod::MassFlux),
            _ => Err(PlumeError::UnknownIntensityMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for IntensityMethod {
    type Error = PlumeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IntensityMethod> for String {
    fn from(method: IntensityMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Which plume-rise model places a source's emissions vertically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlumeRiseModel {
    /// Single-level area source at a fixed height
    StaticArea,
    /// Dynamic injection height and vertical profile
    Cwipp,
}

impl PlumeRiseModel {
    /// Tag used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlumeRiseModel::StaticArea => "static_area",
            PlumeRiseModel::Cwipp => "cwipp",
        }
    }
}

impl FromStr for PlumeRiseModel {
    type Err = PlumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static_area" | "static-area" => Ok(PlumeRiseModel::StaticArea),
            "cwipp" => Ok(PlumeRiseModel::Cwipp),
            _ => Err(PlumeError::UnknownPlumeRiseModel(s.to_string())),
        }
    }
}

impl TryFrom<String> for PlumeRiseModel {
    type Error = PlumeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PlumeRiseModel> for String {
    fn from(model: PlumeRiseModel) -> Self {
        model.as_str().to_string()
    }
}

/// Mass fractions of the main gases in the plume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasComposition {
    /// Water vapor
    #[serde(rename = "H2O")]
    pub h2o: f64,
    /// Carbon dioxide
    #[serde(rename = "CO2")]
    pub co2: f64,
    /// Sulfur dioxide, the species whose emission rate is measured
    #[serde(rename = "SO2")]
    pub so2: f64,
}

impl Default for GasComposition {
    /// Typical composition for the Kilauea summit.
    fn default() -> Self {
        Self {
            h2o: 0.88,
            co2: 0.02,
            so2: 0.1,
        }
    }
}

impl GasComposition {
    /// Check that the fractions are usable by the mass-flux method.
    pub fn validate(&self) -> Result<(), PlumeError> {
        let fractions = [self.h2o, self.co2, self.so2];
        if fractions.iter().any(|f| !f.is_finite() || *f < 0.) {
            return Err(PlumeError::InvalidConfig(
                "gas fractions must be non-negative".into(),
            ));
        }
        if self.so2 <= 0. {
            return Err(PlumeError::InvalidConfig(
                "SO2 gas fraction must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Options for a single emission source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source tag, e.g. `src1`
    pub tag: String,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Plume-rise model for this source
    pub pr_model: PlumeRiseModel,
    /// Intensity method, required by the dynamic model
    #[serde(default)]
    pub method: Option<IntensityMethod>,
    /// Release height in m AGL, required by the static-area model
    #[serde(default)]
    pub height: Option<f64>,
    /// Plume composition override for the mass-flux method
    #[serde(default)]
    pub gas_fractions: Option<GasComposition>,
}

impl SourceConfig {
    /// Check that the options needed by the selected model are present.
    pub fn validate(&self) -> Result<(), PlumeError> {
        if !(self.lat.is_finite() && self.lon.is_finite()) {
            return Err(PlumeError::InvalidConfig(format!(
                "{}: location must be finite",
                self.tag
            )));
        }
        match self.pr_model {
            PlumeRiseModel::StaticArea => match self.height {
                Some(h) if h.is_finite() && h >= 0. => {}
                _ => {
                    return Err(PlumeError::InvalidConfig(format!(
                        "{}: static_area needs a non-negative release height",
                        self.tag
                    )))
                }
            },
            PlumeRiseModel::Cwipp => {
                if self.method.is_none() {
                    return Err(PlumeError::InvalidConfig(format!(
                        "{}: cwipp needs an intensity method",
                        self.tag
                    )));
                }
            }
        }
        if let Some(gas) = &self.gas_fractions {
            gas.validate()?;
        }
        Ok(())
    }

    /// The plume composition, falling back to the default.
    pub fn composition(&self) -> GasComposition {
        self.gas_fractions.unwrap_or_default()
    }
}

/// Settings for a whole forecast run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Plume-rise constants
    #[serde(default)]
    pub plume: PlumeConfig,
    /// Emission sources
    pub sources: Vec<SourceConfig>,
    /// First forecast hour that is emitted (model spin-up is skipped)
    #[serde(default)]
    pub spinup: usize,
    /// Total forecast length in hours
    pub run_hours: usize,
}

impl RunConfig {
    /// Parse and validate a JSON run configuration.
    pub fn from_json(json: &str) -> Result<Self, PlumeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every part of the configuration.
    pub fn validate(&self) -> Result<(), PlumeError> {
        self.plume.validate()?;
        if self.sources.is_empty() {
            return Err(PlumeError::InvalidConfig("no sources configured".into()));
        }
        if self.spinup >= self.run_hours {
            return Err(PlumeError::InvalidConfig(format!(
                "spin-up ({}) must be shorter than the run ({} h)",
                self.spinup, self.run_hours
            )));
        }
        let mut tags = HashSet::new();
        for source in &self.sources {
            if !tags.insert(source.tag.as_str()) {
                return Err(PlumeError::InvalidConfig(format!(
                    "duplicate source tag {}",
                    source.tag
                )));
            }
            source.validate()?;
        }
        Ok(())
    }

    /// Forecast hour indices that produce emissions.
    pub fn forecast_hours(&self) -> Range<usize> {
        self.spinup..self.run_hours
    }
}

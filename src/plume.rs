//! Plume-rise engine for buoyant volcanic emissions
//!
//! For each source and forecast hour, a meteorological sounding and the
//! source's cross-wind intensity give the equilibrium injection height, a
//! classification (trapped in the boundary layer or penetrating above it),
//! and a normalized vertical profile split into a few emission layers for
//! the dispersion model.
//!
//! Every case is independent, so a batch is a parallel map over cases.

mod injection;
mod intensity;
mod profile;
mod records;
mod solver;
mod sounding;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use self::injection::{Classified, Plume, PlumeRise, SolveOutcome, Solved, SoundingLoaded};
pub use self::intensity::{estimate, heat_transfer, mass_flux, NearVentMet, VentState};
pub use self::profile::{
    discretize, gaussian_profile, layer_heights, EmissionLayers, Spread, MIN_SPREAD, NUM_LAYERS,
};
pub use self::records::{
    control_lines, hourly_records, mg_per_hour, write_emitimes, EmissionRecord, SourceEmission,
    Timestamp,
};
pub use self::solver::{BrentSolver, RootFinder, RootSolution, SolverSettings};
pub use self::sounding::{InterpolatedSounding, SoundingColumn};
use crate::{
    config::{PlumeConfig, PlumeRiseModel, RunConfig, SourceConfig},
    error::PlumeError,
};

/// Meteorology and intensity for one source and hour, as written by the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyInput {
    /// Boundary layer height in m
    #[serde(rename = "PBLH")]
    pub zi: f64,
    /// Heights of the native levels in m AGL
    #[serde(rename = "Z")]
    pub height: Vec<f64>,
    /// Potential temperature on the native levels in K
    #[serde(rename = "T")]
    pub theta: Vec<f64>,
    /// Wind speed on the native levels in m/s
    #[serde(rename = "U", alias = "WSPD")]
    pub wind: Vec<f64>,
    /// Cross-wind intensity in K m²/s
    #[serde(rename = "I")]
    pub intensity: f64,
}

/// Meteorology for one source and hour, before the intensity is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyMet {
    /// Boundary layer height in m
    #[serde(rename = "PBLH")]
    pub zi: f64,
    /// Heights of the native levels in m AGL
    #[serde(rename = "Z")]
    pub height: Vec<f64>,
    /// Potential temperature on the native levels in K
    #[serde(rename = "T")]
    pub theta: Vec<f64>,
    /// Wind speed on the native levels in m/s
    #[serde(rename = "U", alias = "WSPD")]
    pub wind: Vec<f64>,
    /// 10 m wind speed in m/s
    #[serde(rename = "U10")]
    pub wind_10m: f64,
}

impl HourlyMet {
    /// Complete the hour with its cross-wind intensity.
    pub fn with_intensity(self, intensity: f64) -> HourlyInput {
        HourlyInput {
            zi: self.zi,
            height: self.height,
            theta: self.theta,
            wind: self.wind,
            intensity,
        }
    }
}

/// Vent observations for one source and hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VentHour {
    /// Vent surface temperature in °C
    pub temperature: f64,
    /// Vent area in m²
    pub area: f64,
    /// SO₂ emission rate in tonnes/day, needed by the mass-flux method
    #[serde(default, rename = "so2")]
    pub so2_tonnes_per_day: Option<f64>,
}

/// Everything known about one source at one forecast hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHour {
    /// Forecast time, `YYYYMMDDHH`
    pub timestamp: String,
    /// Meteorology at the source
    pub met: HourlyMet,
    /// Vent state
    pub vent: VentHour,
}

/// One source and hour to compute.
#[derive(Debug, Clone, PartialEq)]
pub struct PlumeCase {
    /// Source tag
    pub tag: String,
    /// Forecast time, `YYYYMMDDHH`
    pub timestamp: String,
    /// Meteorology and intensity
    pub input: HourlyInput,
}

/// Read cases from JSON nested as `{tag: {timestamp: input}}`.
///
/// Cases come back ordered by tag, then by timestamp.
pub fn cases_from_json(json: &str) -> Result<Vec<PlumeCase>, PlumeError> {
    let nested: BTreeMap<String, BTreeMap<String, HourlyInput>> = serde_json::from_str(json)?;

    let mut cases = Vec::new();
    for (tag, hours) in nested {
        for (timestamp, input) in hours {
            timestamp.parse::<Timestamp>()?;
            cases.push(PlumeCase {
                tag: tag.clone(),
                timestamp,
                input,
            });
        }
    }
    Ok(cases)
}

/// Read per-source hourly series nested as `{tag: [hour, ...]}`, one entry
/// per forecast hour starting at hour 0.
pub fn source_hours_from_json(json: &str) -> Result<BTreeMap<String, Vec<SourceHour>>, PlumeError> {
    Ok(serde_json::from_str(json)?)
}

/// Cross-wind intensity of a source for one hour, by the source's method.
///
/// The mass-flux method scales by the vent's excess over the lowest level
/// of the sounding.
pub fn source_intensity(
    source: &SourceConfig,
    met: &HourlyMet,
    vent: &VentHour,
) -> Result<f64, PlumeError> {
    let method = source.method.ok_or_else(|| {
        PlumeError::InvalidConfig(format!("{}: cwipp needs an intensity method", source.tag))
    })?;
    let surface_theta = *met.theta.first().ok_or(PlumeError::TooFewLevels(0))?;
    let near_vent = NearVentMet {
        wind_10m: met.wind_10m,
        surface_theta,
    };
    let state = VentState {
        temperature: vent.temperature,
        area: vent.area,
    };
    estimate(
        method,
        &state,
        &near_vent,
        vent.so2_tonnes_per_day,
        &source.composition(),
    )
}

/// Build the plume-rise cases of a run.
///
/// Every `cwipp` source gets one case per forecast hour after spin-up, with
/// the intensity computed from that hour's vent and meteorology. Static
/// sources need no plume rise and are skipped.
pub fn prepare_cases(
    run: &RunConfig,
    hours: &BTreeMap<String, Vec<SourceHour>>,
) -> Result<Vec<PlumeCase>, PlumeError> {
    run.validate()?;

    let mut cases = Vec::new();
    for source in &run.sources {
        if source.pr_model != PlumeRiseModel::Cwipp {
            continue;
        }
        let series = hours.get(&source.tag).ok_or_else(|| {
            PlumeError::InvalidConfig(format!("{}: no hourly inputs", source.tag))
        })?;
        let window = series.get(run.forecast_hours()).ok_or_else(|| {
            PlumeError::InvalidConfig(format!(
                "{}: {} hourly inputs for a {} h run",
                source.tag,
                series.len(),
                run.run_hours
            ))
        })?;

        for hour in window {
            hour.timestamp.parse::<Timestamp>()?;
            let intensity = source_intensity(source, &hour.met, &hour.vent)?;
            info!(
                "{} {}: intensity {intensity:.1} K m2/s",
                source.tag, hour.timestamp
            );
            cases.push(PlumeCase {
                tag: source.tag.clone(),
                timestamp: hour.timestamp.clone(),
                input: hour.met.clone().with_intensity(intensity),
            });
        }
    }
    debug!("prepared {} plume-rise cases", cases.len());
    Ok(cases)
}

/// Run the dynamic plume-rise model for one case.
pub fn run_case(
    case: &PlumeCase,
    config: &PlumeConfig,
    finder: &dyn RootFinder,
) -> Result<PlumeRise, PlumeError> {
    let HourlyInput {
        zi,
        height,
        theta,
        wind,
        intensity,
    } = &case.input;

    let column = SoundingColumn::new(height.clone(), theta.clone(), wind.clone())?;
    let rise = Plume::new(case.tag.as_str(), case.timestamp.as_str(), *config)
        .load_sounding(&column, *zi)?
        .solve(*intensity, finder)?
        .classify()
        .synthesize();
    Ok(rise)
}

/// Run every case in parallel.
///
/// Results are in the same order as `cases`. A failing case is logged and
/// returned as an error without affecting the others.
pub fn run_batch(cases: &[PlumeCase], config: &PlumeConfig) -> Vec<Result<PlumeRise, PlumeError>> {
    let finder = BrentSolver::new(config.solver);
    info!("Computing plume rise for {} cases", cases.len());

    let results: Vec<_> = cases
        .par_iter()
        .map(|case| {
            let result = run_case(case, config, &finder);
            if let Err(e) = &result {
                warn!("{} {}: {e}", case.tag, case.timestamp);
            }
            result
        })
        .collect();

    let num_failed = results.iter().filter(|r| r.is_err()).count();
    debug!("{num_failed} of {} cases failed", cases.len());
    results
}

/// Emission layers for a source with the model it is configured for.
///
/// The static-area model releases everything at the configured height; the
/// dynamic model needs the plume rise for the hour.
pub fn emission_layers(
    source: &SourceConfig,
    rise: Option<&PlumeRise>,
) -> Result<EmissionLayers, PlumeError> {
    match source.pr_model {
        PlumeRiseModel::StaticArea => source
            .height
            .map(EmissionLayers::single)
            .ok_or_else(|| PlumeError::InvalidConfig(format!("{}: no release height", source.tag))),
        PlumeRiseModel::Cwipp => rise
            .map(|r| r.layers().clone())
            .ok_or(PlumeError::InvalidInput("cwipp layers need a plume rise")),
    }
}

/// Nest plume-rise results as `{tag: {timestamp: result}}` JSON.
pub fn outputs_to_json(rises: &[PlumeRise]) -> Result<String, PlumeError> {
    let mut nested: BTreeMap<&str, BTreeMap<&str, &PlumeRise>> = BTreeMap::new();
    for rise in rises {
        nested
            .entry(rise.tag())
            .or_default()
            .insert(rise.timestamp(), rise);
    }
    Ok(serde_json::to_string(&nested)?)
}

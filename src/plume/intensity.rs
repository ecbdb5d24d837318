//! Cross-wind intensity of a vent.
//!
//! Both methods return the intensity parameter `I` in K m²/s used by the
//! injection height solver. A cold or inactive vent may give `I <= 0`; that
//! is handled by the solver, not rejected here.

use std::f64::consts::PI;

use log::debug;

use crate::{
    config::{GasComposition, IntensityMethod},
    error::PlumeError,
};

/// Volumetric heat capacity of air, `rho * cp`, in J/m³/K
const RHO_CP: f64 = 1.2 * 1005.;

/// Power-law fit of vent heat flux, `H = a T^b U^c` (Keszthelyi et al.,
/// 2003), fitted to 1, 5 and 10 m/s wind speeds.
const HEAT_FLUX_FIT: [f64; 3] = [8.52891637, 1.00889672, 0.50909336];

/// Gas densities in kg/m³
const RHO_H2O: f64 = 0.8;
const RHO_CO2: f64 = 1.84;
const RHO_SO2: f64 = 2.28;

/// Conditions at the vent for one hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VentState {
    /// Vent surface temperature in °C
    pub temperature: f64,
    /// Vent area in m²
    pub area: f64,
}

impl VentState {
    fn validate(&self) -> Result<(), PlumeError> {
        if !self.temperature.is_finite() {
            return Err(PlumeError::NonFinite("vent temperature"));
        }
        if !(self.area.is_finite() && self.area > 0.) {
            return Err(PlumeError::InvalidInput("vent area must be positive"));
        }
        Ok(())
    }

    /// Diameter of a circle with the vent's area, in m.
    pub fn effective_diameter(&self) -> f64 {
        2. * (self.area / PI).sqrt()
    }
}

/// Near-vent meteorology used by the intensity methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearVentMet {
    /// 10 m wind speed in m/s
    pub wind_10m: f64,
    /// Potential temperature of the lowest model level in K
    pub surface_theta: f64,
}

/// Intensity from the empirical vent heat flux.
///
/// The fit is only defined for non-negative temperatures and wind speeds;
/// below freezing the vent gives no heat flux.
pub fn heat_transfer(vent: &VentState, wind_10m: f64) -> Result<f64, PlumeError> {
    vent.validate()?;
    if !wind_10m.is_finite() {
        return Err(PlumeError::NonFinite("near-vent wind speed"));
    }

    let [a, b, c] = HEAT_FLUX_FIT;
    let heat_flux = a * vent.temperature.max(0.).powf(b) * wind_10m.max(0.).powf(c);
    debug!("vent heat flux is {heat_flux:.1} W/m2");

    Ok(heat_flux * vent.effective_diameter() / RHO_CP)
}

/// Intensity from a measured SO₂ emission rate in tonnes/day.
///
/// The total plume mass flux is inferred from the SO₂ flux and the assumed
/// gas composition, then scaled by the temperature excess of the vent over
/// the lowest model level.
pub fn mass_flux(
    vent: &VentState,
    surface_theta: f64,
    so2_tonnes_per_day: f64,
    composition: &GasComposition,
) -> Result<f64, PlumeError> {
    vent.validate()?;
    if !(surface_theta.is_finite() && so2_tonnes_per_day.is_finite()) {
        return Err(PlumeError::NonFinite("mass-flux intensity inputs"));
    }
    if composition.so2 <= 0. {
        return Err(PlumeError::InvalidInput("SO2 gas fraction must be positive"));
    }

    let mean_rho =
        composition.h2o * RHO_H2O + composition.co2 * RHO_CO2 + composition.so2 * RHO_SO2;

    let so2_kg_per_sec = so2_tonnes_per_day * 1000. / (24. * 60. * 60.);
    let total_mass = (mean_rho / RHO_SO2) * so2_kg_per_sec / composition.so2;
    let kinematic_flux = total_mass / (mean_rho * vent.area);
    let cross_wind_flux = kinematic_flux * vent.effective_diameter();

    Ok(cross_wind_flux * (vent.temperature + 273. - surface_theta))
}

/// Intensity with the method selected for a source.
///
/// The mass-flux method needs an emission rate; the heat-transfer method
/// ignores it.
pub fn estimate(
    method: IntensityMethod,
    vent: &VentState,
    met: &NearVentMet,
    so2_tonnes_per_day: Option<f64>,
    composition: &GasComposition,
) -> Result<f64, PlumeError> {
    match method {
        IntensityMethod::HeatTransfer => heat_transfer(vent, met.wind_10m),
        IntensityMethod::MassFlux => {
            let rate = so2_tonnes_per_day.ok_or(PlumeError::InvalidInput(
                "mass-flux intensity needs an emission rate",
            ))?;
            mass_flux(vent, met.surface_theta, rate, composition)
        }
    }
}

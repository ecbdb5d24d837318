//! Plume rise for volcanic emission sources
//!
//! Given a vertical meteorological sounding and a source's cross-wind
//! intensity, this finds the equilibrium injection height of the plume,
//! whether it punches through the boundary layer top, and a normalized
//! vertical profile split into the emission layers consumed by the HYSPLIT
//! dispersion model.
//!
//! NOTE: with the `python` feature, the `python` module is the interface
//! between Rust and Python. The real work happens in the other modules, and
//! they do not use `pyo3`.

pub mod config;
pub mod error;
pub mod plume;

#[cfg(feature = "python")]
mod python;

pub use config::{
    BiasFit, GasComposition, IntensityMethod, PlumeConfig, PlumeRiseModel, RunConfig, SourceConfig,
};
pub use error::PlumeError;
pub use plume::{prepare_cases, run_batch, run_case, PlumeCase, PlumeRise, SourceHour};

//! Python interface
//!
//! NOTE: this is the only module that uses `pyo3`. The plume-rise work
//! happens in [`crate::plume`].

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use numpy::prelude::*;
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::{
    config::{BiasFit, GasComposition, PlumeConfig},
    error::PlumeError,
    plume::{self, BrentSolver, Plume, SoundingColumn, VentState, NUM_LAYERS},
};

impl From<PlumeError> for PyErr {
    fn from(e: PlumeError) -> Self {
        PyValueError::new_err(e.to_string())
    }
}

/// Plume rise for a batch of soundings.
///
/// Per-case arrays are dimensioned as (`num_cases`, ...). Cases that failed
/// have `ok == False` and NaN everywhere else.
#[pyclass]
struct PlumeProfiles {
    zi: Array1<f64>,
    zcl: Array1<f64>,
    penetrative: Array1<bool>,
    ok: Array1<bool>,
    layer_heights: Array2<f64>,
    layer_fractions: Array2<f64>,
    profile: Array2<f64>,
    heights: Array1<f64>,
}

#[pymethods]
impl PlumeProfiles {
    #[getter]
    fn zi<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.zi.to_pyarray(py)
    }

    #[getter]
    fn zcl<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.zcl.to_pyarray(py)
    }

    #[getter]
    fn penetrative<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<bool>> {
        self.penetrative.to_pyarray(py)
    }

    #[getter]
    fn ok<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<bool>> {
        self.ok.to_pyarray(py)
    }

    /// Layer heights in m, shape (`num_cases`, 5)
    #[getter]
    fn layer_heights<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.layer_heights.to_pyarray(py)
    }

    /// Layer mass fractions, shape (`num_cases`, 5)
    #[getter]
    fn layer_fractions<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.layer_fractions.to_pyarray(py)
    }

    /// Normalized profile on the analysis grid, shape (`num_cases`, `num_grid`)
    #[getter]
    fn profile<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.profile.to_pyarray(py)
    }

    /// Analysis grid heights in m
    #[getter]
    fn heights<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.heights.to_pyarray(py)
    }
}

impl PlumeProfiles {
    fn new(zi: &[f64], config: &PlumeConfig) -> Self {
        let num_cases = zi.len();
        let num_grid = config.num_levels();
        Self {
            zi: Array1::from_vec(zi.to_vec()),
            zcl: Array1::from_elem(num_cases, f64::NAN),
            penetrative: Array1::from_elem(num_cases, false),
            ok: Array1::from_elem(num_cases, false),
            layer_heights: Array2::from_elem([num_cases, NUM_LAYERS], f64::NAN),
            layer_fractions: Array2::from_elem([num_cases, NUM_LAYERS], f64::NAN),
            profile: Array2::from_elem([num_cases, num_grid], f64::NAN),
            heights: Array1::from_iter((0..num_grid).map(|i| i as f64 * config.dz)),
        }
    }
}

/// Compute the plume rise for a batch of soundings.
///
/// `zi`: boundary layer height in m, shape (`num_cases`, )
///
/// `intensity`: cross-wind intensity in K m²/s, shape (`num_cases`, )
///
/// The following are soundings on the host model levels and have shape
/// (`num_cases`, `num_levels`):
///
/// `height`: height above ground level in m
///
/// `theta`: potential temperature in K
///
/// `wind`: wind speed in m/s
///
/// `dz` and `zmax` set the analysis grid, `bl_frac` the reference height as a
/// fraction of `zi`, and `bias_fit` an optional `(m, b)` linear correction
/// of the injection height.
///
/// The number of worker threads is controlled by `num_threads`. It must be a
/// positive integer, or `None` to automatically choose the number of threads.
#[pyfunction]
#[pyo3(signature = (zi, height, theta, wind, intensity, dz=20., zmax=10000., bl_frac=0.75, bias_fit=None, num_threads=None))]
#[allow(clippy::too_many_arguments)]
fn compute_plumerise(
    py: Python<'_>,
    zi: PyReadonlyArray1<'_, f64>,
    height: PyReadonlyArray2<'_, f64>,
    theta: PyReadonlyArray2<'_, f64>,
    wind: PyReadonlyArray2<'_, f64>,
    intensity: PyReadonlyArray1<'_, f64>,
    dz: f64,
    zmax: f64,
    bl_frac: f64,
    bias_fit: Option<(f64, f64)>,
    num_threads: Option<usize>,
) -> PyResult<PlumeProfiles> {
    let num_cases = zi.len();
    let num_levels = height.dims()[1];

    // Check shapes of all inputs
    {
        let two_dims = &[height.dims(), theta.dims(), wind.dims()];
        if two_dims.iter().any(|d| d != &[num_cases, num_levels]) {
            return Err(PlumeError::InconsistentInputs.into());
        }
        if intensity.len() != num_cases {
            return Err(PlumeError::InconsistentInputs.into());
        }
    }
    debug!("input shapes are consistent");

    let bias_fit = bias_fit.map_or(BiasFit::IDENTITY, |(m, b)| BiasFit { m, b });
    let config = PlumeConfig::new(dz, zmax, bl_frac, bias_fit)?;
    let finder = BrentSolver::new(config.solver);

    let zi = zi.as_slice()?;
    let intensity = intensity.as_slice()?;
    let height = height.as_array();
    let theta = theta.as_array();
    let wind = wind.as_array();

    let mut results = Vec::new();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.unwrap_or(0))
        .build()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let num_completed = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);

    info!("Computing plume rise for {num_cases} soundings with {num_levels} levels");

    pool.in_place_scope(|s| -> Result<(), PyErr> {
        s.spawn(|_| {
            (0..num_cases)
                .into_par_iter()
                .map(|case| -> Result<_, PlumeError> {
                    if cancelled.load(Ordering::Relaxed) {
                        return Err(PlumeError::Cancelled);
                    }

                    let column = SoundingColumn::new(
                        row(&height, case)?,
                        row(&theta, case)?,
                        row(&wind, case)?,
                    )?;
                    let rise = Plume::new(case.to_string(), "", config)
                        .load_sounding(&column, zi[case])?
                        .solve(intensity[case], &finder)?
                        .classify()
                        .synthesize();
                    Ok(rise)
                })
                .inspect(|_| {
                    num_completed.fetch_add(1, Ordering::Relaxed);
                })
                .collect_into_vec(&mut results);
        });

        while !cancelled.load(Ordering::Relaxed) {
            if let Err(e) = py.check_signals() {
                cancelled.store(true, Ordering::Relaxed);
                return Err(e);
            }

            let num_completed = num_completed.load(Ordering::Relaxed);
            let progress = num_completed as f32 / num_cases.max(1) as f32 * 100.;
            info!("Completed plume rise for {num_completed}/{num_cases} soundings ({progress:0.2}%)");

            if num_completed == num_cases {
                break;
            }

            py.allow_threads(|| {
                std::thread::sleep(Duration::from_secs(5));
            });
        }

        Ok(())
    })?;

    debug!("copying plume rise output");
    let mut output = PlumeProfiles::new(zi, &config);
    for (index, result) in results.into_iter().enumerate() {
        let rise = match result {
            Ok(rise) => rise,
            Err(e) => {
                warn!("sounding {index}: {e}");
                continue;
            }
        };

        output.zcl[index] = rise.zcl();
        output.penetrative[index] = rise.penetrative();
        output.ok[index] = true;

        let rhs = ArrayView1::from(rise.layers().heights.as_slice());
        output.layer_heights.index_axis_mut(Axis(0), index).assign(&rhs);

        let rhs = ArrayView1::from(rise.layers().fractions.as_slice());
        output.layer_fractions.index_axis_mut(Axis(0), index).assign(&rhs);

        let rhs = ArrayView1::from(rise.profile());
        output.profile.index_axis_mut(Axis(0), index).assign(&rhs);
    }

    Ok(output)
}

/// One sounding from a (`num_cases`, `num_levels`) array.
fn row(array: &ArrayView2<'_, f64>, case: usize) -> Result<Vec<f64>, PlumeError> {
    Ok(array
        .index_axis(Axis(0), case)
        .as_slice()
        .ok_or(PlumeError::NotContiguous)?
        .to_vec())
}

/// Intensity in K m²/s from the vent temperature in °C, the vent area in m²,
/// and the 10 m wind speed in m/s.
#[pyfunction]
fn intensity_heat_transfer(temperature: f64, area: f64, wind_10m: f64) -> PyResult<f64> {
    let vent = VentState { temperature, area };
    Ok(plume::heat_transfer(&vent, wind_10m)?)
}

/// Intensity in K m²/s from the vent temperature in °C, the vent area in m²,
/// the lowest-level potential temperature in K, and the SO₂ emission rate in
/// tonnes/day. `gas_fractions` optionally overrides the (H₂O, CO₂, SO₂) mass
/// fractions of the plume.
#[pyfunction]
#[pyo3(signature = (temperature, area, surface_theta, so2_tonnes_per_day, gas_fractions=None))]
fn intensity_mass_flux(
    temperature: f64,
    area: f64,
    surface_theta: f64,
    so2_tonnes_per_day: f64,
    gas_fractions: Option<(f64, f64, f64)>,
) -> PyResult<f64> {
    let composition = match gas_fractions {
        Some((h2o, co2, so2)) => {
            let composition = GasComposition { h2o, co2, so2 };
            composition.validate()?;
            composition
        }
        None => GasComposition::default(),
    };
    let vent = VentState { temperature, area };
    Ok(plume::mass_flux(
        &vent,
        surface_theta,
        so2_tonnes_per_day,
        &composition,
    )?)
}

/// A Python module implemented in Rust.
#[pymodule]
fn vog_plumerise(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();

    m.add_function(wrap_pyfunction!(compute_plumerise, m)?)?;
    m.add_function(wrap_pyfunction!(intensity_heat_transfer, m)?)?;
    m.add_function(wrap_pyfunction!(intensity_mass_flux, m)?)?;
    m.add_class::<PlumeProfiles>()?;
    Ok(())
}

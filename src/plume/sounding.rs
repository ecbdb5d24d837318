//! Host-model soundings and their resampling onto the analysis grid.

use ndarray::Array1;

use crate::{config::PlumeConfig, error::PlumeError};

/// A vertical profile on the host model's native levels.
///
/// The levels are not uniformly spaced and may be few. Once built, a column
/// has been checked to have at least two levels, matching lengths, finite
/// values, and strictly increasing heights.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundingColumn {
    /// Height above ground level in m.
    height: Vec<f64>,
    /// Potential temperature in K.
    theta: Vec<f64>,
    /// Horizontal wind speed in m/s.
    wind: Vec<f64>,
}

impl SoundingColumn {
    /// Check and wrap the level data.
    pub fn new(height: Vec<f64>, theta: Vec<f64>, wind: Vec<f64>) -> Result<Self, PlumeError> {
        if height.len() != theta.len() || height.len() != wind.len() {
            return Err(PlumeError::InconsistentInputs);
        }
        if height.len() < 2 {
            return Err(PlumeError::TooFewLevels(height.len()));
        }
        if !height.iter().all(|v| v.is_finite()) {
            return Err(PlumeError::NonFinite("sounding height"));
        }
        if !theta.iter().all(|v| v.is_finite()) {
            return Err(PlumeError::NonFinite("sounding potential temperature"));
        }
        if !wind.iter().all(|v| v.is_finite()) {
            return Err(PlumeError::NonFinite("sounding wind speed"));
        }
        if height.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PlumeError::NonMonotonicHeights);
        }

        Ok(Self {
            height,
            theta,
            wind,
        })
    }

    /// Number of native levels.
    pub fn len(&self) -> usize {
        self.height.len()
    }

    /// Always false: a valid column has at least two levels.
    pub fn is_empty(&self) -> bool {
        self.height.is_empty()
    }

    /// Heights in m AGL.
    pub fn height(&self) -> &[f64] {
        &self.height
    }

    /// Potential temperature in K.
    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    /// Wind speed in m/s.
    pub fn wind(&self) -> &[f64] {
        &self.wind
    }
}

/// Sounding values on the uniform grid `[0, dz, 2dz, ..., zmax]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedSounding {
    dz: f64,
    height: Array1<f64>,
    theta: Array1<f64>,
    wind: Array1<f64>,
}

impl InterpolatedSounding {
    /// Resample `column` onto the analysis grid described by `config`.
    pub fn new(column: &SoundingColumn, config: &PlumeConfig) -> Self {
        let height = analysis_grid(config);
        let theta = height.mapv(|z| interp_extrapolate(&column.height, &column.theta, z));
        let wind = height.mapv(|z| interp_extrapolate(&column.height, &column.wind, z));

        Self {
            dz: config.dz,
            height,
            theta,
            wind,
        }
    }

    /// Number of grid levels.
    pub fn len(&self) -> usize {
        self.height.len()
    }

    /// Always false: the grid includes at least the surface and `zmax`.
    pub fn is_empty(&self) -> bool {
        self.height.is_empty()
    }

    /// Grid heights in m AGL.
    pub fn height(&self) -> &Array1<f64> {
        &self.height
    }

    /// Potential temperature on the grid in K.
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Wind speed on the grid in m/s.
    pub fn wind(&self) -> &Array1<f64> {
        &self.wind
    }

    /// Index of the grid level nearest `z`, clamped to the grid.
    pub fn nearest_index(&self, z: f64) -> usize {
        nearest_level(z, self.dz, self.len())
    }

    /// Potential temperature at the grid level nearest `z`.
    pub fn theta_at(&self, z: f64) -> f64 {
        self.theta[self.nearest_index(z)]
    }

    /// Mean wind speed over the grid levels below `zi`.
    ///
    /// If `zi` rounds to the surface level, the surface wind is used.
    pub fn mean_wind_below(&self, zi: f64) -> f64 {
        let i_zi = self.nearest_index(zi);
        if i_zi == 0 {
            return self.wind[0];
        }
        self.wind.slice(ndarray::s![..i_zi]).mean().unwrap_or(self.wind[0])
    }
}

/// Heights of the analysis grid.
pub(crate) fn analysis_grid(config: &PlumeConfig) -> Array1<f64> {
    Array1::from_iter((0..config.num_levels()).map(|i| i as f64 * config.dz))
}

/// Index of the level nearest `z` on a grid of `len` levels spaced by `dz`.
pub(crate) fn nearest_level(z: f64, dz: f64, len: usize) -> usize {
    // NaN and negative heights both land on the surface
    let index = (z / dz).round().max(0.) as usize;
    index.min(len.saturating_sub(1))
}

/// Linear interpolation of `y(x)` at `xi`, extrapolating linearly from the
/// two outermost points beyond either end.
///
/// `x` must be strictly increasing with at least two points.
pub(crate) fn interp_extrapolate(x: &[f64], y: &[f64], xi: f64) -> f64 {
    let n = x.len();
    let i = match x.partition_point(|&v| v <= xi) {
        0 => 0,
        p if p >= n => n - 2,
        p => p - 1,
    };
    let (x0, x1, y0, y1) = (x[i], x[i + 1], y[i], y[i + 1]);
    y0 + (y1 - y0) * (xi - x0) / (x1 - x0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn column() -> SoundingColumn {
        SoundingColumn::new(
            vec![10., 110., 510.],
            vec![300., 301., 305.],
            vec![2., 4., 8.],
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_columns() {
        assert_eq!(
            SoundingColumn::new(vec![10.], vec![300.], vec![1.]),
            Err(PlumeError::TooFewLevels(1))
        );
        assert_eq!(
            SoundingColumn::new(vec![10., 20.], vec![300.], vec![1., 2.]),
            Err(PlumeError::InconsistentInputs)
        );
        assert_eq!(
            SoundingColumn::new(vec![10., 20.], vec![300., f64::NAN], vec![1., 2.]),
            Err(PlumeError::NonFinite("sounding potential temperature"))
        );
        assert_eq!(
            SoundingColumn::new(vec![20., 20.], vec![300., 301.], vec![1., 2.]),
            Err(PlumeError::NonMonotonicHeights)
        );
    }

    #[test]
    fn interpolates_and_extrapolates() {
        let col = column();
        let (x, y) = (col.height(), col.theta());
        // inside
        assert_relative_eq!(interp_extrapolate(x, y, 60.), 300.5, epsilon = 1e-9);
        assert_relative_eq!(interp_extrapolate(x, y, 310.), 303., epsilon = 1e-9);
        // at a node
        assert_relative_eq!(interp_extrapolate(x, y, 110.), 301., epsilon = 1e-9);
        // below the first level, using the first segment
        assert_relative_eq!(interp_extrapolate(x, y, 0.), 299.9, epsilon = 1e-9);
        // above the last level, using the last segment
        assert_relative_eq!(interp_extrapolate(x, y, 910.), 309., epsilon = 1e-9);
    }

    #[test]
    fn resamples_onto_grid() {
        let config = PlumeConfig {
            dz: 100.,
            zmax: 1000.,
            ..PlumeConfig::default()
        };
        let snd = InterpolatedSounding::new(&column(), &config);
        assert_eq!(snd.len(), 11);
        assert_relative_eq!(snd.height()[10], 1000., epsilon = 1e-9);
        assert_relative_eq!(snd.theta()[0], 299.9, epsilon = 1e-9);
        assert_relative_eq!(snd.theta()[10], 309.9, epsilon = 1e-9);
        assert_relative_eq!(snd.wind()[1], 3.8, epsilon = 1e-9);

        assert_eq!(snd.nearest_index(149.), 1);
        assert_eq!(snd.nearest_index(151.), 2);
        assert_eq!(snd.nearest_index(-30.), 0);
        assert_eq!(snd.nearest_index(1e6), 10);
        assert_relative_eq!(snd.theta_at(290.), snd.theta()[3], epsilon = 1e-9);
    }

    #[test]
    fn boundary_layer_wind() {
        let config = PlumeConfig {
            dz: 100.,
            zmax: 1000.,
            ..PlumeConfig::default()
        };
        let snd = InterpolatedSounding::new(&column(), &config);
        // levels 0, 100 and 200 m
        let expected = (snd.wind()[0] + snd.wind()[1] + snd.wind()[2]) / 3.;
        assert_relative_eq!(snd.mean_wind_below(300.), expected, epsilon = 1e-9);
        assert_relative_eq!(snd.mean_wind_below(20.), snd.wind()[0], epsilon = 1e-9);
    }
}

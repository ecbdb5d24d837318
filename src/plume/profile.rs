//! Vertical smoke profile and emission layers.

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::sounding::nearest_level;
use crate::config::PlumeConfig;

/// Surface kinematic buoyancy flux used for the Deardorff velocity, in K m/s.
const SURFACE_FLUX_PROXY: f64 = 0.13;

/// Smallest Gaussian spread, in m.
pub const MIN_SPREAD: f64 = 1.;

/// Number of layers handed to the dispersion model.
pub const NUM_LAYERS: usize = 5;

/// Spread of the profile around the injection height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    /// Deardorff convective velocity scale in m/s
    pub w_deardorff: f64,
    /// Ratio of boundary layer wind to plume velocity
    pub wind_ratio: f64,
    /// Spread above the injection height in m
    pub sigma_top: f64,
    /// Spread below the injection height in m
    pub sigma_bottom: f64,
    /// Whether `sigma_top` was raised to [`MIN_SPREAD`]
    pub clamped: bool,
}

impl Spread {
    /// Spread for a plume injected at `zcl`.
    ///
    /// Strong boundary layer wind relative to the plume velocity stretches
    /// the profile downward; it is never narrower below than above. With no
    /// plume velocity at all (`wf = 0`) the lower spread is capped at `zmax`,
    /// which is nearly uniform below the injection height.
    pub fn new(
        config: &PlumeConfig,
        zi: f64,
        zs: f64,
        zcl: f64,
        ths: f64,
        ubl: f64,
        wf: f64,
    ) -> Self {
        let w_deardorff = (config.g * zi * SURFACE_FLUX_PROXY / ths).cbrt();

        let raw_top = (zcl - zs) / 3.;
        let (sigma_top, clamped) = if raw_top > MIN_SPREAD {
            (raw_top, false)
        } else {
            (MIN_SPREAD, true)
        };

        let wind_ratio = if wf / w_deardorff < 1.5 {
            ubl / wf
        } else {
            ubl / (wf - w_deardorff)
        };

        let sigma_bottom = if wind_ratio > 1. {
            (wind_ratio * sigma_top).min(config.zmax.max(sigma_top))
        } else {
            sigma_top
        };

        Self {
            w_deardorff,
            wind_ratio,
            sigma_top,
            sigma_bottom,
            clamped,
        }
    }
}

/// Two-sided Gaussian centred at `zcl`, normalized to sum to 1 over
/// `heights`.
///
/// If the Gaussian underflows everywhere on the grid (injection height far
/// outside it), all the mass goes to the level nearest `zcl`.
pub fn gaussian_profile(heights: &Array1<f64>, zcl: f64, spread: &Spread) -> Array1<f64> {
    let mut profile = heights.mapv(|z| {
        let sigma = if z >= zcl {
            spread.sigma_top
        } else {
            spread.sigma_bottom
        };
        (-0.5 * ((z - zcl) / sigma).powi(2)).exp()
    });

    let total = profile.sum();
    if total > 0. && total.is_finite() {
        profile /= total;
    } else {
        profile.fill(0.);
        if !profile.is_empty() {
            let dz = if heights.len() > 1 {
                heights[1] - heights[0]
            } else {
                1.
            };
            profile[nearest_level(zcl, dz, heights.len())] = 1.;
        }
    }
    profile
}

/// Representative heights of the emission layers: quarters of the injection
/// height, plus one spread above it.
pub fn layer_heights(zcl: f64, sigma_top: f64) -> [f64; NUM_LAYERS] {
    [
        zcl / 4.,
        zcl / 2.,
        3. * zcl / 4.,
        zcl,
        zcl + sigma_top,
    ]
}

/// Sum the profile mass into one band per layer height.
///
/// Band edges are the grid levels nearest the midpoints between consecutive
/// heights; the first band starts at the surface and the last runs to the
/// top of the grid, so the bands cover the whole profile exactly once.
pub fn discretize(profile: &Array1<f64>, dz: f64, heights: &[f64]) -> SmallVec<[f64; 8]> {
    if heights.is_empty() {
        return SmallVec::new();
    }
    let len = profile.len();

    let mut edges: SmallVec<[usize; 9]> = SmallVec::new();
    edges.push(0);
    for pair in heights.windows(2) {
        let edge = nearest_level(0.5 * (pair[0] + pair[1]), dz, len);
        // out-of-order heights give an empty band, not overlapping ones
        let last = edges[edges.len() - 1];
        edges.push(edge.max(last));
    }
    edges.push(len);

    edges
        .windows(2)
        .map(|band| profile.slice(s![band[0]..band[1]]).sum())
        .collect()
}

/// Heights and mass fractions of the emission layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionLayers {
    /// Layer heights in m AGL
    pub heights: SmallVec<[f64; 8]>,
    /// Fraction of the emitted mass in each layer
    pub fractions: SmallVec<[f64; 8]>,
}

impl EmissionLayers {
    /// Five layers from a synthesized profile.
    pub fn from_profile(profile: &Array1<f64>, dz: f64, zcl: f64, sigma_top: f64) -> Self {
        let heights = layer_heights(zcl, sigma_top);
        Self {
            fractions: discretize(profile, dz, &heights),
            heights: SmallVec::from_slice(&heights),
        }
    }

    /// Everything in one layer at `height`.
    pub fn single(height: f64) -> Self {
        Self {
            heights: SmallVec::from_slice(&[height]),
            fractions: SmallVec::from_slice(&[1.]),
        }
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.heights.len()
    }

    /// True if there are no layers.
    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    /// `(height, fraction)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.heights.iter().copied().zip(self.fractions.iter().copied())
    }
}

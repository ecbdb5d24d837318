//! Equilibrium injection height and plume classification.
//!
//! A plume for one source and hour moves through
//! [`Plume`] → [`SoundingLoaded`] → [`Solved`] → [`Classified`] →
//! [`PlumeRise`]. Each step consumes the previous state, so the steps can
//! only run in order and the final record can't be modified.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{
    profile::{gaussian_profile, EmissionLayers, Spread},
    solver::RootFinder,
    sounding::{InterpolatedSounding, SoundingColumn},
};
use crate::{config::PlumeConfig, error::PlumeError};

/// Below this boundary layer height (m) the layer is treated as stable
/// (nighttime) and the solve starts from a fixed guess.
const STABLE_BL_HEIGHT: f64 = 400.;

/// Starting guess for the solve under a stable boundary layer, in m.
const STABLE_BL_GUESS: f64 = 1000.;

/// How the injection height was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SolveOutcome {
    /// The iterative solve met the residual tolerance
    Converged {
        /// Iterations used by the root finder
        iterations: usize,
    },
    /// The residual changes sign across a jump in the sounding, so the
    /// injection height is the jump and the relation only holds to within
    /// `residual`
    Bracketed {
        /// Iterations used by the root finder
        iterations: usize,
        /// `zCL - RHS(zCL)` in m
        residual: f64,
    },
    /// The iterative solve failed; the injection height is the BL top
    NotConverged,
    /// Non-positive intensity; the injection height is the BL top
    Inactive,
    /// Closed-form solution
    Explicit,
}

/// Buoyancy scaling for one plume.
#[derive(Debug, Clone, Copy)]
struct Scaling {
    g: f64,
    ths: f64,
    zs: f64,
    zi: f64,
    intensity: f64,
}

impl Scaling {
    /// Characteristic timescale `Tau` in s. It is infinite where the layer
    /// between `zs` and `z` is not stably stratified.
    fn tau(&self, th_z: f64, z: f64) -> f64 {
        let n2 = self.g * (th_z - self.ths) / (self.ths * (z - self.zs));
        if n2 > 0. {
            1. / n2.sqrt()
        } else {
            f64::INFINITY
        }
    }

    /// Characteristic fire velocity `wf` in m/s.
    fn wf(&self, z: f64) -> f64 {
        (self.g * self.intensity * (z - self.zs) / (self.ths * self.zi))
            .max(0.)
            .cbrt()
    }
}

/// A plume with only its identity and run configuration.
#[derive(Debug, Clone)]
pub struct Plume {
    tag: String,
    timestamp: String,
    config: PlumeConfig,
}

impl Plume {
    /// Start a plume for source `tag` at `timestamp` (`YYYYMMDDHH`).
    pub fn new(tag: impl Into<String>, timestamp: impl Into<String>, config: PlumeConfig) -> Self {
        Self {
            tag: tag.into(),
            timestamp: timestamp.into(),
            config,
        }
    }

    /// Resample the sounding and set the reference height.
    pub fn load_sounding(
        self,
        column: &SoundingColumn,
        zi: f64,
    ) -> Result<SoundingLoaded, PlumeError> {
        self.config.validate()?;
        if !zi.is_finite() {
            return Err(PlumeError::NonFinite("boundary layer height"));
        }
        if zi <= 0. {
            return Err(PlumeError::InvalidInput(
                "boundary layer height must be positive",
            ));
        }

        let zs = zi * self.config.bl_frac;
        let sounding = InterpolatedSounding::new(column, &self.config);
        let ths = sounding.theta_at(zs);

        Ok(SoundingLoaded {
            plume: self,
            zi,
            zs,
            ths,
            sounding,
        })
    }
}

/// A plume with its sounding on the analysis grid.
#[derive(Debug, Clone)]
pub struct SoundingLoaded {
    plume: Plume,
    zi: f64,
    zs: f64,
    ths: f64,
    sounding: InterpolatedSounding,
}

impl SoundingLoaded {
    /// Boundary layer height in m.
    pub fn zi(&self) -> f64 {
        self.zi
    }

    /// Reference height in m.
    pub fn zs(&self) -> f64 {
        self.zs
    }

    /// Potential temperature at the reference height in K.
    pub fn ths(&self) -> f64 {
        self.ths
    }

    /// The resampled sounding.
    pub fn sounding(&self) -> &InterpolatedSounding {
        &self.sounding
    }

    fn scaling(&self, intensity: f64) -> Scaling {
        Scaling {
            g: self.plume.config.g,
            ths: self.ths,
            zs: self.zs,
            zi: self.zi,
            intensity,
        }
    }

    /// `z - RHS(z)` of the equilibrium relation. Where the plume would still
    /// be rising (at or below `zs`, or with no stable layer above `zs`) this
    /// is `-inf`.
    fn residual(&self, scaling: &Scaling, z: f64) -> f64 {
        if !(z > self.zs) {
            return f64::NEG_INFINITY;
        }
        let th_z = self.sounding.theta_at(z);
        let rise = scaling.tau(th_z, z) * scaling.wf(z);
        let bias = self.plume.config.bias_fit;
        z - (bias.b + bias.m * (self.zs + rise))
    }

    /// Solve `zCL = b + m (zs + Tau(zCL) wf(zCL))` iteratively.
    ///
    /// Non-positive intensity or a failed solve both put the injection
    /// height at the boundary layer top; neither is an error. The
    /// nearest-level potential temperature makes the residual piecewise, so
    /// the root may be a sign change rather than a zero; that height is kept
    /// and flagged [`SolveOutcome::Bracketed`].
    pub fn solve(self, intensity: f64, finder: &dyn RootFinder) -> Result<Solved, PlumeError> {
        if !intensity.is_finite() {
            return Err(PlumeError::NonFinite("intensity"));
        }
        if intensity <= 0. {
            return Ok(self.inactive(intensity));
        }

        let scaling = self.scaling(intensity);
        let z0 = if self.zi < STABLE_BL_HEIGHT {
            STABLE_BL_GUESS
        } else {
            self.zi
        };
        let solution = finder.solve(&|z: f64| self.residual(&scaling, z), z0);

        let usable = solution.bracketed
            && solution.root.is_finite()
            && solution.residual.is_finite();
        if usable && solution.converged {
            debug!(
                "{} {}: injection height {:.1} m after {} iterations",
                self.plume.tag, self.plume.timestamp, solution.root, solution.iterations
            );
            let outcome = SolveOutcome::Converged {
                iterations: solution.iterations,
            };
            Ok(self.finish(intensity, solution.root, outcome))
        } else if usable {
            warn!(
                "{} {}: injection height {:.1} m is a sign change with residual {:.1} m",
                self.plume.tag, self.plume.timestamp, solution.root, solution.residual
            );
            let outcome = SolveOutcome::Bracketed {
                iterations: solution.iterations,
                residual: solution.residual,
            };
            Ok(self.finish(intensity, solution.root, outcome))
        } else {
            warn!(
                "{} {}: injection height failed to converge after {} iterations, setting to BL top",
                self.plume.tag, self.plume.timestamp, solution.iterations
            );
            let zi = self.zi;
            Ok(self.finish(intensity, zi, SolveOutcome::NotConverged))
        }
    }

    /// Closed-form injection height for a free troposphere with lapse rate
    /// `gamma` (K/m of potential temperature) starting at height `ze` (m).
    pub fn solve_explicit(
        self,
        intensity: f64,
        gamma: f64,
        ze: f64,
    ) -> Result<Solved, PlumeError> {
        if !(intensity.is_finite() && gamma.is_finite() && ze.is_finite()) {
            return Err(PlumeError::NonFinite("explicit solution inputs"));
        }
        if gamma <= 0. {
            return Err(PlumeError::InvalidInput(
                "explicit solution needs a stable lapse rate",
            ));
        }
        if intensity <= 0. {
            return Ok(self.inactive(intensity));
        }

        let g = self.plume.config.g;
        let bias = self.plume.config.bias_fit;
        let rise = (self.ths / g).powf(0.25) * (intensity / self.zi).sqrt() * gamma.powf(-0.75);
        let mut zcl = bias.m * (rise + ze) + bias.b;
        if zcl < 0. {
            warn!(
                "{} {}: negative explicit injection height {zcl:.1} m, setting to surface",
                self.plume.tag, self.plume.timestamp
            );
            zcl = 0.;
        }
        Ok(self.finish(intensity, zcl, SolveOutcome::Explicit))
    }

    fn inactive(self, intensity: f64) -> Solved {
        warn!(
            "{} {}: null/negative intensity ({intensity}), setting injection height to BL top",
            self.plume.tag, self.plume.timestamp
        );
        let zi = self.zi;
        self.finish(intensity, zi, SolveOutcome::Inactive)
    }

    fn finish(self, intensity: f64, zcl: f64, outcome: SolveOutcome) -> Solved {
        if zcl <= self.zs {
            warn!(
                "{} {}: injection height {zcl:.1} m is not above the reference height {:.1} m",
                self.plume.tag, self.plume.timestamp, self.zs
            );
        }

        let scaling = self.scaling(intensity);
        let th_zcl = self.sounding.theta_at(zcl);
        let tau = scaling.tau(th_zcl, zcl);
        let wf = if intensity > 0. { scaling.wf(zcl) } else { 0. };

        Solved {
            loaded: self,
            intensity,
            zcl,
            th_zcl,
            tau,
            wf,
            outcome,
        }
    }
}

/// A plume with its injection height.
#[derive(Debug, Clone)]
pub struct Solved {
    loaded: SoundingLoaded,
    intensity: f64,
    zcl: f64,
    th_zcl: f64,
    tau: f64,
    wf: f64,
    outcome: SolveOutcome,
}

impl Solved {
    /// Injection height in m.
    pub fn zcl(&self) -> f64 {
        self.zcl
    }

    /// Potential temperature at the injection height in K.
    pub fn th_zcl(&self) -> f64 {
        self.th_zcl
    }

    /// Characteristic timescale at the injection height in s.
    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Characteristic fire velocity at the injection height in m/s.
    pub fn wf(&self) -> f64 {
        self.wf
    }

    /// How the injection height was obtained.
    pub fn outcome(&self) -> SolveOutcome {
        self.outcome
    }

    /// Penetrative if the injection height is above the boundary layer top
    /// by at least half a grid step.
    pub fn classify(self) -> Classified {
        let dz = self.loaded.plume.config.dz;
        let penetrative = self.zcl >= self.loaded.zi + dz / 2.;
        Classified {
            solved: self,
            penetrative,
        }
    }
}

/// A solved and classified plume.
#[derive(Debug, Clone)]
pub struct Classified {
    solved: Solved,
    penetrative: bool,
}

impl Classified {
    /// Whether the plume punches through the boundary layer top.
    pub fn penetrative(&self) -> bool {
        self.penetrative
    }

    /// Injection height in m.
    pub fn zcl(&self) -> f64 {
        self.solved.zcl
    }

    /// Average the boundary layer wind and build the vertical profile.
    ///
    /// The profile shape does not depend on the classification.
    pub fn synthesize(self) -> PlumeRise {
        let Classified {
            solved,
            penetrative,
        } = self;
        let Solved {
            loaded,
            intensity,
            zcl,
            th_zcl,
            tau,
            wf,
            outcome,
        } = solved;
        let SoundingLoaded {
            plume,
            zi,
            zs,
            ths,
            sounding,
        } = loaded;
        let config = plume.config;

        let ubl = sounding.mean_wind_below(zi);
        let spread = Spread::new(&config, zi, zs, zcl, ths, ubl, wf);
        if spread.clamped {
            warn!(
                "{} {}: degenerate plume spread (zCL = {zcl:.1} m, zs = {zs:.1} m), using the minimum",
                plume.tag, plume.timestamp
            );
        }

        let profile = gaussian_profile(sounding.height(), zcl, &spread);
        let layers = EmissionLayers::from_profile(&profile, config.dz, zcl, spread.sigma_top);

        PlumeRise {
            tag: plume.tag,
            timestamp: plume.timestamp,
            zi,
            zs,
            ths,
            intensity,
            zcl,
            th_zcl,
            tau,
            wf,
            ubl,
            penetrative,
            outcome,
            spread,
            dz: config.dz,
            profile: profile.to_vec(),
            layers,
        }
    }
}

/// Plume rise for one source and hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlumeRise {
    tag: String,
    timestamp: String,
    zi: f64,
    zs: f64,
    ths: f64,
    intensity: f64,
    zcl: f64,
    th_zcl: f64,
    tau: f64,
    wf: f64,
    ubl: f64,
    penetrative: bool,
    outcome: SolveOutcome,
    spread: Spread,
    dz: f64,
    profile: Vec<f64>,
    layers: EmissionLayers,
}

impl PlumeRise {
    /// Source tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Forecast time, `YYYYMMDDHH`.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Boundary layer height in m.
    pub fn zi(&self) -> f64 {
        self.zi
    }

    /// Reference height in m.
    pub fn zs(&self) -> f64 {
        self.zs
    }

    /// Potential temperature at the reference height in K.
    pub fn ths(&self) -> f64 {
        self.ths
    }

    /// Cross-wind intensity in K m²/s.
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    /// Injection height in m.
    pub fn zcl(&self) -> f64 {
        self.zcl
    }

    /// Potential temperature at the injection height in K.
    pub fn th_zcl(&self) -> f64 {
        self.th_zcl
    }

    /// Characteristic timescale in s.
    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Characteristic fire velocity in m/s.
    pub fn wf(&self) -> f64 {
        self.wf
    }

    /// Mean boundary layer wind in m/s.
    pub fn ubl(&self) -> f64 {
        self.ubl
    }

    /// Whether the plume penetrates the boundary layer top.
    pub fn penetrative(&self) -> bool {
        self.penetrative
    }

    /// How the injection height was obtained.
    pub fn outcome(&self) -> SolveOutcome {
        self.outcome
    }

    /// Profile spread parameters.
    pub fn spread(&self) -> Spread {
        self.spread
    }

    /// Analysis grid spacing in m.
    pub fn dz(&self) -> f64 {
        self.dz
    }

    /// Normalized concentration on the analysis grid, summing to 1.
    pub fn profile(&self) -> &[f64] {
        &self.profile
    }

    /// Emission layers for the dispersion model.
    pub fn layers(&self) -> &EmissionLayers {
        &self.layers
    }

    /// Heights of the analysis grid the profile is defined on.
    pub fn heights(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.profile.len()).map(|i| i as f64 * self.dz)
    }
}

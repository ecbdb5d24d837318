//! One-dimensional root finding.
//!
//! The injection height solver only needs `solve(residual, guess)`, so any
//! method can sit behind [`RootFinder`]. What to do when a solve fails is up
//! to the caller.
//!
//! A root is only `converged` when the residual tolerance is met. A bracket
//! that shrinks onto a sign change without meeting it (a jump in a
//! piecewise function) is reported as `bracketed` instead.

use serde::{Deserialize, Serialize};

use crate::error::PlumeError;

/// Result of a root search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootSolution {
    /// Best estimate of the root
    pub root: f64,
    /// Residual at `root`
    pub residual: f64,
    /// Whether `|residual| <= ftol`
    pub converged: bool,
    /// Whether a sign change was narrowed to within `xtol`, converged or not
    pub bracketed: bool,
    /// Iterations used, bracket search included
    pub iterations: usize,
}

/// A method for finding a zero of a scalar function.
pub trait RootFinder {
    /// Find `x` with `residual(x) == 0`, starting near `initial_guess`.
    ///
    /// The residual may return `±inf`; only its sign is used there.
    fn solve(&self, residual: &dyn Fn(f64) -> f64, initial_guess: f64) -> RootSolution;
}

impl RootSolution {
    fn failed(root: f64, residual: f64, iterations: usize) -> Self {
        Self {
            root,
            residual,
            converged: false,
            bracketed: false,
            iterations,
        }
    }
}

/// Tolerances and limits for [`BrentSolver`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Iteration budget shared by the bracket search and the refinement
    pub max_iterations: usize,
    /// First bracket step as a fraction of `max(|x0|, 1)`
    pub step_factor: f64,
    /// Bracket width at which the search stops
    pub xtol: f64,
    /// Residual magnitude at which the root is accepted
    pub ftol: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            step_factor: 0.1,
            xtol: 1e-6,
            ftol: 1e-3,
        }
    }
}

impl SolverSettings {
    pub(crate) fn validate(&self) -> Result<(), PlumeError> {
        if self.max_iterations == 0 {
            return Err(PlumeError::InvalidConfig(
                "solver needs at least one iteration".into(),
            ));
        }
        let positive = [self.step_factor, self.xtol, self.ftol]
            .iter()
            .all(|v| v.is_finite() && *v > 0.);
        if !positive {
            return Err(PlumeError::InvalidConfig(
                "solver tolerances must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Geometric bracket search outward from the guess, refined with Brent's
/// method.
///
/// Brent's interpolation steps need finite end values, so the refinement
/// bisects while either end of the bracket is infinite.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrentSolver {
    settings: SolverSettings,
}

/// Growth of the bracket step on each search iteration
const BRACKET_GROWTH: f64 = 1.6;

impl BrentSolver {
    /// Build a solver from its settings.
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    /// Search outward from `x0` for a sign change, nearest first. Returns the
    /// bracket as `(a, f(a), b, f(b))`.
    fn bracket(
        &self,
        residual: &dyn Fn(f64) -> f64,
        x0: f64,
        f0: f64,
        iterations: &mut usize,
    ) -> Option<(f64, f64, f64, f64)> {
        let mut step = self.settings.step_factor * x0.abs().max(1.);
        let (mut hi, mut f_hi) = (x0, f0);
        let (mut lo, mut f_lo) = (x0, f0);

        while *iterations < self.settings.max_iterations {
            *iterations += 1;

            let x = x0 + step;
            let fx = residual(x);
            if opposite_signs(f_hi, fx) {
                return Some((hi, f_hi, x, fx));
            }
            (hi, f_hi) = (x, fx);

            let x = x0 - step;
            let fx = residual(x);
            if opposite_signs(fx, f_lo) {
                return Some((x, fx, lo, f_lo));
            }
            (lo, f_lo) = (x, fx);

            step *= BRACKET_GROWTH;
        }
        None
    }

    /// Brent's method on a bracket with `f(a)` and `f(b)` of opposite sign.
    fn refine(
        &self,
        residual: &dyn Fn(f64) -> f64,
        (mut a, mut fa, mut b, mut fb): (f64, f64, f64, f64),
        iterations: &mut usize,
    ) -> RootSolution {
        let SolverSettings { xtol, ftol, .. } = self.settings;

        // b is always the best estimate so far
        if fa.abs() < fb.abs() {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }
        let (mut c, mut fc) = (a, fa);
        let mut d = c;
        let mut bisected = true;

        loop {
            let narrowed = (b - a).abs() <= xtol;
            if fb.abs() <= ftol || narrowed || *iterations >= self.settings.max_iterations {
                return RootSolution {
                    root: b,
                    residual: fb,
                    converged: fb.abs() <= ftol,
                    bracketed: fb.abs() <= ftol || narrowed,
                    iterations: *iterations,
                };
            }
            *iterations += 1;

            let midpoint = 0.5 * (a + b);
            let all_finite = fa.is_finite() && fb.is_finite() && fc.is_finite();
            let mut s = if all_finite && fa != fc && fb != fc {
                // inverse quadratic interpolation
                a * fb * fc / ((fa - fb) * (fa - fc))
                    + b * fa * fc / ((fb - fa) * (fb - fc))
                    + c * fa * fb / ((fc - fa) * (fc - fb))
            } else if fa.is_finite() && fb.is_finite() && fa != fb {
                // secant
                b - fb * (b - a) / (fb - fa)
            } else {
                midpoint
            };

            let quarter = 0.25 * (3. * a + b);
            let outside = !(s > quarter.min(b) && s < quarter.max(b));
            let slow = if bisected {
                (s - b).abs() >= 0.5 * (b - c).abs() || (b - c).abs() < xtol
            } else {
                (s - b).abs() >= 0.5 * (c - d).abs() || (c - d).abs() < xtol
            };
            if !all_finite || !s.is_finite() || outside || slow {
                s = midpoint;
                bisected = true;
            } else {
                bisected = false;
            }

            let fs = residual(s);
            if fs.is_nan() {
                return RootSolution::failed(b, fb, *iterations);
            }

            d = c;
            (c, fc) = (b, fb);
            if opposite_signs(fa, fs) {
                (b, fb) = (s, fs);
            } else {
                (a, fa) = (s, fs);
            }
            if fa.abs() < fb.abs() {
                std::mem::swap(&mut a, &mut b);
                std::mem::swap(&mut fa, &mut fb);
            }
        }
    }
}

impl RootFinder for BrentSolver {
    fn solve(&self, residual: &dyn Fn(f64) -> f64, initial_guess: f64) -> RootSolution {
        let mut iterations = 0;
        let f0 = residual(initial_guess);
        if f0.is_nan() {
            return RootSolution::failed(initial_guess, f0, iterations);
        }
        if f0.abs() <= self.settings.ftol {
            return RootSolution {
                root: initial_guess,
                residual: f0,
                converged: true,
                bracketed: true,
                iterations,
            };
        }

        match self.bracket(residual, initial_guess, f0, &mut iterations) {
            Some(bracket) => self.refine(residual, bracket, &mut iterations),
            None => RootSolution::failed(initial_guess, f0, iterations),
        }
    }
}

/// True if both values are numbers on opposite sides of zero.
fn opposite_signs(a: f64, b: f64) -> bool {
    !a.is_nan() && !b.is_nan() && (a < 0.) != (b < 0.)
}

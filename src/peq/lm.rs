// Levenberg-Marquardt fit of a peaking-band cascade.
//
// Parameters live in log space, three per band: [gain_db, log10(Q), log10(fc)].
// Every stage is a pure function over slices so each can be tested on its own:
//   error_vector -> jacobian -> normal_equations -> solve_linear -> fit_peq

use serde::Serialize;
use tracing::{debug, info};

use crate::correction::BiquadCoeffs;

use super::{FilterType, PeqBand, GAIN_LIMIT_DB, Q_MAX, Q_MIN};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const PARAMS_PER_BAND: usize = 3;

const MACHINE_EPS: f64 = 2.22e-16;
const MIN_PIVOT: f64 = 1e-12;
const MIN_DAMPING_DIAG: f64 = 1e-6;
const ZERO_STEP: f64 = 1e-15;

const LAMBDA_INIT: f64 = 0.001;
const LAMBDA_DECREASE: f64 = 0.25;
const LAMBDA_INCREASE: f64 = 4.0;
const LAMBDA_MIN: f64 = 1e-9;
const LAMBDA_MAX: f64 = 1e10;
const SOLVE_ATTEMPTS: usize = 5;
const MAX_ITERATIONS: usize = 100;

const COST_EPS: f64 = 1e-7;
const GRAD_EPS: f64 = 1e-9;
const PARAM_EPS: f64 = 1e-7;

/// Fallbacks when a fitted parameter comes back non-finite
const FALLBACK_GAIN: f64 = 0.0;
const FALLBACK_LOG_Q: f64 = 0.0;
const FALLBACK_LOG_FC: f64 = 3.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    #[error("matrix is singular at column {column} (pivot {pivot:e})")]
    Singular { column: usize, pivot: f64 },

    #[error("non-finite solution element {index}")]
    NonFinite { index: usize },

    #[error("zero step despite gradient norm {grad_norm:e}")]
    ZeroStep { grad_norm: f64 },

    #[error("invalid optimizer input: {message}")]
    InvalidInput { message: String },
}

/// Per-parameter box constraints, laid out like the parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl Bounds {
    /// Gain ±18 dB, Q in [0.5, 10], fc in [0.9·low_freq, 1.1·high_freq].
    pub fn for_bands(num_bands: usize, low_freq: f64, high_freq: f64) -> Self {
        let lo = [-GAIN_LIMIT_DB, Q_MIN.log10(), (low_freq * 0.9).log10()];
        let hi = [GAIN_LIMIT_DB, Q_MAX.log10(), (high_freq * 1.1).log10()];
        Self {
            low: lo.iter().copied().cycle().take(num_bands * PARAMS_PER_BAND).collect(),
            high: hi.iter().copied().cycle().take(num_bands * PARAMS_PER_BAND).collect(),
        }
    }

    pub fn clamp(&self, params: &[f64]) -> Vec<f64> {
        params
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .map(|(&p, (&lo, &hi))| p.max(lo).min(hi))
            .collect()
    }
}

/// The data being fitted.
#[derive(Debug, Clone, Copy)]
pub struct FitProblem<'a> {
    pub freq: &'a [f64],
    /// De-meaned response in dB; the fit drives target + correction to 0 dB.
    pub target_db: &'a [f64],
    pub low_freq: f64,
    pub high_freq: f64,
    pub sample_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    GradientConverged,
    CostConverged,
    StepConverged,
    MaxIterations,
    LambdaRunaway,
    SolveFailed,
}

#[derive(Debug, Clone)]
pub struct LmFit {
    /// Fitted bands, linear units, peaking.
    pub bands: Vec<PeqBand>,
    pub iterations: usize,
    pub cost: f64,
    pub stop: StopReason,
}

// ---------------------------------------------------------------------------
// Error function
// ---------------------------------------------------------------------------

/// Weighted linear-amplitude error at every frequency:
/// `w · (10^(target/20) · 10^(response/20) − 1)`, `w = 0` outside
/// `[low_freq, high_freq]`. Bands whose Q or fc is non-positive or
/// non-finite contribute nothing. Non-finite errors become 0.
pub fn error_vector(params: &[f64], problem: &FitProblem) -> Vec<f64> {
    let n = problem.freq.len();
    let mut combined_db = vec![0.0_f64; n];

    for band in params.chunks_exact(PARAMS_PER_BAND) {
        let gain = band[0];
        let q = 10.0_f64.powf(band[1]);
        let fc = 10.0_f64.powf(band[2]);
        if !(fc > 0.0) || !(q > 0.0) || !gain.is_finite() || !q.is_finite() || !fc.is_finite() {
            continue;
        }
        if let Some(coeffs) =
            BiquadCoeffs::design(FilterType::Peaking, fc, gain, q, problem.sample_rate)
        {
            for (acc, &f) in combined_db.iter_mut().zip(problem.freq) {
                *acc += coeffs.magnitude_db(f, problem.sample_rate);
            }
        }
    }

    problem
        .freq
        .iter()
        .zip(problem.target_db)
        .zip(&combined_db)
        .map(|((&f, &t), &r)| {
            if f < problem.low_freq || f > problem.high_freq {
                return 0.0;
            }
            let e = 10.0_f64.powf(t / 20.0) * 10.0_f64.powf(r / 20.0) - 1.0;
            if e.is_finite() {
                e
            } else {
                0.0
            }
        })
        .collect()
}

/// Mean squared error.
pub fn cost(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64
}

// ---------------------------------------------------------------------------
// Jacobian
// ---------------------------------------------------------------------------

/// Numerical Jacobian, one row per parameter: `J[i][k] = ∂e[k]/∂p[i]`.
///
/// Central differences with `h = √ε·max(1, |p|)`; one-sided differences
/// with a reduced step when a bound is within reach; zero when the
/// parameter is pinned or the step degenerates.
pub fn jacobian(params: &[f64], problem: &FitProblem, bounds: &Bounds) -> Vec<Vec<f64>> {
    let base = error_vector(params, problem);
    let num_freqs = base.len();
    let min_step = MACHINE_EPS * 100.0;
    let finite_or_zero = |d: f64| if d.is_finite() { d } else { 0.0 };

    params
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let (lo, hi) = (bounds.low[i], bounds.high[i]);
            let h = (MACHINE_EPS.sqrt() * p.abs().max(1.0)).max(min_step);
            let can_up = p + h <= hi;
            let can_down = p - h >= lo;

            let shifted = |delta: f64| {
                let mut moved = params.to_vec();
                moved[i] = p + delta;
                error_vector(&moved, problem)
            };

            match (can_up, can_down) {
                (true, true) => {
                    let plus = shifted(h);
                    let minus = shifted(-h);
                    plus.iter()
                        .zip(&minus)
                        .map(|(a, b)| finite_or_zero((a - b) / (2.0 * h)))
                        .collect()
                }
                (true, false) => {
                    let h = h.min((hi - p) * 0.5);
                    if h < min_step {
                        return vec![0.0; num_freqs];
                    }
                    shifted(h)
                        .iter()
                        .zip(&base)
                        .map(|(a, b)| finite_or_zero((a - b) / h))
                        .collect()
                }
                (false, true) => {
                    let h = h.min((p - lo) * 0.5);
                    if h < min_step {
                        return vec![0.0; num_freqs];
                    }
                    base.iter()
                        .zip(&shifted(-h))
                        .map(|(a, b)| finite_or_zero((a - b) / h))
                        .collect()
                }
                (false, false) => vec![0.0; num_freqs],
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Normal equations and linear solve
// ---------------------------------------------------------------------------

/// `(JᵀJ, Jᵀe)` with non-finite contributions treated as zero.
pub fn normal_equations(jac: &[Vec<f64>], errors: &[f64]) -> (Vec<Vec<f64>>, Vec<f64>) {
    let n = jac.len();
    let clean = |v: f64| if v.is_finite() { v } else { 0.0 };

    let mut jtj = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let sum: f64 = jac[i]
                .iter()
                .zip(&jac[j])
                .map(|(&a, &b)| clean(a) * clean(b))
                .sum();
            jtj[i][j] = clean(sum);
            jtj[j][i] = jtj[i][j];
        }
    }

    let jte = jac
        .iter()
        .map(|row| {
            clean(
                row.iter()
                    .zip(errors)
                    .map(|(&a, &e)| clean(a) * clean(e))
                    .sum(),
            )
        })
        .collect();

    (jtj, jte)
}

/// Solve `A·x = b` by Gaussian elimination with partial pivoting.
pub fn solve_linear(a: &[Vec<f64>], b: &[f64]) -> Result<Vec<f64>, SolveError> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(SolveError::InvalidInput {
            message: format!("expected {n}x{n} system"),
        });
    }

    let mut m: Vec<Vec<f64>> = a.to_vec();
    let mut x = b.to_vec();

    for col in 0..n {
        let mut pivot_row = col;
        for row in col + 1..n {
            if m[row][col].abs() > m[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        m.swap(col, pivot_row);
        x.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < MIN_PIVOT {
            return Err(SolveError::Singular { column: col, pivot });
        }

        for row in col + 1..n {
            let factor = m[row][col] / pivot;
            x[row] -= factor * x[col];
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            m[row][col] = 0.0;
        }
    }

    let mut solution = vec![0.0; n];
    for i in (0..n).rev() {
        let diag = m[i][i];
        if diag.abs() < MIN_PIVOT {
            return Err(SolveError::Singular { column: i, pivot: diag });
        }
        let sum: f64 = (i + 1..n).map(|j| m[i][j] * solution[j]).sum();
        solution[i] = (x[i] - sum) / diag;
        if !solution[i].is_finite() {
            return Err(SolveError::NonFinite { index: i });
        }
    }

    Ok(solution)
}

/// Solve the damped system `(JᵀJ + λ·diag) δ = −Jᵀe` where the diagonal
/// term is `max(|JᵀJ[i][i]|, 1e-6)`.
pub fn damped_step(
    jtj: &[Vec<f64>],
    jte: &[f64],
    lambda: f64,
    grad_norm: f64,
) -> Result<Vec<f64>, SolveError> {
    let augmented: Vec<Vec<f64>> = jtj
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut row = row.clone();
            row[i] += lambda * row[i].abs().max(MIN_DAMPING_DIAG);
            row
        })
        .collect();
    let rhs: Vec<f64> = jte.iter().map(|v| -v).collect();

    let delta = solve_linear(&augmented, &rhs)?;
    if let Some(index) = delta.iter().position(|v| !v.is_finite()) {
        return Err(SolveError::NonFinite { index });
    }
    if delta.iter().all(|v| v.abs() < ZERO_STEP) && grad_norm >= GRAD_EPS * 10.0 {
        return Err(SolveError::ZeroStep { grad_norm });
    }
    Ok(delta)
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// Log-space parameter vector of `bands`, clamped into `bounds`.
pub fn to_log_params(bands: &[PeqBand], bounds: &Bounds) -> Vec<f64> {
    let raw: Vec<f64> = bands
        .iter()
        .flat_map(|b| [b.gain, b.q.max(Q_MIN).min(Q_MAX).log10(), b.frequency.log10()])
        .collect();
    bounds.clamp(&raw)
}

/// Linear peaking bands from a log-space vector, substituting defaults for
/// non-finite entries.
pub fn from_log_params(params: &[f64]) -> Vec<PeqBand> {
    let or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
    params
        .chunks_exact(PARAMS_PER_BAND)
        .map(|p| PeqBand {
            frequency: 10.0_f64.powf(or(p[2], FALLBACK_LOG_FC)),
            gain: or(p[0], FALLBACK_GAIN),
            q: 10.0_f64.powf(or(p[1], FALLBACK_LOG_Q)),
            filter_type: FilterType::Peaking,
            enabled: true,
        })
        .collect()
}

/// Jointly refine `initial` against `problem` with Levenberg-Marquardt.
///
/// Singular or non-finite linear solves escalate λ (×8, up to five tries
/// per iteration). Rejected steps grow λ by 4, accepted ones shrink it by
/// 4. Stops on gradient, cost or step convergence, after 100 iterations,
/// or when λ exceeds 1e10.
pub fn fit_peq(initial: &[PeqBand], problem: &FitProblem) -> Result<LmFit, SolveError> {
    if initial.is_empty() {
        return Err(SolveError::InvalidInput {
            message: "no bands to fit".to_string(),
        });
    }
    if problem.freq.len() != problem.target_db.len() || problem.freq.is_empty() {
        return Err(SolveError::InvalidInput {
            message: format!(
                "freq/target length mismatch: {} vs {}",
                problem.freq.len(),
                problem.target_db.len()
            ),
        });
    }

    let bounds = Bounds::for_bands(initial.len(), problem.low_freq, problem.high_freq);
    let mut params = to_log_params(initial, &bounds);
    let mut errors = error_vector(&params, problem);
    let mut current_cost = cost(&errors);
    let mut lambda = LAMBDA_INIT;
    let mut stop = StopReason::MaxIterations;
    let mut iterations = 0;

    debug!(
        "fit_peq: {} bands, {} points, initial cost {:.6e}",
        initial.len(),
        problem.freq.len(),
        current_cost
    );

    for iter in 0..MAX_ITERATIONS {
        iterations = iter + 1;

        let jac = jacobian(&params, problem, &bounds);
        let (jtj, jte) = normal_equations(&jac, &errors);
        let grad_norm = jte.iter().map(|g| g * g).sum::<f64>().sqrt();
        if grad_norm < GRAD_EPS && iter > 0 {
            stop = StopReason::GradientConverged;
            break;
        }

        let mut attempt_lambda = lambda;
        let mut delta = None;
        for _ in 0..SOLVE_ATTEMPTS {
            match damped_step(&jtj, &jte, attempt_lambda, grad_norm) {
                Ok(d) => {
                    delta = Some(d);
                    break;
                }
                Err(e) => {
                    debug!("fit_peq: iteration {}: {}", iter, e);
                    attempt_lambda *= LAMBDA_INCREASE * 2.0;
                    if attempt_lambda > LAMBDA_MAX {
                        break;
                    }
                }
            }
        }

        let Some(delta) = delta else {
            stop = if attempt_lambda > LAMBDA_MAX {
                StopReason::LambdaRunaway
            } else {
                StopReason::SolveFailed
            };
            break;
        };
        lambda = attempt_lambda;

        let candidate: Vec<f64> = params.iter().zip(&delta).map(|(p, d)| p + d).collect();
        let candidate = bounds.clamp(&candidate);
        let candidate_errors = error_vector(&candidate, problem);
        let candidate_cost = cost(&candidate_errors);

        if candidate_cost < current_cost {
            let cost_change = current_cost - candidate_cost;
            let step_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();

            params = candidate;
            errors = candidate_errors;
            current_cost = candidate_cost;
            lambda = (lambda * LAMBDA_DECREASE).max(LAMBDA_MIN);

            if iter > 0 && cost_change < COST_EPS {
                stop = StopReason::CostConverged;
                break;
            }
            if iter > 0 && step_norm < PARAM_EPS {
                stop = StopReason::StepConverged;
                break;
            }
        } else {
            lambda *= LAMBDA_INCREASE;
            if lambda > LAMBDA_MAX {
                stop = StopReason::LambdaRunaway;
                break;
            }
        }
    }

    info!(
        "fit_peq: {:?} after {} iterations, cost {:.6e}",
        stop, iterations, current_cost
    );

    Ok(LmFit {
        bands: from_log_params(&params),
        iterations,
        cost: current_cost,
        stop,
    })
}

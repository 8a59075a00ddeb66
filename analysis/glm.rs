use crate::types::DesignMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use ndarray_linalg::{Inverse, Solve};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use thiserror::Error;

/// The status of the IRLS convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// Converged successfully within tolerance.
    Converged,
    /// Reached maximum iterations without converging.
    MaxIterationsReached,
    /// Fitted probabilities hit 0 or 1 (likely perfect separation), or X'WX
    /// became singular. Coefficients and standard errors are not trustworthy.
    Unstable,
}

/// Controls for the IRLS loop. Defaults follow R's `glm.control`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for GlmOptions {
    fn default() -> Self {
        GlmOptions {
            max_iterations: 25,
            tolerance: 1e-8,
        }
    }
}

/// One row of the coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSummary {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z_value: f64,
    /// Two-sided Wald p-value.
    pub p_value: f64,
}

/// A fitted logistic regression. `coefficients[0]` is the intercept, the rest
/// follow `feature_names`.
#[derive(Debug, Clone)]
pub struct LogisticFit {
    pub feature_names: Vec<String>,
    pub coefficients: Array1<f64>,
    pub summary: Vec<CoefficientSummary>,
    pub deviance: f64,
    pub null_deviance: f64,
    pub aic: f64,
    pub iterations: usize,
    pub status: FitStatus,
}

#[derive(Error, Debug)]
pub enum GlmError {
    #[error("A linear system solve failed. X'WX may be singular (collinear predictors?). Error: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),
    #[error("Logistic regression needs more rows ({rows}) than parameters ({params}).")]
    TooFewRows { rows: usize, params: usize },
    #[error("IRLS produced non-finite values at iteration {0}.")]
    NonFinite(usize),
    #[error("IRLS could not reduce the deviance after {0} step halvings.")]
    StepHalvingFailed(usize),
}

const MAX_STEP_HALVINGS: usize = 30;

impl LogisticFit {
    /// Probability of the event for each row of `x` (columns as in `feature_names`).
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let eta = x.dot(&self.coefficients.slice(s![1..])) + self.coefficients[0];
        inverse_logit(&eta)
    }
}

/// Fits `logit(P(y = 1)) = b0 + X b` by iteratively reweighted least squares.
pub fn fit_logistic(design: &DesignMatrix, options: &GlmOptions) -> Result<LogisticFit, GlmError> {
    let n = design.n_rows();
    let p = design.n_features() + 1;
    if n <= p {
        return Err(GlmError::TooFewRows { rows: n, params: p });
    }

    let x = with_intercept(design.x.view());
    let y = design.y.view();

    // Start from mu = (y + 0.5) / 2, as glm's binomial family does.
    let mut mu = y.mapv(|v| (v + 0.5) / 2.0);
    let mut eta = mu.mapv(|m| (m / (1.0 - m)).ln());
    let mut beta = Array1::<f64>::zeros(p);
    let mut deviance = f64::INFINITY;
    let mut status = FitStatus::MaxIterationsReached;
    let mut iterations = 0;

    for iter in 1..=options.max_iterations {
        iterations = iter;
        let (weights, z) = working_vectors(y, &eta, &mu);
        let solved = solve_weighted(&x, &weights, &z).and_then(|b| {
            if b.iter().all(|v| v.is_finite()) {
                Ok(b)
            } else {
                Err(GlmError::NonFinite(iter))
            }
        });
        // After the first step there is a usable estimate to report.
        let beta_full = match solved {
            Ok(b) => b,
            Err(e) if iter > 1 => {
                log::warn!("IRLS stopped at iteration {iter}, keeping the previous estimate: {e}");
                status = FitStatus::Unstable;
                break;
            }
            Err(e) => return Err(e),
        };

        let mut beta_trial = beta_full;
        let mut eta_trial = x.dot(&beta_trial);
        let mut mu_trial = inverse_logit(&eta_trial);
        let mut deviance_trial = binomial_deviance(y, &mu_trial);

        let mut halvings = 0;
        while (!deviance_trial.is_finite() || (iter > 1 && deviance_trial > deviance))
            && halvings < MAX_STEP_HALVINGS
        {
            beta_trial = &beta + 0.5 * (&beta_trial - &beta);
            eta_trial = x.dot(&beta_trial);
            mu_trial = inverse_logit(&eta_trial);
            deviance_trial = binomial_deviance(y, &mu_trial);
            halvings += 1;
        }
        if !deviance_trial.is_finite() || (iter > 1 && deviance_trial > deviance) {
            log::warn!("IRLS failed to find a valid step after {halvings} halvings");
            return Err(GlmError::StepHalvingFailed(halvings));
        }
        if halvings > 0 {
            log::debug!("Step halving succeeded after {halvings} attempts");
        }

        let change = (deviance_trial - deviance).abs() / (deviance_trial.abs() + 0.1);
        log::debug!(
            "[IRLS Iter #{}] deviance {:.8e}, relative change {:.3e}",
            iter,
            deviance_trial,
            change
        );

        beta = beta_trial;
        eta = eta_trial;
        mu = mu_trial;
        deviance = deviance_trial;

        if change < options.tolerance {
            status = FitStatus::Converged;
            break;
        }
    }

    if status == FitStatus::MaxIterationsReached {
        log::warn!(
            "IRLS did not converge after {} iterations (deviance {:.6e})",
            options.max_iterations,
            deviance
        );
    }

    const PROB_EDGE: f64 = 1e-10;
    if mu.iter().any(|&m| m < PROB_EDGE || m > 1.0 - PROB_EDGE) {
        log::warn!("Fitted probabilities numerically 0 or 1 occurred; the outcome may be separable.");
        status = FitStatus::Unstable;
    }

    let (weights, _) = working_vectors(y, &eta, &mu);
    let xw = &x * &weights.view().insert_axis(Axis(1));
    let information = x.t().dot(&xw);

    let mut terms = Vec::with_capacity(p);
    terms.push("(Intercept)".to_string());
    terms.extend(design.names.iter().cloned());
    let (summary, invertible) = coefficient_table(terms, &beta, &information);
    if !invertible {
        log::warn!("X'WX is singular at the final estimate; standard errors are undefined.");
        status = FitStatus::Unstable;
    }

    let mean_y = y.mean().unwrap_or(0.5);
    let null_deviance = binomial_deviance(y, &Array1::from_elem(n, mean_y));

    log::info!(
        "Logistic regression: {} iterations, deviance {:.4} (null {:.4}), status {:?}",
        iterations,
        deviance,
        null_deviance,
        status
    );

    Ok(LogisticFit {
        feature_names: design.names.clone(),
        coefficients: beta,
        summary,
        deviance,
        null_deviance,
        aic: deviance + 2.0 * p as f64,
        iterations,
        status,
    })
}

/// Wald table from the inverse information matrix. A singular matrix yields
/// NaN standard errors and `false`.
fn coefficient_table(
    terms: Vec<String>,
    beta: &Array1<f64>,
    information: &Array2<f64>,
) -> (Vec<CoefficientSummary>, bool) {
    let covariance = information.inv().ok();
    let invertible = covariance.is_some();
    let summary = terms
        .into_iter()
        .enumerate()
        .map(|(j, term)| {
            let std_error = match &covariance {
                Some(c) if c[[j, j]] >= 0.0 => c[[j, j]].sqrt(),
                _ => f64::NAN,
            };
            let z_value = beta[j] / std_error;
            CoefficientSummary {
                term,
                estimate: beta[j],
                std_error,
                z_value,
                p_value: erfc(z_value.abs() / std::f64::consts::SQRT_2),
            }
        })
        .collect();
    (summary, invertible)
}

fn with_intercept(x: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::ones((x.nrows(), x.ncols() + 1));
    out.slice_mut(s![.., 1..]).assign(&x);
    out
}

/// Logistic-link IRLS weights and working response.
fn working_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
    mu: &Array1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    const MIN_WEIGHT: f64 = 1e-10;
    let weights = mu.mapv(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
    let z = eta + &((&y - mu) / &weights);
    (weights, z)
}

fn solve_weighted(
    x: &Array2<f64>,
    weights: &Array1<f64>,
    z: &Array1<f64>,
) -> Result<Array1<f64>, GlmError> {
    let xw = x * &weights.view().insert_axis(Axis(1));
    let xtwx = x.t().dot(&xw);
    let xtwz = xw.t().dot(z);
    xtwx.solve(&xtwz).map_err(GlmError::LinearSystemSolveFailed)
}

pub(crate) fn inverse_logit(eta: &Array1<f64>) -> Array1<f64> {
    eta.mapv(|e| 1.0 / (1.0 + (-e.clamp(-700.0, 700.0)).exp()))
}

/// Binomial deviance, `-2 log L` for 0/1 responses.
pub fn binomial_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-15;
    let total = ndarray::Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let m = mui.clamp(EPS, 1.0 - EPS);
        acc - (yi * m.ln() + (1.0 - yi) * (1.0 - m).ln())
    });
    2.0 * total
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn design(x: Array2<f64>, y: Array1<f64>) -> DesignMatrix {
        let names = (1..=x.ncols()).map(|j| format!("x{j}")).collect();
        DesignMatrix { names, x, y }
    }

    #[test]
    fn recovers_simulated_coefficients() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 4000;
        let mut x = Array2::zeros((n, 2));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let a: f64 = rng.gen_range(-2.0..2.0);
            let b: f64 = rng.gen_range(-2.0..2.0);
            x[[i, 0]] = a;
            x[[i, 1]] = b;
            let p = 1.0 / (1.0 + (-(-0.5 + 1.2 * a - 0.8 * b)).exp());
            y[i] = if rng.gen_bool(p) { 1.0 } else { 0.0 };
        }
        let fit = fit_logistic(&design(x, y), &GlmOptions::default()).unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        assert_abs_diff_eq!(fit.coefficients[0], -0.5, epsilon = 0.15);
        assert_abs_diff_eq!(fit.coefficients[1], 1.2, epsilon = 0.15);
        assert_abs_diff_eq!(fit.coefficients[2], -0.8, epsilon = 0.15);
        assert!(fit.deviance < fit.null_deviance);
        assert!(fit.summary[1].p_value < 1e-6);
        assert_eq!(fit.summary[0].term, "(Intercept)");
    }

    #[test]
    fn matches_closed_form_for_a_single_binary_predictor() {
        // Saturated 2x2 table: the MLE reproduces the observed group proportions.
        // Group x=0: 3 of 10 events; group x=1: 6 of 8 events.
        let mut rows = Vec::new();
        let mut ys = Vec::new();
        for i in 0..10 {
            rows.push(0.0);
            ys.push(if i < 3 { 1.0 } else { 0.0 });
        }
        for i in 0..8 {
            rows.push(1.0);
            ys.push(if i < 6 { 1.0 } else { 0.0 });
        }
        let x = Array2::from_shape_vec((18, 1), rows).unwrap();
        let fit = fit_logistic(&design(x, Array1::from_vec(ys)), &GlmOptions::default()).unwrap();
        let logit = |p: f64| (p / (1.0 - p)).ln();
        assert_abs_diff_eq!(fit.coefficients[0], logit(0.3), epsilon = 1e-5);
        assert_abs_diff_eq!(fit.coefficients[1], logit(0.75) - logit(0.3), epsilon = 1e-5);
        // Wald SE of the log-odds ratio: sqrt(1/3 + 1/7 + 1/6 + 1/2).
        let se = (1.0 / 3.0 + 1.0 / 7.0 + 1.0 / 6.0 + 1.0 / 2.0_f64).sqrt();
        assert_abs_diff_eq!(fit.summary[1].std_error, se, epsilon = 1e-4);
    }

    #[test]
    fn predictions_are_probabilities() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [0.5], [2.5], [1.5], [0.2]];
        let y = array![0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let fit = fit_logistic(&design(x.clone(), y), &GlmOptions::default()).unwrap();
        let probs = fit.predict_proba(x.view());
        assert!(probs.iter().all(|&p| p > 0.0 && p < 1.0));
        assert!(probs[3] > probs[0]);
    }

    #[test]
    fn separated_outcome_is_flagged_unstable() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let fit = fit_logistic(&design(x, y), &GlmOptions::default()).unwrap();
        assert_eq!(fit.status, FitStatus::Unstable);
        assert!(fit.coefficients[1] > 0.0);
    }

    #[test]
    fn singular_information_gives_nan_standard_errors() {
        let terms = vec!["(Intercept)".to_string(), "x1".to_string()];
        let beta = array![0.5, -1.0];
        let (summary, invertible) = coefficient_table(terms, &beta, &Array2::zeros((2, 2)));
        assert!(!invertible);
        assert!(summary.iter().all(|row| row.std_error.is_nan() && row.p_value.is_nan()));
        assert_abs_diff_eq!(summary[1].estimate, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn all_zero_predictor_fails_on_the_first_solve() {
        let x = array![[0.0], [0.0], [0.0], [0.0], [0.0], [0.0]];
        let y = array![0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        assert!(matches!(
            fit_logistic(&design(x, y), &GlmOptions::default()),
            Err(GlmError::LinearSystemSolveFailed(_))
        ));
    }

    #[test]
    fn iteration_cap_is_reported() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [0.5], [2.5], [1.5], [0.2]];
        let y = array![0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let options = GlmOptions {
            max_iterations: 1,
            ..GlmOptions::default()
        };
        let fit = fit_logistic(&design(x, y), &options).unwrap();
        assert_eq!(fit.status, FitStatus::MaxIterationsReached);
        assert_eq!(fit.iterations, 1);
    }

    #[test]
    fn too_few_rows_is_an_error() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let y = array![0.0, 1.0];
        assert!(matches!(
            fit_logistic(&design(x, y), &GlmOptions::default()),
            Err(GlmError::TooFewRows { rows: 2, params: 3 })
        ));
    }
}

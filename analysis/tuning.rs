//! Resampled evaluation and hyperparameter search.
//!
//! Every (candidate, resample) fit is independent, so the fits run on the rayon
//! pool. Results are collected in job order, which keeps them identical across
//! thread counts.

use crate::boost::BoostParams;
use crate::metrics::{accuracy, roc_auc};
use crate::models::{ModelError, ModelSpec, predict_class};
use crate::recipe::{PreparedRecipe, Recipe, RecipeError};
use crate::split::Split;
use crate::types::{DesignMatrix, Outcome, Table};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::IsTerminal;
use thiserror::Error;

/// Number of Latin-hypercube candidates for the boosted-tree search.
pub const DEFAULT_GRID_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum TuneError {
    #[error("The tuning grid is empty; at least one candidate is required.")]
    NoCandidates,
    #[error("No resamples were supplied for evaluation.")]
    NoResamples,
    #[error("Grid size must be at least 1.")]
    InvalidGridSize,
    #[error("Applying the recipe on resample {resample} failed: {source}")]
    Recipe {
        resample: usize,
        #[source]
        source: RecipeError,
    },
    #[error("Candidate {candidate} failed on resample {resample}: {source}")]
    Model {
        candidate: usize,
        resample: usize,
        #[source]
        source: ModelError,
    },
    #[error("No candidate produced a finite {0}; every resample fit was degenerate.")]
    NoValidCandidate(Metric),
}

/// Metrics reported per resample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    RocAuc,
    Accuracy,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::RocAuc => write!(f, "roc_auc"),
            Metric::Accuracy => write!(f, "accuracy"),
        }
    }
}

// ========================================================================================
//                                   Parameter ranges
// ========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    Log10,
}

/// A tunable parameter's search interval. For `Log10` ranges the bounds are
/// exponents; `integer` values are rounded after transformation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub name: &'static str,
    pub lower: f64,
    pub upper: f64,
    pub transform: Transform,
    pub integer: bool,
}

impl ParamRange {
    /// Maps `u` in `[0, 1)` onto the parameter's scale.
    pub fn value_at(&self, u: f64) -> f64 {
        let raw = self.lower + u * (self.upper - self.lower);
        let value = match self.transform {
            Transform::Identity => raw,
            Transform::Log10 => 10f64.powf(raw),
        };
        if self.integer { value.round() } else { value }
    }
}

/// Default boosted-tree search space. `mtry` is finalized against the number
/// of predictors the recipe produces.
pub fn boost_param_ranges(n_predictors: usize) -> [ParamRange; 6] {
    [
        ParamRange {
            name: "tree_depth",
            lower: 1.0,
            upper: 15.0,
            transform: Transform::Identity,
            integer: true,
        },
        ParamRange {
            name: "min_n",
            lower: 2.0,
            upper: 40.0,
            transform: Transform::Identity,
            integer: true,
        },
        ParamRange {
            name: "loss_reduction",
            lower: -10.0,
            upper: 1.5,
            transform: Transform::Log10,
            integer: false,
        },
        ParamRange {
            name: "sample_size",
            lower: 0.1,
            upper: 1.0,
            transform: Transform::Identity,
            integer: false,
        },
        ParamRange {
            name: "mtry",
            lower: 1.0,
            upper: n_predictors.max(1) as f64,
            transform: Transform::Identity,
            integer: true,
        },
        ParamRange {
            name: "learn_rate",
            lower: -10.0,
            upper: -1.0,
            transform: Transform::Log10,
            integer: false,
        },
    ]
}

/// Space-filling design of exactly `size` points. Each dimension is cut into
/// `size` equal bins; every bin receives one uniform draw and the bin order is
/// shuffled independently per dimension.
pub fn latin_hypercube(ranges: &[ParamRange], size: usize, seed: u64) -> Result<Vec<Vec<f64>>, TuneError> {
    if size == 0 {
        return Err(TuneError::InvalidGridSize);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = vec![Vec::with_capacity(ranges.len()); size];
    for range in ranges {
        let mut bins: Vec<usize> = (0..size).collect();
        bins.shuffle(&mut rng);
        for (point, &bin) in points.iter_mut().zip(&bins) {
            let u = (bin as f64 + rng.gen_range(0.0..1.0)) / size as f64;
            point.push(range.value_at(u));
        }
    }
    Ok(points)
}

/// Builds `size` boosted-tree specs from a Latin hypercube over
/// [`boost_param_ranges`], keeping `base` for everything not tuned.
pub fn boost_grid(
    base: &BoostParams,
    n_predictors: usize,
    size: usize,
    seed: u64,
) -> Result<Vec<ModelSpec>, TuneError> {
    let ranges = boost_param_ranges(n_predictors);
    let points = latin_hypercube(&ranges, size, seed)?;
    Ok(points
        .into_iter()
        .map(|p| {
            ModelSpec::Boost(BoostParams {
                tree_depth: p[0] as usize,
                min_n: p[1] as usize,
                loss_reduction: p[2],
                sample_size: p[3],
                mtry: Some(p[4] as usize),
                learn_rate: p[5],
                ..*base
            })
        })
        .collect())
}

// ========================================================================================
//                                  Resampled evaluation
// ========================================================================================

/// Mixes a base seed with two indices so every fit draws an independent stream.
pub fn derive_seed(base: u64, a: u64, b: u64) -> u64 {
    let mut z = base
        ^ a.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ b.wrapping_add(1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Metrics of one candidate on one assessment set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResampleMetrics {
    pub candidate: usize,
    pub resample: usize,
    pub roc_auc: f64,
    pub accuracy: f64,
}

impl ResampleMetrics {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::RocAuc => self.roc_auc,
            Metric::Accuracy => self.accuracy,
        }
    }
}

/// Mean and standard error of one metric over the resamples where it is finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std_err: f64,
    pub n: usize,
}

impl MetricSummary {
    fn from_values(values: impl Iterator<Item = f64>) -> Self {
        let finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
        let n = finite.len();
        if n == 0 {
            return MetricSummary {
                mean: f64::NAN,
                std_err: f64::NAN,
                n,
            };
        }
        let mean = finite.iter().sum::<f64>() / n as f64;
        let std_err = if n > 1 {
            let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (var / n as f64).sqrt()
        } else {
            f64::NAN
        };
        MetricSummary { mean, std_err, n }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub candidate: usize,
    pub spec: ModelSpec,
    pub roc_auc: MetricSummary,
    pub accuracy: MetricSummary,
}

impl CandidateSummary {
    pub fn metric(&self, metric: Metric) -> &MetricSummary {
        match metric {
            Metric::RocAuc => &self.roc_auc,
            Metric::Accuracy => &self.accuracy,
        }
    }
}

/// Per-resample metrics plus per-candidate summaries, in candidate order.
#[derive(Debug, Clone, PartialEq)]
pub struct TuneResults {
    pub per_resample: Vec<ResampleMetrics>,
    pub summaries: Vec<CandidateSummary>,
}

impl TuneResults {
    /// The candidate with the highest mean `metric`. Earlier candidates win ties.
    pub fn select_best(&self, metric: Metric) -> Result<&CandidateSummary, TuneError> {
        let mut best: Option<&CandidateSummary> = None;
        for summary in &self.summaries {
            let mean = summary.metric(metric).mean;
            if !mean.is_finite() {
                continue;
            }
            if best.is_none_or(|b| mean > b.metric(metric).mean) {
                best = Some(summary);
            }
        }
        best.ok_or(TuneError::NoValidCandidate(metric))
    }

    /// The top `n` candidates by mean `metric`, best first.
    pub fn show_best(&self, metric: Metric, n: usize) -> Vec<&CandidateSummary> {
        let mut ranked: Vec<&CandidateSummary> = self
            .summaries
            .iter()
            .filter(|s| s.metric(metric).mean.is_finite())
            .collect();
        ranked.sort_by(|a, b| b.metric(metric).mean.total_cmp(&a.metric(metric).mean));
        ranked.truncate(n);
        ranked
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} fits ({eta}) {msg}",
    )
    .map(|s| s.progress_chars("█▉▊▋▌▍▎▏  "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Evaluates every candidate on every resample of `train`.
///
/// The recipe is prepped once per resample on its analysis rows only, and the
/// assessment rows are baked once with those statistics. Every candidate on a
/// resample gets the same model seed, so a candidate's metrics do not depend on
/// where it sits in `candidates`.
pub fn tune_grid(
    train: &Table,
    recipe: &Recipe,
    candidates: &[ModelSpec],
    resamples: &[Split],
    seed: u64,
) -> Result<TuneResults, TuneError> {
    if candidates.is_empty() {
        return Err(TuneError::NoCandidates);
    }
    if resamples.is_empty() {
        return Err(TuneError::NoResamples);
    }

    let prepared: Vec<PreparedResample> = resamples
        .par_iter()
        .enumerate()
        .map(|(r, split)| {
            PreparedResample::new(train, recipe, split, derive_seed(seed, RECIPE_SEED_STREAM, r as u64))
                .map_err(|source| TuneError::Recipe { resample: r, source })
        })
        .collect::<Result<_, _>>()?;

    let jobs: Vec<(usize, usize)> = (0..candidates.len())
        .flat_map(|c| (0..resamples.len()).map(move |r| (c, r)))
        .collect();
    log::info!(
        "Evaluating {} candidate(s) x {} resamples = {} fits",
        candidates.len(),
        resamples.len(),
        jobs.len()
    );
    let pb = create_progress_bar(jobs.len() as u64, candidates[0].name());

    let per_resample: Vec<ResampleMetrics> = jobs
        .par_iter()
        .map(|&(c, r)| {
            let model_seed = derive_seed(seed, MODEL_SEED_STREAM, r as u64);
            let result = evaluate_one(&candidates[c], &prepared[r], c, r, model_seed);
            pb.inc(1);
            result
        })
        .collect::<Result<_, _>>()?;
    pb.finish_with_message("done");

    let summaries = candidates
        .iter()
        .enumerate()
        .map(|(c, spec)| {
            let rows = || per_resample.iter().filter(move |m| m.candidate == c);
            CandidateSummary {
                candidate: c,
                spec: spec.clone(),
                roc_auc: MetricSummary::from_values(rows().map(|m| m.get(Metric::RocAuc))),
                accuracy: MetricSummary::from_values(rows().map(|m| m.get(Metric::Accuracy))),
            }
        })
        .collect();

    Ok(TuneResults {
        per_resample,
        summaries,
    })
}

const RECIPE_SEED_STREAM: u64 = u64::MAX;
const MODEL_SEED_STREAM: u64 = u64::MAX - 1;

/// One resample after preprocessing: the prepped recipe with its processed
/// analysis rows, and the baked assessment rows.
struct PreparedResample {
    recipe: PreparedRecipe,
    assessment: DesignMatrix,
    truth: Vec<Outcome>,
}

impl PreparedResample {
    fn new(train: &Table, recipe: &Recipe, split: &Split, seed: u64) -> Result<Self, RecipeError> {
        let prepared = recipe.reseeded(seed).prep(&train.take(&split.analysis))?;
        let assessment_rows = train.take(&split.assessment);
        let assessment = prepared.bake(&assessment_rows)?;
        Ok(PreparedResample {
            recipe: prepared,
            assessment,
            truth: assessment_rows.outcome,
        })
    }
}

fn evaluate_one(
    spec: &ModelSpec,
    data: &PreparedResample,
    candidate: usize,
    resample: usize,
    seed: u64,
) -> Result<ResampleMetrics, TuneError> {
    let model_error = |source| TuneError::Model {
        candidate,
        resample,
        source,
    };
    let model = spec.fit(data.recipe.juice(), seed).map_err(model_error)?;
    let probs = model.predict(&data.assessment).map_err(model_error)?.to_vec();
    let truth = &data.truth;
    Ok(ResampleMetrics {
        candidate,
        resample,
        roc_auc: roc_auc(&probs, truth),
        accuracy: accuracy(&predict_class(&probs), truth),
    })
}

/// Resampled evaluation of a single fixed model.
pub fn fit_resamples(
    train: &Table,
    recipe: &Recipe,
    spec: &ModelSpec,
    resamples: &[Split],
    seed: u64,
) -> Result<TuneResults, TuneError> {
    tune_grid(train, recipe, std::slice::from_ref(spec), resamples, seed)
}

//! End-to-end analysis: load, explore, preprocess, resample, tune, finalize.

use crate::config::{ConfigError, PipelineConfig};
use crate::data::{DataError, PatientRecords, load_patient_records};
use crate::features::{FeatureError, recode_factors, select_features};
use crate::glm::{FitStatus, GlmError, GlmOptions, LogisticFit, fit_logistic};
use crate::importance::{VariableImportance, model_importance};
use crate::metrics::{ConfusionMatrix, RocPoint, accuracy, brier_score, mean_log_loss, roc_auc, roc_curve};
use crate::models::{FittedModel, ModelError, ModelSpec, predict_class};
use crate::recipe::{Recipe, RecipeError};
use crate::resample::mc_cv;
use crate::split::{SplitError, initial_split};
use crate::tuning::{CandidateSummary, Metric, TuneError, TuneResults, boost_grid, derive_seed, fit_resamples, tune_grid};
use crate::types::{DesignMatrix, Table};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Top-level error for the whole pipeline.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error(transparent)]
    Glm(#[from] GlmError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tune(#[from] TuneError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// Independent random streams drawn from the run seed.
const SPLIT_STREAM: u64 = 1;
const RECIPE_STREAM: u64 = 2;
const RESAMPLE_STREAM: u64 = 3;
const GRID_STREAM: u64 = 4;
const FIT_STREAM: u64 = 5;

/// Test-set performance of a finalized model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestMetrics {
    pub roc_auc: f64,
    pub accuracy: f64,
    pub brier_score: f64,
    pub log_loss: f64,
}

/// A model refit on the full training partition and scored on the test set.
#[derive(Debug, Clone)]
pub struct LastFit {
    pub spec: ModelSpec,
    pub model: FittedModel,
    pub metrics: TestMetrics,
    pub confusion: ConfusionMatrix,
    pub roc_curve: Vec<RocPoint>,
    pub importance: Vec<VariableImportance>,
    pub test_probabilities: Vec<f64>,
}

/// Resampling results and the finalized fit for one model family.
#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    pub name: &'static str,
    pub resampling: TuneResults,
    /// The candidate chosen by mean ROC-AUC.
    pub selected: CandidateSummary,
    pub last_fit: LastFit,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub n_patients: usize,
    pub n_train: usize,
    pub n_test: usize,
    /// (survived, died) in the training partition before down-sampling.
    pub train_class_counts: (usize, usize),
    pub predictors: Vec<String>,
    pub recipe_columns: Vec<String>,
    pub exploratory: LogisticFit,
    pub evaluations: Vec<ModelEvaluation>,
}

/// Logistic regression of `DEATH_EVENT` on every raw predictor.
pub fn fit_exploratory(records: &PatientRecords, options: &GlmOptions) -> Result<LogisticFit, GlmError> {
    let design = DesignMatrix {
        names: PatientRecords::predictor_names(),
        x: records.predictors.clone(),
        y: records.death_event.clone(),
    };
    let fit = fit_logistic(&design, options)?;
    if fit.status != FitStatus::Converged {
        log::warn!("Exploratory logistic regression finished with status {:?}", fit.status);
    }
    Ok(fit)
}

/// Loads `path` and fits the exploratory model only.
pub fn explore(path: &Path, options: &GlmOptions) -> Result<LogisticFit, AnalysisError> {
    let records = load_patient_records(path)?;
    log::info!("Loaded {} patient records from {}", records.n_patients(), path.display());
    Ok(fit_exploratory(&records, options)?)
}

/// Preps `recipe` on `train`, fits `spec`, and evaluates on `test`.
pub fn last_fit(
    spec: &ModelSpec,
    recipe: &Recipe,
    train: &Table,
    test: &Table,
    seed: u64,
) -> Result<LastFit, AnalysisError> {
    let prepared = recipe.prep(train)?;
    let model = spec.fit(prepared.juice(), seed)?;
    let baked = prepared.bake(test)?;
    let probs = model.predict(&baked)?.to_vec();
    let truth = &test.outcome;
    let predicted = predict_class(&probs);

    let metrics = TestMetrics {
        roc_auc: roc_auc(&probs, truth),
        accuracy: accuracy(&predicted, truth),
        brier_score: brier_score(&probs, truth),
        log_loss: mean_log_loss(&probs, truth),
    };
    log::info!(
        "Final {} model: test ROC-AUC {:.4}, accuracy {:.4}",
        spec.name(),
        metrics.roc_auc,
        metrics.accuracy
    );

    Ok(LastFit {
        spec: spec.clone(),
        importance: model_importance(&model, prepared.juice(), seed),
        confusion: ConfusionMatrix::from_predictions(&predicted, truth),
        roc_curve: roc_curve(&probs, truth),
        metrics,
        model,
        test_probabilities: probs,
    })
}

/// Runs the complete analysis on the CSV at `path`.
pub fn run_analysis(path: &Path, config: &PipelineConfig) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    let seed = config.seed;

    let records = load_patient_records(path)?;
    log::info!("Loaded {} patient records from {}", records.n_patients(), path.display());
    let exploratory = fit_exploratory(&records, &config.logistic)?;

    let table = recode_factors(&records);
    let selected = select_features(&table, &config.features.predictors)?;

    let split = initial_split(
        selected.n_rows(),
        config.split.train_proportion,
        derive_seed(seed, SPLIT_STREAM, 0),
    )?;
    let train = selected.take(&split.analysis);
    let test = selected.take(&split.assessment);

    let recipe = Recipe::new(derive_seed(seed, RECIPE_STREAM, 0))
        .step_downsample(config.recipe.under_ratio)
        .step_dummy(config.recipe.one_hot)
        .step_zv()
        .step_normalize();
    let recipe_columns = recipe.prep(&train)?.output_columns().to_vec();
    log::info!("Recipe produces {} model inputs: {:?}", recipe_columns.len(), recipe_columns);

    let resamples = mc_cv(
        &train.outcome,
        config.resampling.proportion,
        config.resampling.times,
        config.resampling.stratified,
        derive_seed(seed, RESAMPLE_STREAM, 0),
    )?;

    let mut evaluations = Vec::with_capacity(3);
    for (k, spec) in [ModelSpec::Logistic(config.logistic), ModelSpec::Mlp(config.mlp)]
        .iter()
        .enumerate()
    {
        log::info!("Resampling the {} model", spec.name());
        let fit_seed = derive_seed(seed, FIT_STREAM, k as u64);
        let resampling = fit_resamples(&train, &recipe, spec, &resamples, fit_seed)?;
        let selected = resampling.select_best(Metric::RocAuc)?.clone();
        let last = last_fit(spec, &recipe, &train, &test, fit_seed)?;
        evaluations.push(ModelEvaluation {
            name: spec.name(),
            resampling,
            selected,
            last_fit: last,
        });
    }

    log::info!("Tuning boosted trees over {} grid points", config.tuning.grid_size);
    let grid = boost_grid(
        &config.boost,
        recipe_columns.len(),
        config.tuning.grid_size,
        derive_seed(seed, GRID_STREAM, 0),
    )?;
    let fit_seed = derive_seed(seed, FIT_STREAM, 2);
    let tuning = tune_grid(&train, &recipe, &grid, &resamples, fit_seed)?;
    let best = tuning.select_best(Metric::RocAuc)?.clone();
    log::info!(
        "Best boosted-tree candidate #{} with mean ROC-AUC {:.4}",
        best.candidate + 1,
        best.roc_auc.mean
    );
    let last = last_fit(&best.spec, &recipe, &train, &test, fit_seed)?;
    evaluations.push(ModelEvaluation {
        name: best.spec.name(),
        resampling: tuning,
        selected: best,
        last_fit: last,
    });

    Ok(AnalysisReport {
        n_patients: records.n_patients(),
        n_train: train.n_rows(),
        n_test: test.n_rows(),
        train_class_counts: train.class_counts(),
        predictors: config.features.predictors.clone(),
        recipe_columns,
        exploratory,
        evaluations,
    })
}

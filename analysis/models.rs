//! Model specifications and the common prediction interface.

use crate::boost::{BoostError, BoostFit, BoostParams, fit_boost};
use crate::glm::{GlmError, GlmOptions, LogisticFit, fit_logistic};
use crate::mlp::{MlpError, MlpFit, MlpParams, fit_mlp};
use crate::types::{DesignMatrix, Outcome};
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Probability threshold above which a row is predicted `Died`.
pub const CLASS_THRESHOLD: f64 = 0.5;

/// Anything that turns a design matrix into event probabilities.
pub trait Classifier {
    /// Column names the model was trained on, in order.
    fn feature_names(&self) -> &[String];

    /// Probability of `Died` for each row of `x`.
    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64>;
}

impl Classifier for LogisticFit {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        LogisticFit::predict_proba(self, x)
    }
}

impl Classifier for MlpFit {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        MlpFit::predict_proba(self, x)
    }
}

impl Classifier for BoostFit {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        BoostFit::predict_proba(self, x)
    }
}

/// Hard class predictions at [`CLASS_THRESHOLD`].
pub fn predict_class(probs: &[f64]) -> Vec<Outcome> {
    probs
        .iter()
        .map(|&p| if p > CLASS_THRESHOLD { Outcome::Died } else { Outcome::Survived })
        .collect()
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Logistic regression failed: {0}")]
    Glm(#[from] GlmError),
    #[error("Neural network training failed: {0}")]
    Mlp(#[from] MlpError),
    #[error("Boosted tree training failed: {0}")]
    Boost(#[from] BoostError),
    #[error(
        "Model was trained on columns {expected:?} but the prediction data has columns {found:?}."
    )]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// An unfitted model: which learner plus its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum ModelSpec {
    Logistic(GlmOptions),
    Mlp(MlpParams),
    Boost(BoostParams),
}

impl ModelSpec {
    /// Short label used in log lines, reports and artifact file names.
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::Logistic(_) => "logistic",
            ModelSpec::Mlp(_) => "mlp",
            ModelSpec::Boost(_) => "boost",
        }
    }

    /// Trains on `design`. The seed drives any randomness the learner has;
    /// logistic regression ignores it.
    pub fn fit(&self, design: &DesignMatrix, seed: u64) -> Result<FittedModel, ModelError> {
        let fitted = match self {
            ModelSpec::Logistic(options) => FittedModel::Logistic(fit_logistic(design, options)?),
            ModelSpec::Mlp(params) => FittedModel::Mlp(fit_mlp(design, params, seed)?),
            ModelSpec::Boost(params) => FittedModel::Boost(fit_boost(design, params, seed)?),
        };
        Ok(fitted)
    }
}

/// A trained model of any supported kind.
#[derive(Debug, Clone)]
pub enum FittedModel {
    Logistic(LogisticFit),
    Mlp(MlpFit),
    Boost(BoostFit),
}

impl FittedModel {
    /// Event probabilities for `design`, after checking that its columns match
    /// the training columns.
    pub fn predict(&self, design: &DesignMatrix) -> Result<Array1<f64>, ModelError> {
        if self.feature_names() != design.names.as_slice() {
            return Err(ModelError::SchemaMismatch {
                expected: self.feature_names().to_vec(),
                found: design.names.clone(),
            });
        }
        Ok(self.predict_proba(design.x.view()))
    }
}

impl Classifier for FittedModel {
    fn feature_names(&self) -> &[String] {
        match self {
            FittedModel::Logistic(fit) => Classifier::feature_names(fit),
            FittedModel::Mlp(fit) => Classifier::feature_names(fit),
            FittedModel::Boost(fit) => Classifier::feature_names(fit),
        }
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        match self {
            FittedModel::Logistic(fit) => fit.predict_proba(x),
            FittedModel::Mlp(fit) => fit.predict_proba(x),
            FittedModel::Boost(fit) => fit.predict_proba(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn design() -> DesignMatrix {
        DesignMatrix {
            names: vec!["a".into()],
            x: array![[-2.0], [-1.0], [-0.5], [0.5], [-0.2], [1.0], [2.0], [0.1]],
            y: array![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn class_threshold_is_strict() {
        assert_eq!(
            predict_class(&[0.2, 0.5, 0.51]),
            vec![Outcome::Survived, Outcome::Survived, Outcome::Died]
        );
    }

    #[test]
    fn every_spec_fits_and_predicts_probabilities() {
        let specs = [
            ModelSpec::Logistic(GlmOptions::default()),
            ModelSpec::Mlp(MlpParams { epochs: 3, ..MlpParams::default() }),
            ModelSpec::Boost(BoostParams { trees: 5, ..BoostParams::default() }),
        ];
        for spec in &specs {
            let model = spec.fit(&design(), 1).unwrap();
            let probs = model.predict(&design()).unwrap();
            assert_eq!(probs.len(), 8, "{}", spec.name());
            assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn prediction_rejects_a_different_schema() {
        let model = ModelSpec::Logistic(GlmOptions::default()).fit(&design(), 0).unwrap();
        let mut other = design();
        other.names = vec!["b".into()];
        assert!(matches!(
            model.predict(&other),
            Err(ModelError::SchemaMismatch { .. })
        ));
    }
}

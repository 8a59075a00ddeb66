//! Variable importance for each kind of fitted model.

use crate::boost::BoostFit;
use crate::glm::LogisticFit;
use crate::metrics::roc_auc;
use crate::models::{Classifier, FittedModel};
use crate::types::DesignMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Number of shuffles averaged per feature for permutation importance.
pub const PERMUTATION_REPEATS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableImportance {
    pub variable: String,
    pub importance: f64,
}

fn ranked(pairs: impl IntoIterator<Item = (String, f64)>) -> Vec<VariableImportance> {
    let mut out: Vec<VariableImportance> = pairs
        .into_iter()
        .map(|(variable, importance)| VariableImportance { variable, importance })
        .collect();
    out.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    out
}

/// Absolute z statistic of every slope.
pub fn logistic_importance(fit: &LogisticFit) -> Vec<VariableImportance> {
    ranked(
        fit.summary
            .iter()
            .skip(1)
            .map(|c| (c.term.clone(), c.z_value.abs())),
    )
}

/// Normalized total split gain.
pub fn boost_importance(fit: &BoostFit) -> Vec<VariableImportance> {
    ranked(fit.gain_importance())
}

/// Drop in ROC-AUC on `design` when a column is shuffled, averaged over
/// `repeats` seeded permutations.
pub fn permutation_importance<C: Classifier + ?Sized>(
    model: &C,
    design: &DesignMatrix,
    repeats: usize,
    seed: u64,
) -> Vec<VariableImportance> {
    let labels = design.outcomes();
    let baseline = roc_auc(&model.predict_proba(design.x.view()).to_vec(), &labels);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut shuffled = design.x.clone();
    let mut order: Vec<usize> = (0..design.n_rows()).collect();

    let scores = design.names.iter().enumerate().map(|(j, name)| {
        let mut total_drop = 0.0;
        for _ in 0..repeats {
            order.shuffle(&mut rng);
            for (i, &src) in order.iter().enumerate() {
                shuffled[[i, j]] = design.x[[src, j]];
            }
            let auc = roc_auc(&model.predict_proba(shuffled.view()).to_vec(), &labels);
            total_drop += baseline - auc;
        }
        shuffled.column_mut(j).assign(&design.x.column(j));
        (name.clone(), total_drop / repeats.max(1) as f64)
    });
    ranked(scores.collect::<Vec<_>>())
}

/// Importance in the natural unit of each model kind. The MLP has no built-in
/// measure, so it is scored by permutation on `design`.
pub fn model_importance(model: &FittedModel, design: &DesignMatrix, seed: u64) -> Vec<VariableImportance> {
    match model {
        FittedModel::Logistic(fit) => logistic_importance(fit),
        FittedModel::Boost(fit) => boost_importance(fit),
        FittedModel::Mlp(fit) => permutation_importance(fit, design, PERMUTATION_REPEATS, seed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::{GlmOptions, fit_logistic};
    use ndarray::{Array1, Array2, ArrayView2};

    /// Scores rows by their first column only.
    struct FirstColumn {
        names: Vec<String>,
    }

    impl Classifier for FirstColumn {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
            x.column(0).mapv(|v| 1.0 / (1.0 + (-v).exp()))
        }
    }

    fn design() -> DesignMatrix {
        let n = 40;
        let mut x = Array2::zeros((n, 2));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            x[[i, 0]] = i as f64 - 20.0;
            x[[i, 1]] = ((i * 13) % 7) as f64;
            y[i] = if (i * 5) % 9 < 4 || i > 30 { 1.0 } else { 0.0 };
            if i < 10 {
                y[i] = 0.0;
            }
        }
        DesignMatrix {
            names: vec!["signal".into(), "noise".into()],
            x,
            y,
        }
    }

    #[test]
    fn unused_column_has_zero_permutation_importance() {
        let d = design();
        let model = FirstColumn {
            names: d.names.clone(),
        };
        let imp = permutation_importance(&model, &d, 5, 3);
        assert_eq!(imp[0].variable, "signal");
        assert!(imp[0].importance > 0.0);
        let noise = imp.iter().find(|v| v.variable == "noise").unwrap();
        assert_eq!(noise.importance, 0.0);
    }

    #[test]
    fn logistic_importance_skips_the_intercept_and_sorts() {
        let d = design();
        let fit = fit_logistic(&d, &GlmOptions::default()).unwrap();
        let imp = logistic_importance(&fit);
        assert_eq!(imp.len(), 2);
        assert!(imp.iter().all(|v| v.variable != "(Intercept)"));
        assert!(imp[0].importance >= imp[1].importance);
    }
}

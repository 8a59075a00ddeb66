//! Classification metrics. `Died` is the event (positive) class throughout.

use crate::types::Outcome;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Area under the ROC curve via the Mann-Whitney rank statistic, with tied
/// scores given their average rank.
///
/// Returns `NaN` when `labels` contains only one class.
pub fn roc_auc(probs: &[f64], labels: &[Outcome]) -> f64 {
    let n = probs.len().min(labels.len());
    let n_pos = labels[..n].iter().filter(|o| o.is_event()).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| probs[a].partial_cmp(&probs[b]).unwrap_or(Ordering::Equal));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && probs[order[j]] == probs[order[i]] {
            j += 1;
        }
        // Ranks i+1..=j share their mean.
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        rank_sum_pos += order[i..j]
            .iter()
            .filter(|&&k| labels[k].is_event())
            .count() as f64
            * avg_rank;
        i = j;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// One operating point of the ROC curve: rows with probability `>= threshold`
/// are predicted `Died`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub threshold: f64,
    pub sensitivity: f64,
    pub specificity: f64,
}

/// ROC curve ordered by ascending threshold, bracketed by the `-inf`
/// (everything positive) and `+inf` (everything negative) end points.
pub fn roc_curve(probs: &[f64], labels: &[Outcome]) -> Vec<RocPoint> {
    let n = probs.len().min(labels.len());
    let n_pos = labels[..n].iter().filter(|o| o.is_event()).count() as f64;
    let n_neg = n as f64 - n_pos;

    let mut thresholds: Vec<f64> = probs[..n].iter().copied().filter(|p| p.is_finite()).collect();
    thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    thresholds.dedup();

    let rate = |num: usize, den: f64| if den > 0.0 { num as f64 / den } else { f64::NAN };

    let mut curve = Vec::with_capacity(thresholds.len() + 2);
    curve.push(RocPoint {
        threshold: f64::NEG_INFINITY,
        sensitivity: 1.0,
        specificity: 0.0,
    });
    for &t in &thresholds {
        let mut tp = 0;
        let mut tn = 0;
        for (&p, label) in probs[..n].iter().zip(&labels[..n]) {
            match (p >= t, label.is_event()) {
                (true, true) => tp += 1,
                (false, false) => tn += 1,
                _ => {}
            }
        }
        curve.push(RocPoint {
            threshold: t,
            sensitivity: rate(tp, n_pos),
            specificity: rate(tn, n_neg),
        });
    }
    curve.push(RocPoint {
        threshold: f64::INFINITY,
        sensitivity: 0.0,
        specificity: 1.0,
    });
    curve
}

/// Fraction of rows whose predicted class matches the truth.
pub fn accuracy(predicted: &[Outcome], truth: &[Outcome]) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let hits = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    hits as f64 / truth.len() as f64
}

/// Mean squared difference between the event probability and the 0/1 outcome.
pub fn brier_score(probs: &[f64], labels: &[Outcome]) -> f64 {
    if labels.is_empty() {
        return f64::NAN;
    }
    let sum_sq: f64 = probs
        .iter()
        .zip(labels)
        .map(|(p, o)| (p - o.as_response()).powi(2))
        .sum();
    sum_sq / labels.len() as f64
}

/// Mean binary cross-entropy with probabilities clamped to `[eps, 1 - eps]`.
pub fn mean_log_loss(probs: &[f64], labels: &[Outcome]) -> f64 {
    const EPS: f64 = 1e-15;
    if labels.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = probs
        .iter()
        .zip(labels)
        .map(|(&p, o)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            let y = o.as_response();
            -y * p.ln() - (1.0 - y) * (1.0 - p).ln()
        })
        .sum();
    sum / labels.len() as f64
}

/// 2x2 table of predicted versus true class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[Outcome], truth: &[Outcome]) -> Self {
        let mut cm = ConfusionMatrix::default();
        for (p, t) in predicted.iter().zip(truth) {
            match (p.is_event(), t.is_event()) {
                (true, true) => cm.true_positive += 1,
                (true, false) => cm.false_positive += 1,
                (false, false) => cm.true_negative += 1,
                (false, true) => cm.false_negative += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn sensitivity(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn specificity(&self) -> f64 {
        ratio(self.true_negative, self.true_negative + self.false_positive)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.sensitivity();
        if p + r > 0.0 { 2.0 * p * r / (p + r) } else { f64::NAN }
    }

    /// Cohen's kappa: agreement beyond what the marginals predict by chance.
    pub fn kappa(&self) -> f64 {
        let n = self.total() as f64;
        if n == 0.0 {
            return f64::NAN;
        }
        let observed = self.accuracy();
        let pred_pos = (self.true_positive + self.false_positive) as f64;
        let pred_neg = (self.true_negative + self.false_negative) as f64;
        let true_pos = (self.true_positive + self.false_negative) as f64;
        let true_neg = (self.true_negative + self.false_positive) as f64;
        let expected = (pred_pos * true_pos + pred_neg * true_neg) / (n * n);
        if (1.0 - expected).abs() < f64::EPSILON {
            return f64::NAN;
        }
        (observed - expected) / (1.0 - expected)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { f64::NAN } else { num as f64 / den as f64 }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>18} {:>10} {:>10}", "", "truth:died", "truth:surv")?;
        writeln!(
            f,
            "{:>18} {:>10} {:>10}",
            "predicted:died", self.true_positive, self.false_positive
        )?;
        write!(
            f,
            "{:>18} {:>10} {:>10}",
            "predicted:survived", self.false_negative, self.true_negative
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::types::Outcome::{Died, Survived};

    #[test]
    fn auc_of_perfect_and_reversed_rankings() {
        let labels = [Survived, Survived, Died, Died];
        assert_relative_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels), 1.0);
        assert_relative_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels), 0.0);
    }

    #[test]
    fn auc_averages_tied_scores() {
        let labels = [Survived, Died, Survived, Died];
        assert_relative_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &labels), 0.5);
        // One positive above both negatives, one tied with a negative.
        let auc = roc_auc(&[0.2, 0.9, 0.4, 0.4], &labels);
        assert_relative_eq!(auc, 0.875);
    }

    #[test]
    fn auc_is_undefined_for_a_single_class() {
        assert!(roc_auc(&[0.1, 0.7], &[Died, Died]).is_nan());
    }

    #[test]
    fn roc_curve_spans_both_corners() {
        let labels = [Survived, Died, Survived, Died];
        let curve = roc_curve(&[0.1, 0.8, 0.3, 0.6], &labels);
        assert_eq!(curve.len(), 6);
        let first = curve.first().unwrap();
        let last = curve.last().unwrap();
        assert_eq!((first.sensitivity, first.specificity), (1.0, 0.0));
        assert_eq!((last.sensitivity, last.specificity), (0.0, 1.0));
        assert!(curve.windows(2).all(|w| w[0].threshold < w[1].threshold));
        // Threshold 0.6 separates the classes perfectly.
        let perfect = curve.iter().find(|p| p.threshold == 0.6).unwrap();
        assert_eq!((perfect.sensitivity, perfect.specificity), (1.0, 1.0));
    }

    #[test]
    fn confusion_matrix_statistics() {
        let truth = [Died, Died, Died, Survived, Survived, Survived, Survived, Survived];
        let predicted = [Died, Died, Survived, Died, Survived, Survived, Survived, Survived];
        let cm = ConfusionMatrix::from_predictions(&predicted, &truth);
        assert_eq!(cm.true_positive, 2);
        assert_eq!(cm.false_negative, 1);
        assert_eq!(cm.false_positive, 1);
        assert_eq!(cm.true_negative, 4);
        assert_relative_eq!(cm.accuracy(), 0.75);
        assert_relative_eq!(cm.sensitivity(), 2.0 / 3.0);
        assert_relative_eq!(cm.specificity(), 0.8);
        assert_relative_eq!(cm.precision(), 2.0 / 3.0);
        assert_relative_eq!(cm.f1(), 2.0 / 3.0);
        // po = 0.75, pe = (3*3 + 5*5) / 64
        assert_relative_eq!(cm.kappa(), (0.75 - 34.0 / 64.0) / (1.0 - 34.0 / 64.0));
        assert_relative_eq!(accuracy(&predicted, &truth), 0.75);
    }

    #[test]
    fn probability_scores() {
        let labels = [Died, Survived];
        assert_relative_eq!(brier_score(&[1.0, 0.0], &labels), 0.0);
        assert_relative_eq!(brier_score(&[0.0, 1.0], &labels), 1.0);
        assert!(mean_log_loss(&[0.99, 0.01], &labels) < 0.02);
    }
}

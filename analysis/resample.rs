//! Monte-Carlo cross-validation over the training partition.

use crate::split::{Split, SplitError, validate_proportion};
use crate::types::Outcome;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

pub const DEFAULT_MC_PROPORTION: f64 = 0.9;
pub const DEFAULT_MC_TIMES: usize = 25;

/// Draws `times` independent analysis/assessment splits of the rows whose
/// outcomes are `labels`. With `strata`, each outcome class contributes
/// `floor(prop * class_size)` analysis rows so every resample keeps the
/// class balance of the input.
pub fn mc_cv(
    labels: &[Outcome],
    prop: f64,
    times: usize,
    strata: bool,
    seed: u64,
) -> Result<Vec<Split>, SplitError> {
    validate_proportion(prop)?;
    if times == 0 {
        return Err(SplitError::NoResamples);
    }

    let n = labels.len();
    let groups: Vec<Vec<usize>> = if strata {
        [Outcome::Survived, Outcome::Died]
            .iter()
            .map(|class| (0..n).filter(|&i| labels[i] == *class).collect::<Vec<_>>())
            .filter(|g| !g.is_empty())
            .collect()
    } else {
        vec![(0..n).collect()]
    };

    let n_analysis: usize = groups
        .iter()
        .map(|g| (g.len() as f64 * prop).floor() as usize)
        .sum();
    if n_analysis == 0 || n_analysis == n {
        return Err(SplitError::EmptyPartition {
            rows: n,
            prop,
            analysis: n_analysis,
            assessment: n - n_analysis,
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let splits: Vec<Split> = (0..times)
        .map(|_| {
            let mut analysis = Vec::with_capacity(n_analysis);
            for group in &groups {
                let take = (group.len() as f64 * prop).floor() as usize;
                analysis.extend(
                    sample(&mut rng, group.len(), take)
                        .into_iter()
                        .map(|k| group[k]),
                );
            }
            Split::from_analysis(n, analysis)
        })
        .collect();

    log::debug!(
        "Monte-Carlo CV: {} resamples of {} analysis / {} assessment rows (stratified: {})",
        times,
        n_analysis,
        n - n_analysis,
        strata
    );
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(survived: usize, died: usize) -> Vec<Outcome> {
        let mut v = vec![Outcome::Survived; survived];
        v.extend(vec![Outcome::Died; died]);
        v
    }

    #[test]
    fn produces_requested_number_of_resamples() {
        let splits = mc_cv(&labels(70, 30), 0.9, DEFAULT_MC_TIMES, true, 5).unwrap();
        assert_eq!(splits.len(), 25);
        for split in &splits {
            assert_eq!(split.analysis.len() + split.assessment.len(), 100);
        }
    }

    #[test]
    fn stratification_preserves_class_counts() {
        let y = labels(152, 72);
        for split in mc_cv(&y, 0.9, 10, true, 11).unwrap() {
            let died = split.analysis.iter().filter(|&&i| y[i].is_event()).count();
            assert_eq!(died, (72.0_f64 * 0.9).floor() as usize);
            assert_eq!(split.analysis.len() - died, (152.0_f64 * 0.9).floor() as usize);
        }
    }

    #[test]
    fn resamples_differ_from_each_other() {
        let splits = mc_cv(&labels(50, 50), 0.9, 5, false, 2).unwrap();
        assert!(splits.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn rejects_zero_resamples() {
        assert_eq!(
            mc_cv(&labels(5, 5), 0.9, 0, true, 0).unwrap_err(),
            SplitError::NoResamples
        );
    }

    #[test]
    fn rejects_proportions_outside_the_open_unit_interval() {
        for prop in [0.0, 1.0, -0.2, 1.5, f64::NAN] {
            assert!(matches!(
                mc_cv(&labels(10, 10), prop, 3, true, 0),
                Err(SplitError::InvalidProportion(_))
            ));
        }
    }

    #[test]
    fn tiny_classes_leave_the_analysis_side_empty() {
        assert_eq!(
            mc_cv(&labels(2, 1), 0.1, 3, true, 0).unwrap_err(),
            SplitError::EmptyPartition {
                rows: 3,
                prop: 0.1,
                analysis: 0,
                assessment: 3,
            }
        );
    }
}

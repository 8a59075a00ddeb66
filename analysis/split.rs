//! Train/test partitioning.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use thiserror::Error;

/// Default share of rows that go to the training partition.
pub const DEFAULT_TRAIN_PROPORTION: f64 = 0.75;

/// Row indices of one partition pair. `analysis` is used for fitting,
/// `assessment` for evaluation. Both are sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub analysis: Vec<usize>,
    pub assessment: Vec<usize>,
}

impl Split {
    /// Builds a split from the chosen analysis rows; every other row in `0..n`
    /// becomes assessment.
    pub(crate) fn from_analysis(n: usize, mut analysis: Vec<usize>) -> Self {
        analysis.sort_unstable();
        let mut in_analysis = vec![false; n];
        for &i in &analysis {
            in_analysis[i] = true;
        }
        let assessment = (0..n).filter(|&i| !in_analysis[i]).collect();
        Split {
            analysis,
            assessment,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum SplitError {
    #[error("Split proportion must lie strictly between 0 and 1, got {0}.")]
    InvalidProportion(f64),
    #[error(
        "Splitting {rows} rows with proportion {prop} leaves one side empty ({analysis} analysis / {assessment} assessment)."
    )]
    EmptyPartition {
        rows: usize,
        prop: f64,
        analysis: usize,
        assessment: usize,
    },
    #[error("At least one resample is required.")]
    NoResamples,
}

pub(crate) fn validate_proportion(prop: f64) -> Result<(), SplitError> {
    if !(prop > 0.0 && prop < 1.0) {
        return Err(SplitError::InvalidProportion(prop));
    }
    Ok(())
}

/// Randomly assigns `floor(n * prop)` rows to training and the rest to test.
/// No stratification is applied.
pub fn initial_split(n: usize, prop: f64, seed: u64) -> Result<Split, SplitError> {
    validate_proportion(prop)?;
    let n_analysis = (n as f64 * prop).floor() as usize;
    if n_analysis == 0 || n_analysis == n {
        return Err(SplitError::EmptyPartition {
            rows: n,
            prop,
            analysis: n_analysis,
            assessment: n - n_analysis,
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let analysis = sample(&mut rng, n, n_analysis).into_vec();
    let split = Split::from_analysis(n, analysis);
    log::info!(
        "Initial split: {} training rows, {} test rows",
        split.analysis.len(),
        split.assessment.len()
    );
    Ok(split)
}

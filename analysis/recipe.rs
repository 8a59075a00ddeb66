//! # Preprocessing Recipes
//!
//! A `Recipe` is an ordered list of preprocessing steps. Prepping it on a
//! training table estimates everything the steps need (which levels exist,
//! which columns are constant, column means and standard deviations) and
//! yields a `PreparedRecipe`. The prepared recipe then transforms any table
//! with the same columns into a `DesignMatrix`.
//!
//! All statistics are estimated from the table passed to `prep` and only
//! from it. `bake` never looks at the distribution of the data it transforms,
//! so assessment rows cannot leak into the fitted preprocessing.
//!
//! Down-sampling is a training-only step: it shrinks the majority class while
//! prepping and is skipped when baking.

use crate::types::{Column, ColumnData, DesignMatrix, Outcome, Table};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use thiserror::Error;

/// One preprocessing operation, in the order it is declared.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Randomly removes majority-class rows until every class has at most
    /// `under_ratio` times as many rows as the minority class.
    Downsample { under_ratio: f64 },
    /// Replaces each factor column with 0/1 indicator columns. With
    /// `one_hot = false` the first level is the reference and gets no column.
    Dummy { one_hot: bool },
    /// Drops numeric columns that hold a single distinct value.
    ZeroVariance,
    /// Centers and scales numeric columns to mean 0 and standard deviation 1.
    Normalize,
}

#[derive(Error, Debug, PartialEq)]
pub enum RecipeError {
    #[error("Cannot prep a recipe on an empty table.")]
    EmptyTable,
    #[error("Down-sampling needs both outcome classes, but no '{0}' rows are present.")]
    EmptyClass(Outcome),
    #[error("Down-sampling ratio must be at least 1, got {0}.")]
    InvalidRatio(f64),
    #[error("Column '{0}' was present when the recipe was prepped but is missing now.")]
    MissingColumn(String),
    #[error("Column '{column}' holds level '{level}', which was not seen when the recipe was prepped.")]
    UnseenLevel { column: String, level: String },
    #[error(
        "Column '{0}' is still categorical after all steps. Add a dummy step to encode it."
    )]
    NonNumericColumn(String),
    #[error("Column '{column}' is numeric now but was a factor when prepped (or the reverse).")]
    ColumnTypeChanged { column: String },
}

/// An unprepped, declarative preprocessing recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    steps: Vec<Step>,
    seed: u64,
}

impl Recipe {
    /// An empty recipe. `seed` drives the random steps.
    pub fn new(seed: u64) -> Self {
        Recipe {
            steps: Vec::new(),
            seed,
        }
    }

    pub fn step_downsample(mut self, under_ratio: f64) -> Self {
        self.steps.push(Step::Downsample { under_ratio });
        self
    }

    pub fn step_dummy(mut self, one_hot: bool) -> Self {
        self.steps.push(Step::Dummy { one_hot });
        self
    }

    pub fn step_zv(mut self) -> Self {
        self.steps.push(Step::ZeroVariance);
        self
    }

    pub fn step_normalize(mut self) -> Self {
        self.steps.push(Step::Normalize);
        self
    }

    /// The same steps with a different random seed. Used to give every
    /// resample its own down-sampling draw.
    pub fn reseeded(&self, seed: u64) -> Recipe {
        Recipe {
            steps: self.steps.clone(),
            seed,
        }
    }

    /// Estimates every step on `training` and returns the fitted recipe along
    /// with the processed training data.
    pub fn prep(&self, training: &Table) -> Result<PreparedRecipe, RecipeError> {
        if training.n_rows() == 0 {
            return Err(RecipeError::EmptyTable);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut current = training.clone();
        let mut trained = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let fitted = match step {
                Step::Downsample { under_ratio } => {
                    current = downsample(&current, *under_ratio, &mut rng)?;
                    TrainedStep::Downsample
                }
                Step::Dummy { one_hot } => {
                    let encodings = current
                        .columns
                        .iter()
                        .filter_map(|c| match &c.data {
                            ColumnData::Factor(f) => Some(DummyEncoding {
                                column: c.name.clone(),
                                levels: f.levels.clone(),
                                one_hot: *one_hot,
                            }),
                            ColumnData::Numeric(_) => None,
                        })
                        .collect();
                    TrainedStep::Dummy { encodings }
                }
                Step::ZeroVariance => {
                    let removed = current
                        .columns
                        .iter()
                        .filter(|c| match &c.data {
                            ColumnData::Numeric(v) => is_constant(v),
                            ColumnData::Factor(_) => false,
                        })
                        .map(|c| c.name.clone())
                        .collect_vec();
                    if !removed.is_empty() {
                        log::debug!("Zero-variance filter removes: {}", removed.iter().join(", "));
                    }
                    TrainedStep::ZeroVariance { removed }
                }
                Step::Normalize => {
                    let stats = current
                        .columns
                        .iter()
                        .filter_map(|c| match &c.data {
                            ColumnData::Numeric(v) => Some(NormalizationStats::estimate(&c.name, v)),
                            ColumnData::Factor(_) => None,
                        })
                        .collect();
                    TrainedStep::Normalize { stats }
                }
            };
            if !matches!(fitted, TrainedStep::Downsample) {
                current = fitted.apply(current)?;
            }
            trained.push(fitted);
        }

        let juiced = to_design(&current)?;
        Ok(PreparedRecipe {
            input_columns: training.columns.iter().map(|c| c.name.clone()).collect(),
            steps: trained,
            juiced,
        })
    }
}

/// Fitted encoding for one factor column.
#[derive(Debug, Clone, PartialEq)]
pub struct DummyEncoding {
    pub column: String,
    pub levels: Vec<String>,
    pub one_hot: bool,
}

impl DummyEncoding {
    fn encoded_levels(&self) -> &[String] {
        if self.one_hot {
            &self.levels
        } else {
            &self.levels[1.min(self.levels.len())..]
        }
    }

    /// Indicator column name. Levels that do not start with a letter get an
    /// `X` prefix so names stay identifier-like (`sex_X1`).
    fn indicator_name(&self, level: &str) -> String {
        if level.chars().next().is_some_and(|c| c.is_alphabetic()) {
            format!("{}_{}", self.column, level)
        } else {
            format!("{}_X{}", self.column, level)
        }
    }
}

/// Training mean and sample standard deviation of one numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationStats {
    pub column: String,
    pub mean: f64,
    pub sd: f64,
}

impl NormalizationStats {
    fn estimate(column: &str, values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let sd = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        NormalizationStats {
            column: column.to_string(),
            mean,
            sd,
        }
    }

    fn transform(&self, value: f64) -> f64 {
        if self.sd > 0.0 && self.sd.is_finite() {
            (value - self.mean) / self.sd
        } else {
            value - self.mean
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TrainedStep {
    Downsample,
    Dummy { encodings: Vec<DummyEncoding> },
    ZeroVariance { removed: Vec<String> },
    Normalize { stats: Vec<NormalizationStats> },
}

impl TrainedStep {
    fn apply(&self, mut table: Table) -> Result<Table, RecipeError> {
        match self {
            TrainedStep::Downsample => Ok(table),
            TrainedStep::Dummy { encodings } => {
                for encoding in encodings {
                    let position = table
                        .columns
                        .iter()
                        .position(|c| c.name == encoding.column)
                        .ok_or_else(|| RecipeError::MissingColumn(encoding.column.clone()))?;
                    let column = table.columns.remove(position);
                    let factor = match column.data {
                        ColumnData::Factor(f) => f,
                        ColumnData::Numeric(_) => {
                            return Err(RecipeError::ColumnTypeChanged {
                                column: column.name,
                            });
                        }
                    };
                    // Map this table's codes onto the prepped level order.
                    let mut remap = Vec::with_capacity(factor.levels.len());
                    for level in &factor.levels {
                        remap.push(encoding.levels.iter().position(|l| l == level));
                    }
                    let mut codes = Vec::with_capacity(factor.codes.len());
                    for &code in &factor.codes {
                        let mapped = remap[code].ok_or_else(|| RecipeError::UnseenLevel {
                            column: encoding.column.clone(),
                            level: factor.levels[code].clone(),
                        })?;
                        codes.push(mapped);
                    }
                    for level in encoding.encoded_levels() {
                        let target = encoding
                            .levels
                            .iter()
                            .position(|l| l == level)
                            .unwrap_or(usize::MAX);
                        let values = codes
                            .iter()
                            .map(|&c| if c == target { 1.0 } else { 0.0 })
                            .collect();
                        table
                            .columns
                            .push(Column::numeric(encoding.indicator_name(level), values));
                    }
                }
                Ok(table)
            }
            TrainedStep::ZeroVariance { removed } => {
                table.columns.retain(|c| !removed.contains(&c.name));
                Ok(table)
            }
            TrainedStep::Normalize { stats } => {
                for stat in stats {
                    let column = table
                        .columns
                        .iter_mut()
                        .find(|c| c.name == stat.column)
                        .ok_or_else(|| RecipeError::MissingColumn(stat.column.clone()))?;
                    match &mut column.data {
                        ColumnData::Numeric(values) => {
                            values.iter_mut().for_each(|v| *v = stat.transform(*v));
                        }
                        ColumnData::Factor(_) => {
                            return Err(RecipeError::ColumnTypeChanged {
                                column: stat.column.clone(),
                            });
                        }
                    }
                }
                Ok(table)
            }
        }
    }
}

/// A recipe whose statistics have been estimated on a training table.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecipe {
    input_columns: Vec<String>,
    steps: Vec<TrainedStep>,
    juiced: DesignMatrix,
}

impl PreparedRecipe {
    /// The processed training data, down-sampled and transformed.
    pub fn juice(&self) -> &DesignMatrix {
        &self.juiced
    }

    /// Names of the model input columns produced by this recipe.
    pub fn output_columns(&self) -> &[String] {
        &self.juiced.names
    }

    /// Normalization statistics learned while prepping, if the recipe normalizes.
    pub fn normalization(&self) -> Option<&[NormalizationStats]> {
        self.steps.iter().find_map(|s| match s {
            TrainedStep::Normalize { stats } => Some(stats.as_slice()),
            _ => None,
        })
    }

    /// Applies the fitted steps to new data. Training-only steps are skipped.
    pub fn bake(&self, table: &Table) -> Result<DesignMatrix, RecipeError> {
        let mut columns = Vec::with_capacity(self.input_columns.len());
        for name in &self.input_columns {
            let column = table
                .column(name)
                .ok_or_else(|| RecipeError::MissingColumn(name.clone()))?;
            columns.push(column.clone());
        }
        let mut current = Table {
            columns,
            outcome: table.outcome.clone(),
        };
        for step in &self.steps {
            current = step.apply(current)?;
        }
        to_design(&current)
    }
}

fn is_constant(values: &[f64]) -> bool {
    match values.first() {
        Some(first) => values.iter().all(|v| v == first),
        None => true,
    }
}

fn downsample(table: &Table, under_ratio: f64, rng: &mut StdRng) -> Result<Table, RecipeError> {
    if !(under_ratio >= 1.0) {
        return Err(RecipeError::InvalidRatio(under_ratio));
    }
    let (survived, died) = table.class_counts();
    if survived == 0 {
        return Err(RecipeError::EmptyClass(Outcome::Survived));
    }
    if died == 0 {
        return Err(RecipeError::EmptyClass(Outcome::Died));
    }
    let target = (survived.min(died) as f64 * under_ratio).floor() as usize;

    let mut keep = Vec::with_capacity(2 * target);
    for class in [Outcome::Survived, Outcome::Died] {
        let rows: Vec<usize> = (0..table.n_rows())
            .filter(|&i| table.outcome[i] == class)
            .collect();
        if rows.len() <= target {
            keep.extend(rows);
        } else {
            keep.extend(sample(rng, rows.len(), target).into_iter().map(|k| rows[k]));
        }
    }
    keep.sort_unstable();
    log::debug!(
        "Down-sampled {} survived / {} died to {} rows",
        survived,
        died,
        keep.len()
    );
    Ok(table.take(&keep))
}

fn to_design(table: &Table) -> Result<DesignMatrix, RecipeError> {
    let n = table.n_rows();
    let mut x = Array2::zeros((n, table.columns.len()));
    let mut names = Vec::with_capacity(table.columns.len());
    for (j, column) in table.columns.iter().enumerate() {
        match &column.data {
            ColumnData::Numeric(values) => {
                x.column_mut(j).assign(&Array1::from_vec(values.clone()));
            }
            ColumnData::Factor(_) => return Err(RecipeError::NonNumericColumn(column.name.clone())),
        }
        names.push(column.name.clone());
    }
    let y = table.outcome.iter().map(|o| o.as_response()).collect();
    Ok(DesignMatrix { names, x, y })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Factor;
    use approx::assert_abs_diff_eq;

    fn imbalanced_table() -> Table {
        let n = 40;
        let outcome: Vec<Outcome> = (0..n)
            .map(|i| if i % 4 == 0 { Outcome::Died } else { Outcome::Survived })
            .collect();
        Table {
            columns: vec![
                Column::numeric("age", (0..n).map(|i| 40.0 + i as f64).collect()),
                Column::numeric("serum_creatinine", (0..n).map(|i| 0.5 + (i % 7) as f64 * 0.3).collect()),
                Column::numeric("constant", vec![3.0; n]),
                Column::factor(
                    "smoking",
                    Factor::from_binary(&(0..n).map(|i| (i % 3 == 0) as u8 as f64).collect::<Vec<_>>()),
                ),
            ],
            outcome,
        }
    }

    fn notebook_recipe(seed: u64) -> Recipe {
        Recipe::new(seed)
            .step_downsample(1.0)
            .step_dummy(false)
            .step_zv()
            .step_normalize()
    }

    #[test]
    fn downsampling_ratio_below_one_is_rejected() {
        for ratio in [0.5, 0.0, f64::NAN] {
            let err = Recipe::new(3)
                .step_downsample(ratio)
                .prep(&imbalanced_table())
                .unwrap_err();
            assert!(matches!(err, RecipeError::InvalidRatio(r) if r.is_nan() || r == ratio));
        }
    }

    #[test]
    fn downsampling_balances_classes() {
        let prepared = notebook_recipe(1).prep(&imbalanced_table()).unwrap();
        let died = prepared.juice().y.iter().filter(|&&v| v == 1.0).count();
        let survived = prepared.juice().n_rows() - died;
        assert_eq!(died, 10);
        assert_eq!(survived, 10);
    }

    #[test]
    fn juiced_columns_are_standardized() {
        let prepared = notebook_recipe(2).prep(&imbalanced_table()).unwrap();
        let x = &prepared.juice().x;
        for j in 0..x.ncols() {
            let col = x.column(j);
            assert_abs_diff_eq!(col.mean().unwrap(), 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(col.std(1.0), 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn dummy_and_zero_variance_shape_the_output_columns() {
        let prepared = notebook_recipe(3).prep(&imbalanced_table()).unwrap();
        assert_eq!(
            prepared.output_columns(),
            &["age".to_string(), "serum_creatinine".to_string(), "smoking_X1".to_string()]
        );

        let one_hot = Recipe::new(3).step_dummy(true).prep(&imbalanced_table()).unwrap();
        assert!(one_hot.output_columns().contains(&"smoking_X0".to_string()));
        assert!(one_hot.output_columns().contains(&"smoking_X1".to_string()));
        assert!(one_hot.output_columns().contains(&"constant".to_string()));
    }

    #[test]
    fn bake_reuses_training_statistics() {
        let table = imbalanced_table();
        let prepared = notebook_recipe(4).prep(&table).unwrap();
        let stats = prepared.normalization().unwrap();
        let age = stats.iter().find(|s| s.column == "age").unwrap();

        let fresh = table.take(&[0, 1, 2]);
        let baked = prepared.bake(&fresh).unwrap();
        // Baking keeps every row: down-sampling is training-only.
        assert_eq!(baked.n_rows(), 3);
        assert_abs_diff_eq!(baked.x[[0, 0]], (40.0 - age.mean) / age.sd, epsilon = 1e-12);
        assert_abs_diff_eq!(baked.x[[2, 0]], (42.0 - age.mean) / age.sd, epsilon = 1e-12);
    }

    #[test]
    fn bake_detects_missing_columns_and_unseen_levels() {
        let table = imbalanced_table();
        let prepared = notebook_recipe(5).prep(&table).unwrap();

        let mut missing = table.clone();
        missing.columns.retain(|c| c.name != "age");
        assert_eq!(
            prepared.bake(&missing).unwrap_err(),
            RecipeError::MissingColumn("age".to_string())
        );

        let mut unseen = table.clone();
        for column in unseen.columns.iter_mut() {
            if let ColumnData::Factor(f) = &mut column.data {
                f.levels.push("2".to_string());
                f.codes[0] = 2;
            }
        }
        assert_eq!(
            prepared.bake(&unseen).unwrap_err(),
            RecipeError::UnseenLevel {
                column: "smoking".to_string(),
                level: "2".to_string()
            }
        );
    }

    #[test]
    fn factors_without_dummy_step_are_rejected() {
        let err = Recipe::new(0).step_normalize().prep(&imbalanced_table()).unwrap_err();
        assert_eq!(err, RecipeError::NonNumericColumn("smoking".to_string()));
    }

    #[test]
    fn downsampling_requires_both_classes() {
        let mut table = imbalanced_table();
        table.outcome = vec![Outcome::Survived; table.n_rows()];
        assert_eq!(
            Recipe::new(0).step_downsample(1.0).step_dummy(false).prep(&table).unwrap_err(),
            RecipeError::EmptyClass(Outcome::Died)
        );
    }
}

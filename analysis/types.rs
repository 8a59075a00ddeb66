//! Core in-memory tables shared by every pipeline stage.
//!
//! A `Table` is the typed view of the patient records after recoding: named
//! columns that are either numeric or categorical, plus the outcome for each
//! row. A `DesignMatrix` is what a recipe produces from a `Table`: a dense,
//! all-numeric matrix with a 0/1 response, which is the only input the models
//! understand.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The binary mortality outcome. `Died` is the event level for every metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Survived,
    Died,
}

impl Outcome {
    /// Decodes a `DEATH_EVENT` value. Callers validate the 0/1 domain first.
    pub fn from_indicator(value: f64) -> Self {
        if value >= 0.5 {
            Outcome::Died
        } else {
            Outcome::Survived
        }
    }

    pub fn is_event(self) -> bool {
        matches!(self, Outcome::Died)
    }

    /// Numeric response used by the models: 1.0 for the event, 0.0 otherwise.
    pub fn as_response(self) -> f64 {
        if self.is_event() { 1.0 } else { 0.0 }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Survived => write!(f, "survived"),
            Outcome::Died => write!(f, "died"),
        }
    }
}

/// A categorical column stored as level codes.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    pub levels: Vec<String>,
    pub codes: Vec<usize>,
}

impl Factor {
    /// Builds a factor from 0/1 indicator values with levels `"0"` and `"1"`.
    pub fn from_binary(values: &[f64]) -> Self {
        Factor {
            levels: vec!["0".to_string(), "1".to_string()],
            codes: values.iter().map(|&v| usize::from(v >= 0.5)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Factor(Factor),
}

impl ColumnData {
    fn take(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Numeric(values) => {
                ColumnData::Numeric(rows.iter().map(|&r| values[r]).collect())
            }
            ColumnData::Factor(factor) => ColumnData::Factor(Factor {
                levels: factor.levels.clone(),
                codes: rows.iter().map(|&r| factor.codes[r]).collect(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Column {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn factor(name: impl Into<String>, factor: Factor) -> Self {
        Column {
            name: name.into(),
            data: ColumnData::Factor(factor),
        }
    }
}

/// Predictor columns plus the outcome, one entry per patient.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
    pub outcome: Vec<Outcome>,
}

impl Table {
    pub fn n_rows(&self) -> usize {
        self.outcome.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns a new table holding only `rows`, in the given order.
    pub fn take(&self, rows: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.take(rows),
                })
                .collect(),
            outcome: rows.iter().map(|&r| self.outcome[r]).collect(),
        }
    }

    /// Number of rows per outcome class as `(survived, died)`.
    pub fn class_counts(&self) -> (usize, usize) {
        let died = self.outcome.iter().filter(|o| o.is_event()).count();
        (self.outcome.len() - died, died)
    }
}

/// Dense model input: `x` is `[n_rows, names.len()]`, `y` is 1.0 for `Died`.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub names: Vec<String>,
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl DesignMatrix {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.y.iter().map(|&v| Outcome::from_indicator(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> Table {
        Table {
            columns: vec![
                Column::numeric("age", vec![50.0, 60.0, 70.0]),
                Column::factor("sex", Factor::from_binary(&[1.0, 0.0, 1.0])),
            ],
            outcome: vec![Outcome::Survived, Outcome::Died, Outcome::Died],
        }
    }

    #[test]
    fn take_reorders_every_column_and_the_outcome() {
        let table = small_table().take(&[2, 0]);
        assert_eq!(table.n_rows(), 2);
        match &table.column("age").unwrap().data {
            ColumnData::Numeric(v) => assert_eq!(v, &vec![70.0, 50.0]),
            other => panic!("expected numeric column, got {other:?}"),
        }
        match &table.column("sex").unwrap().data {
            ColumnData::Factor(f) => {
                assert_eq!(f.codes, vec![1, 1]);
                assert_eq!(f.levels, vec!["0", "1"]);
            }
            other => panic!("expected factor column, got {other:?}"),
        }
        assert_eq!(table.outcome, vec![Outcome::Died, Outcome::Survived]);
    }

    #[test]
    fn class_counts_split_survivors_and_deaths() {
        assert_eq!(small_table().class_counts(), (1, 2));
    }

    #[test]
    fn outcome_response_encoding() {
        assert_eq!(Outcome::Died.as_response(), 1.0);
        assert_eq!(Outcome::Survived.as_response(), 0.0);
        assert_eq!(Outcome::from_indicator(1.0), Outcome::Died);
        assert_eq!(Outcome::from_indicator(0.0), Outcome::Survived);
    }
}

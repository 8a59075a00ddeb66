//! Type recoding and feature selection.
//!
//! The raw records are all numeric. Before modelling, the 0/1 clinical
//! indicators become factors, `DEATH_EVENT` becomes the outcome, and the
//! predictor set is reduced to the columns the models are trained on.

use crate::data::{ColumnKind, PREDICTOR_COLUMNS, PatientRecords};
use crate::types::{Column, Factor, Outcome, Table};
use itertools::Itertools;
use std::collections::HashSet;
use thiserror::Error;

/// The reduced predictor set used for every model.
pub const DEFAULT_FEATURES: [&str; 4] = ["time", "serum_creatinine", "ejection_fraction", "age"];

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("Feature '{0}' is not a column of the patient table.")]
    UnknownFeature(String),
    #[error("Feature '{0}' was selected more than once.")]
    DuplicateFeature(String),
    #[error("At least one feature must be selected.")]
    EmptySelection,
}

/// Recodes binary indicators as factors and turns `DEATH_EVENT` into the outcome.
/// The raw outcome column does not survive into the table.
pub fn recode_factors(records: &PatientRecords) -> Table {
    let columns = PREDICTOR_COLUMNS
        .iter()
        .enumerate()
        .map(|(j, (name, kind))| {
            let values = records.predictors.column(j).to_vec();
            match kind {
                ColumnKind::Continuous => Column::numeric(*name, values),
                ColumnKind::Binary => Column::factor(*name, Factor::from_binary(&values)),
            }
        })
        .collect();

    let outcome = records
        .death_event
        .iter()
        .map(|&v| Outcome::from_indicator(v))
        .collect();

    Table { columns, outcome }
}

/// Keeps `names` (in the given order) plus the outcome.
pub fn select_features<S: AsRef<str>>(table: &Table, names: &[S]) -> Result<Table, FeatureError> {
    if names.is_empty() {
        return Err(FeatureError::EmptySelection);
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        if !seen.insert(name) {
            return Err(FeatureError::DuplicateFeature(name.to_string()));
        }
        let column = table
            .column(name)
            .ok_or_else(|| FeatureError::UnknownFeature(name.to_string()))?;
        columns.push(column.clone());
    }

    log::info!("Selected features: {}", names.iter().map(|n| n.as_ref()).join(", "));

    Ok(Table {
        columns,
        outcome: table.outcome.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnData;
    use ndarray::{Array1, Array2};

    fn records() -> PatientRecords {
        let n = 4;
        let mut predictors = Array2::zeros((n, PREDICTOR_COLUMNS.len()));
        for i in 0..n {
            for j in 0..PREDICTOR_COLUMNS.len() {
                predictors[[i, j]] = match PREDICTOR_COLUMNS[j].1 {
                    ColumnKind::Binary => ((i + j) % 2) as f64,
                    ColumnKind::Continuous => (10 * j + i) as f64,
                };
            }
        }
        PatientRecords {
            predictors,
            death_event: Array1::from_vec(vec![0.0, 1.0, 1.0, 0.0]),
        }
    }

    #[test]
    fn binary_indicators_become_factors() {
        let table = recode_factors(&records());
        assert_eq!(table.columns.len(), 12);
        for (name, kind) in PREDICTOR_COLUMNS.iter() {
            let column = table.column(name).unwrap();
            match (kind, &column.data) {
                (ColumnKind::Binary, ColumnData::Factor(f)) => {
                    assert_eq!(f.levels, vec!["0".to_string(), "1".to_string()])
                }
                (ColumnKind::Continuous, ColumnData::Numeric(_)) => {}
                other => panic!("column {name} recoded unexpectedly: {other:?}"),
            }
        }
        assert!(table.column("DEATH_EVENT").is_none());
        assert_eq!(
            table.outcome,
            vec![Outcome::Survived, Outcome::Died, Outcome::Died, Outcome::Survived]
        );
    }

    #[test]
    fn selection_keeps_requested_order() {
        let table = recode_factors(&records());
        let selected = select_features(&table, &DEFAULT_FEATURES).unwrap();
        assert_eq!(
            selected.column_names(),
            vec!["time", "serum_creatinine", "ejection_fraction", "age"]
        );
        assert_eq!(selected.n_rows(), 4);
        assert_eq!(selected.outcome, table.outcome);
    }

    #[test]
    fn selection_rejects_unknown_and_duplicate_names() {
        let table = recode_factors(&records());
        assert_eq!(
            select_features(&table, &["age", "cholesterol"]).unwrap_err(),
            FeatureError::UnknownFeature("cholesterol".to_string())
        );
        assert_eq!(
            select_features(&table, &["age", "age"]).unwrap_err(),
            FeatureError::DuplicateFeature("age".to_string())
        );
        let none: [&str; 0] = [];
        assert_eq!(select_features(&table, &none).unwrap_err(), FeatureError::EmptySelection);
    }
}

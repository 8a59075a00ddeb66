//! # Data Loading and Validation Module
//!
//! This module is the exclusive entry point for the patient-record CSV.
//! It reads the file, validates it against the fixed clinical schema, and
//! returns clean `ndarray` structures for the rest of the pipeline.
//!
//! - Strict Schema: Column names are not configurable. The file must carry the
//!   twelve clinical predictors and `DEATH_EVENT`, spelled exactly as in the
//!   published heart-failure records dataset.
//! - User-Centric Errors: Failures are assumed to be user-input errors.
//!   The `DataError` enum is designed to provide clear, actionable feedback.

use ndarray::{Array1, Array2, ShapeBuilder};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Name of the outcome column in the input file.
pub const OUTCOME_COLUMN: &str = "DEATH_EVENT";

/// Measurement type of a clinical predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Continuous,
    /// A 0/1 indicator, recoded to a factor before modelling.
    Binary,
}

/// The predictor columns in canonical order.
pub const PREDICTOR_COLUMNS: [(&str, ColumnKind); 12] = [
    ("age", ColumnKind::Continuous),
    ("anaemia", ColumnKind::Binary),
    ("creatinine_phosphokinase", ColumnKind::Continuous),
    ("diabetes", ColumnKind::Binary),
    ("ejection_fraction", ColumnKind::Continuous),
    ("high_blood_pressure", ColumnKind::Binary),
    ("platelets", ColumnKind::Continuous),
    ("serum_creatinine", ColumnKind::Continuous),
    ("serum_sodium", ColumnKind::Continuous),
    ("sex", ColumnKind::Binary),
    ("smoking", ColumnKind::Binary),
    ("time", ColumnKind::Continuous),
];

/// Validated patient records.
#[derive(Debug, Clone)]
pub struct PatientRecords {
    /// Predictor values, shape `[n_patients, PREDICTOR_COLUMNS.len()]`,
    /// columns in `PREDICTOR_COLUMNS` order.
    pub predictors: Array2<f64>,
    /// The 0/1 `DEATH_EVENT` column.
    pub death_event: Array1<f64>,
}

impl PatientRecords {
    pub fn n_patients(&self) -> usize {
        self.death_event.len()
    }

    pub fn predictor_names() -> Vec<String> {
        PREDICTOR_COLUMNS
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Raw predictor values of one column, by name.
    pub fn column(&self, name: &str) -> Option<Array1<f64>> {
        PREDICTOR_COLUMNS
            .iter()
            .position(|(n, _)| *n == name)
            .map(|j| self.predictors.column(j).to_owned())
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error(
        "Column '{column_name}' must contain only 0 or 1, but row {row} holds {value}."
    )]
    NonBinaryValue {
        column_name: String,
        row: usize,
        value: f64,
    },
    #[error(
        "Input file contains only {found} data rows, but at least {required} are required to split and resample."
    )]
    InsufficientRows { found: usize, required: usize },
}

/// Loads and validates the heart-failure patient records from a CSV file.
pub fn load_patient_records(path: &Path) -> Result<PatientRecords, DataError> {
    internal::load_records(path)
}

/// Internal module for the loading logic.
mod internal {
    use super::*;

    const MINIMUM_ROWS: usize = 20;

    fn validate_is_finite(values: &[f64], column_name: &str) -> Result<(), DataError> {
        if values.iter().any(|&v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(())
    }

    fn validate_is_binary(values: &[f64], column_name: &str) -> Result<(), DataError> {
        if let Some((row, &value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| **v != 0.0 && **v != 1.0)
        {
            return Err(DataError::NonBinaryValue {
                column_name: column_name.to_string(),
                row: row + 1,
                value,
            });
        }
        Ok(())
    }

    fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        // A non-strict cast turns unparsable strings into nulls.
        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        validate_is_finite(&values, column_name)?;
        Ok(values)
    }

    pub(super) fn load_records(path: &Path) -> Result<PatientRecords, DataError> {
        log::info!("Loading patient records from '{}'", path.display());

        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    // Whole-number prefixes must not pin a column to an integer dtype.
                    .with_infer_schema_length(None)
                    .with_parse_options(CsvParseOptions::default().with_separator(b',')),
            )
            .finish()?;

        if df.height() < MINIMUM_ROWS {
            return Err(DataError::InsufficientRows {
                found: df.height(),
                required: MINIMUM_ROWS,
            });
        }

        let columns_set: HashSet<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        for (name, _) in PREDICTOR_COLUMNS.iter() {
            if !columns_set.contains(*name) {
                return Err(DataError::ColumnNotFound(name.to_string()));
            }
        }
        if !columns_set.contains(OUTCOME_COLUMN) {
            return Err(DataError::ColumnNotFound(OUTCOME_COLUMN.to_string()));
        }

        let n = df.height();
        let mut buffer = Vec::with_capacity(n * PREDICTOR_COLUMNS.len());
        for (name, kind) in PREDICTOR_COLUMNS.iter() {
            let mut column = extract_numeric_column(&df, name)?;
            if *kind == ColumnKind::Binary {
                validate_is_binary(&column, name)?;
            }
            buffer.append(&mut column);
        }
        // Columns were appended one after another, so the buffer is column-major.
        let predictors = Array2::from_shape_vec((n, PREDICTOR_COLUMNS.len()).f(), buffer)
            .map_err(|e| {
                DataError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                ))
            })?;

        let outcome = extract_numeric_column(&df, OUTCOME_COLUMN)?;
        validate_is_binary(&outcome, OUTCOME_COLUMN)?;
        let death_event = Array1::from_vec(outcome);

        log::info!(
            "Validated {} patient records ({} deaths)",
            n,
            death_event.iter().filter(|&&v| v == 1.0).count()
        );

        Ok(PatientRecords {
            predictors,
            death_event,
        })
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    const HEADER: &str = "age,anaemia,creatinine_phosphokinase,diabetes,ejection_fraction,high_blood_pressure,platelets,serum_creatinine,serum_sodium,sex,smoking,time,DEATH_EVENT";

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn generate_csv_content(header: &str, data_row: &str, num_rows: usize) -> String {
        let data_rows = std::iter::repeat(data_row)
            .take(num_rows)
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n{}", header, data_rows)
    }

    fn varied_rows(count: usize) -> String {
        let mut rows = vec![HEADER.to_string()];
        for i in 0..count {
            rows.push(format!(
                "{},{},{},{},{},{},{},{:.1},{},{},{},{},{}",
                40 + i,
                i % 2,
                100 + 10 * i,
                (i + 1) % 2,
                20 + i,
                0,
                250000 + i,
                1.0 + i as f64 / 10.0,
                135,
                1,
                0,
                10 * i,
                usize::from(i % 3 == 0),
            ));
        }
        rows.join("\n")
    }

    #[test]
    fn test_load_patient_records_success() {
        let file = create_test_csv(&varied_rows(30)).unwrap();
        let records = load_patient_records(file.path()).unwrap();

        assert_eq!(records.n_patients(), 30);
        assert_eq!(records.predictors.shape(), &[30, 12]);
        assert_abs_diff_eq!(records.predictors[[0, 0]], 40.0, epsilon = 1e-12);
        assert_abs_diff_eq!(records.predictors[[29, 0]], 69.0, epsilon = 1e-12);
        assert_abs_diff_eq!(records.column("serum_creatinine").unwrap()[5], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(records.column("time").unwrap()[3], 30.0, epsilon = 1e-12);
        assert_eq!(records.death_event.iter().filter(|&&v| v == 1.0).count(), 10);
        assert!(records.column("cholesterol").is_none());
    }

    #[test]
    fn test_fractional_value_after_integer_prefix_is_read() {
        let mut content = varied_rows(150);
        content = content
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 130 {
                    line.replacen("169,", "60.667,", 1)
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let file = create_test_csv(&content).unwrap();
        let records = load_patient_records(file.path()).unwrap();
        assert_eq!(records.n_patients(), 150);
        assert_abs_diff_eq!(records.column("age").unwrap()[129], 60.667, epsilon = 1e-12);
        assert_abs_diff_eq!(records.column("age").unwrap()[0], 40.0, epsilon = 1e-12);
    }

    #[test]
    fn test_extra_columns_are_ignored_and_order_is_canonical() {
        let header = format!("patient_id,{}", HEADER.split(',').rev().collect::<Vec<_>>().join(","));
        let row = "7,1,120,0,1,138,1.1,263358,1,38,0,582,0,75";
        let file = create_test_csv(&generate_csv_content(&header, row, 25)).unwrap();
        let records = load_patient_records(file.path()).unwrap();
        assert_abs_diff_eq!(records.column("age").unwrap()[0], 75.0, epsilon = 1e-12);
        assert_abs_diff_eq!(records.column("time").unwrap()[0], 120.0, epsilon = 1e-12);
        assert_abs_diff_eq!(records.death_event[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_error_column_not_found() {
        let header = HEADER.replace(",time", ",follow_up");
        let row = "75,0,582,0,20,1,265000,1.9,130,1,0,4,1";
        let file = create_test_csv(&generate_csv_content(&header, row, 30)).unwrap();
        match load_patient_records(file.path()).unwrap_err() {
            DataError::ColumnNotFound(col) => assert_eq!(col, "time"),
            other => panic!("Expected ColumnNotFound(time), got {:?}", other),
        }
    }

    #[test]
    fn test_error_missing_values() {
        let row = "75,0,582,0,,1,265000,1.9,130,1,0,4,1";
        let file = create_test_csv(&generate_csv_content(HEADER, row, 30)).unwrap();
        match load_patient_records(file.path()) {
            Err(DataError::MissingValuesFound(col)) => assert_eq!(col, "ejection_fraction"),
            other => panic!("Expected MissingValuesFound, got {:?}", other),
        }
    }

    #[test]
    fn test_error_wrong_type() {
        let row = "75,0,582,0,20,1,265000,high,130,1,0,4,1";
        let file = create_test_csv(&generate_csv_content(HEADER, row, 30)).unwrap();
        match load_patient_records(file.path()) {
            Err(DataError::ColumnWrongType {
                column_name,
                expected_type,
                ..
            }) => {
                assert_eq!(column_name, "serum_creatinine");
                assert_eq!(expected_type, "f64 (numeric)");
            }
            other => panic!("Expected ColumnWrongType, got {:?}", other),
        }
    }

    #[test]
    fn test_error_non_binary_indicator() {
        let row = "75,0,582,2,20,1,265000,1.9,130,1,0,4,1";
        let file = create_test_csv(&generate_csv_content(HEADER, row, 30)).unwrap();
        match load_patient_records(file.path()).unwrap_err() {
            DataError::NonBinaryValue {
                column_name,
                row,
                value,
            } => {
                assert_eq!(column_name, "diabetes");
                assert_eq!(row, 1);
                assert_abs_diff_eq!(value, 2.0, epsilon = 1e-12);
            }
            other => panic!("Expected NonBinaryValue, got {:?}", other),
        }
    }

    #[test]
    fn test_error_insufficient_rows() {
        let file = create_test_csv(&varied_rows(5)).unwrap();
        match load_patient_records(file.path()).unwrap_err() {
            DataError::InsufficientRows { found, required } => {
                assert_eq!(found, 5);
                assert_eq!(required, 20);
            }
            other => panic!("Expected InsufficientRows, got {:?}", other),
        }
    }
}

//! Console summaries and on-disk artifacts of an analysis run.

use crate::glm::{CoefficientSummary, FitStatus, LogisticFit};
use crate::importance::VariableImportance;
use crate::metrics::{ConfusionMatrix, RocPoint};
use crate::models::ModelSpec;
use crate::tuning::{Metric, MetricSummary, TuneResults};
use crate::workflow::{AnalysisReport, ModelEvaluation, TestMetrics};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of tuning candidates shown on the console.
const SHOW_BEST: usize = 5;
const BAR_WIDTH: usize = 40;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write TSV artifact: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize the report to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

// ========================================================================================
//                                    Console output
// ========================================================================================

fn significance_stars(p: f64) -> &'static str {
    match p {
        p if p < 0.001 => "***",
        p if p < 0.01 => "**",
        p if p < 0.05 => "*",
        p if p < 0.1 => ".",
        _ => "",
    }
}

pub fn print_exploratory(fit: &LogisticFit) {
    println!("\n=== Exploratory logistic regression (all predictors) ===");
    println!(
        "{:<26} {:>12} {:>11} {:>9} {:>11}",
        "term", "estimate", "std.error", "z", "p.value"
    );
    for row in &fit.summary {
        println!(
            "{:<26} {:>12.5} {:>11.5} {:>9.3} {:>11.3e} {}",
            row.term,
            row.estimate,
            row.std_error,
            row.z_value,
            row.p_value,
            significance_stars(row.p_value)
        );
    }
    println!(
        "Null deviance {:.2}, residual deviance {:.2}, AIC {:.2}, IRLS iterations {}",
        fit.null_deviance, fit.deviance, fit.aic, fit.iterations
    );
    if fit.status != FitStatus::Converged {
        println!("Warning: fit status {:?}; estimates may be unreliable.", fit.status);
    }
}

/// Horizontal bars scaled to the largest absolute importance.
pub fn importance_bar_chart(importance: &[VariableImportance], width: usize) -> String {
    let name_width = importance.iter().map(|v| v.variable.len()).max().unwrap_or(0);
    let max = importance
        .iter()
        .map(|v| v.importance.abs())
        .fold(0.0_f64, f64::max);
    let mut out = String::new();
    for v in importance {
        let len = if max > 0.0 {
            ((v.importance.abs() / max) * width as f64).round() as usize
        } else {
            0
        };
        out.push_str(&format!(
            "{:<name_width$} | {:<width$} {:.4}\n",
            v.variable,
            "#".repeat(len),
            v.importance
        ));
    }
    out
}

fn describe_spec(spec: &ModelSpec) -> String {
    match spec {
        ModelSpec::Logistic(o) => format!("max_iterations={}, tolerance={:e}", o.max_iterations, o.tolerance),
        ModelSpec::Mlp(p) => format!(
            "hidden_units={}, epochs={}, dropout={}, penalty={}, activation={:?}",
            p.hidden_units, p.epochs, p.dropout, p.penalty, p.activation
        ),
        ModelSpec::Boost(p) => format!(
            "trees={}, tree_depth={}, min_n={}, loss_reduction={:.3e}, sample_size={:.3}, mtry={}, learn_rate={:.3e}",
            p.trees,
            p.tree_depth,
            p.min_n,
            p.loss_reduction,
            p.sample_size,
            p.mtry.map_or_else(|| "all".to_string(), |m| m.to_string()),
            p.learn_rate
        ),
    }
}

fn format_summary(s: &MetricSummary) -> String {
    format!("{:.4} (se {:.4}, n={})", s.mean, s.std_err, s.n)
}

fn print_tuning(results: &TuneResults) {
    println!("Top {SHOW_BEST} candidates by mean roc_auc:");
    for s in results.show_best(Metric::RocAuc, SHOW_BEST) {
        println!(
            "  #{:<3} roc_auc {}  accuracy {}\n       {}",
            s.candidate + 1,
            format_summary(&s.roc_auc),
            format_summary(&s.accuracy),
            describe_spec(&s.spec)
        );
    }
}

fn print_roc_summary(curve: &[RocPoint]) {
    // Youden's J picks the threshold that best balances both rates.
    let best = curve
        .iter()
        .filter(|p| p.threshold.is_finite())
        .max_by(|a, b| {
            (a.sensitivity + a.specificity).total_cmp(&(b.sensitivity + b.specificity))
        });
    if let Some(p) = best {
        println!(
            "ROC: {} points; best threshold {:.3} (sensitivity {:.3}, specificity {:.3})",
            curve.len(),
            p.threshold,
            p.sensitivity,
            p.specificity
        );
    }
}

fn print_evaluation(eval: &ModelEvaluation) {
    println!("\n=== Model: {} ===", eval.name);
    println!(
        "Resampled roc_auc  {}\nResampled accuracy {}",
        format_summary(&eval.selected.roc_auc),
        format_summary(&eval.selected.accuracy)
    );
    if eval.resampling.summaries.len() > 1 {
        print_tuning(&eval.resampling);
        println!("Selected: {}", describe_spec(&eval.selected.spec));
    }

    let last = &eval.last_fit;
    println!(
        "Test set: roc_auc {:.4}, accuracy {:.4}, brier {:.4}, log loss {:.4}",
        last.metrics.roc_auc, last.metrics.accuracy, last.metrics.brier_score, last.metrics.log_loss
    );
    println!("Confusion matrix:\n{}", last.confusion);
    println!(
        "sensitivity {:.3}, specificity {:.3}, precision {:.3}, F1 {:.3}, kappa {:.3}",
        last.confusion.sensitivity(),
        last.confusion.specificity(),
        last.confusion.precision(),
        last.confusion.f1(),
        last.confusion.kappa()
    );
    print_roc_summary(&last.roc_curve);
    println!("Variable importance:");
    print!("{}", importance_bar_chart(&last.importance, BAR_WIDTH));
}

/// Prints every section of the report to stdout.
pub fn print_report(report: &AnalysisReport) {
    print_exploratory(&report.exploratory);
    println!("\n=== Data ===");
    println!(
        "{} patients; {} training / {} test rows; training classes: {} survived, {} died",
        report.n_patients,
        report.n_train,
        report.n_test,
        report.train_class_counts.0,
        report.train_class_counts.1
    );
    println!("Predictors: {}", report.predictors.join(", "));
    println!("Model inputs after preprocessing: {}", report.recipe_columns.join(", "));
    for eval in &report.evaluations {
        print_evaluation(eval);
    }
}

// ========================================================================================
//                                      Artifacts
// ========================================================================================

#[derive(Serialize)]
struct ModelSection<'a> {
    name: &'a str,
    resample_roc_auc: MetricSummary,
    resample_accuracy: MetricSummary,
    test: TestMetrics,
    confusion: ConfusionMatrix,
    selected: &'a ModelSpec,
    importance: &'a [VariableImportance],
}

#[derive(Serialize)]
struct ReportFile<'a> {
    n_patients: usize,
    n_train: usize,
    n_test: usize,
    train_survived: usize,
    train_died: usize,
    predictors: &'a [String],
    recipe_columns: &'a [String],
    exploratory: &'a [CoefficientSummary],
    models: Vec<ModelSection<'a>>,
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, ReportError> {
    Ok(WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

fn write_roc_curve(path: &Path, curve: &[RocPoint]) -> Result<(), ReportError> {
    let mut w = tsv_writer(path)?;
    w.write_record(["threshold", "sensitivity", "specificity"])?;
    for p in curve {
        w.write_record([p.threshold.to_string(), p.sensitivity.to_string(), p.specificity.to_string()])?;
    }
    w.flush()?;
    Ok(())
}

fn write_importance(path: &Path, importance: &[VariableImportance]) -> Result<(), ReportError> {
    let mut w = tsv_writer(path)?;
    w.write_record(["variable", "importance"])?;
    for v in importance {
        w.write_record([v.variable.clone(), v.importance.to_string()])?;
    }
    w.flush()?;
    Ok(())
}

fn write_tuning(path: &Path, results: &TuneResults) -> Result<(), ReportError> {
    let mut w = tsv_writer(path)?;
    w.write_record([
        "candidate",
        "tree_depth",
        "min_n",
        "loss_reduction",
        "sample_size",
        "mtry",
        "learn_rate",
        "mean_roc_auc",
        "std_err_roc_auc",
        "mean_accuracy",
        "std_err_accuracy",
        "n",
    ])?;
    for s in &results.summaries {
        let params = match &s.spec {
            ModelSpec::Boost(p) => [
                p.tree_depth.to_string(),
                p.min_n.to_string(),
                p.loss_reduction.to_string(),
                p.sample_size.to_string(),
                p.mtry.map_or_else(String::new, |m| m.to_string()),
                p.learn_rate.to_string(),
            ],
            _ => Default::default(),
        };
        let mut record = vec![(s.candidate + 1).to_string()];
        record.extend(params);
        record.extend([
            s.roc_auc.mean.to_string(),
            s.roc_auc.std_err.to_string(),
            s.accuracy.mean.to_string(),
            s.accuracy.std_err.to_string(),
            s.roc_auc.n.to_string(),
        ]);
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

/// Writes every artifact into `dir`, creating it if needed, and returns the
/// paths written.
pub fn write_artifacts(report: &AnalysisReport, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for eval in &report.evaluations {
        let roc_path = dir.join(format!("roc_curve_{}.tsv", eval.name));
        write_roc_curve(&roc_path, &eval.last_fit.roc_curve)?;
        written.push(roc_path);

        let imp_path = dir.join(format!("importance_{}.tsv", eval.name));
        write_importance(&imp_path, &eval.last_fit.importance)?;
        written.push(imp_path);

        if eval.resampling.summaries.len() > 1 {
            let tune_path = dir.join("tuning_results.tsv");
            write_tuning(&tune_path, &eval.resampling)?;
            written.push(tune_path);
        }
    }

    let file = ReportFile {
        n_patients: report.n_patients,
        n_train: report.n_train,
        n_test: report.n_test,
        train_survived: report.train_class_counts.0,
        train_died: report.train_class_counts.1,
        predictors: &report.predictors,
        recipe_columns: &report.recipe_columns,
        exploratory: &report.exploratory.summary,
        models: report
            .evaluations
            .iter()
            .map(|e| ModelSection {
                name: e.name,
                resample_roc_auc: e.selected.roc_auc,
                resample_accuracy: e.selected.accuracy,
                test: e.last_fit.metrics,
                confusion: e.last_fit.confusion,
                selected: &e.selected.spec,
                importance: &e.last_fit.importance,
            })
            .collect(),
    };
    let toml_string = toml::to_string_pretty(&file)?;
    let toml_path = dir.join("report.toml");
    let mut out = BufWriter::new(fs::File::create(&toml_path)?);
    out.write_all(toml_string.as_bytes())?;
    out.flush()?;
    written.push(toml_path);

    log::info!("Wrote {} artifacts to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vi(variable: &str, importance: f64) -> VariableImportance {
        VariableImportance {
            variable: variable.into(),
            importance,
        }
    }

    #[test]
    fn bar_chart_scales_to_the_largest_value() {
        let chart = importance_bar_chart(&[vi("time", 2.0), vi("age", 1.0), vi("sodium", 0.0)], 10);
        let lines: Vec<&str> = chart.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].matches('#').count(), 10);
        assert_eq!(lines[1].matches('#').count(), 5);
        assert_eq!(lines[2].matches('#').count(), 0);
        assert!(lines[0].starts_with("time  "));
    }

    #[test]
    fn stars_follow_conventional_cutoffs() {
        assert_eq!(significance_stars(0.0001), "***");
        assert_eq!(significance_stars(0.03), "*");
        assert_eq!(significance_stars(0.5), "");
    }

    #[test]
    fn roc_tsv_has_header_and_one_row_per_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roc.tsv");
        let curve = [
            RocPoint {
                threshold: f64::NEG_INFINITY,
                sensitivity: 1.0,
                specificity: 0.0,
            },
            RocPoint {
                threshold: 0.4,
                sensitivity: 0.5,
                specificity: 0.75,
            },
        ];
        write_roc_curve(&path, &curve).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "threshold\tsensitivity\tspecificity");
        assert_eq!(lines[2], "0.4\t0.5\t0.75");
        assert_eq!(lines.len(), 3);
    }
}

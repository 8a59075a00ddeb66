//! Synthetic heart-failure cohorts shared by the integration tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

pub const HEADER: &str = "age,anaemia,creatinine_phosphokinase,diabetes,ejection_fraction,high_blood_pressure,platelets,serum_creatinine,serum_sodium,sex,smoking,time,DEATH_EVENT";

/// Writes a cohort of `n` patients whose mortality depends on follow-up time,
/// serum creatinine, ejection fraction and age, roughly as in the clinical data.
/// The returned directory must outlive the file.
pub fn write_cohort(n: usize, seed: u64) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("heart_failure_clinical_records.csv");
    let mut file = std::fs::File::create(&path).expect("create csv");
    writeln!(file, "{HEADER}").expect("write header");

    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..n {
        let age = rng.gen_range(40.0..95.0_f64).round();
        let ejection_fraction = rng.gen_range(14.0..80.0_f64).round();
        let serum_creatinine = (rng.gen_range(0.5..4.0_f64) * 10.0).round() / 10.0;
        let time = rng.gen_range(4.0..285.0_f64).round();
        let eta = 1.5 - 0.02 * time + 0.7 * (serum_creatinine - 1.4) - 0.06 * (ejection_fraction - 38.0)
            + 0.05 * (age - 60.0);
        let died = rng.gen_bool(1.0 / (1.0 + (-eta).exp()));

        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            age,
            u8::from(rng.gen_bool(0.43)),
            rng.gen_range(23..7861),
            u8::from(rng.gen_bool(0.42)),
            ejection_fraction,
            u8::from(rng.gen_bool(0.35)),
            rng.gen_range(25_100..850_000),
            serum_creatinine,
            rng.gen_range(113..148),
            u8::from(rng.gen_bool(0.65)),
            u8::from(rng.gen_bool(0.32)),
            time,
            u8::from(died)
        )
        .expect("write row");
    }
    (dir, path)
}

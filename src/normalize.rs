//! Rescales raw weights into [0, 1] by each pair's global maximum.
//!
//! The result file is rewritten through a sibling temp file and renamed over
//! the original, so a reader never observes a half-written file. A scale of
//! 0 or 1 leaves the file byte-identical, which also makes a second pass over
//! already-normalized output a no-op.

use crate::error::Result;
use crate::types::{NormalizeOptions, NormalizeStats, StageReport};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Outlier tiers on the normalized weight, highest first; a row lands in the
/// first tier it exceeds.
const OUTLIER_TIERS: [(&str, f64); 4] = [
    ("gt_8", 0.8),
    ("gt_6", 0.6),
    ("gt_4", 0.4),
    ("gt_2", 0.2),
];

/// One result-file normalization unit.
pub struct NormalizeTask {
    pub path: PathBuf,
    pub global_max: f64,
    /// b',' for VCF-mode output, b'\t' for pedigree tables
    pub delimiter: u8,
}

/// Rewrite every weight divided by the pair's global maximum.
pub fn run(task: &NormalizeTask, opts: NormalizeOptions) -> Result<NormalizeStats> {
    if task.global_max == 0.0 || task.global_max == 1.0 {
        return Ok(NormalizeStats {
            rows: 0,
            rescaled: false,
        });
    }

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(task.delimiter)
        .from_path(&task.path)?;
    let header = rdr.headers()?.clone();

    let tmp_path = sibling_tmp_path(&task.path);
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(task.delimiter)
        .from_path(&tmp_path)?;
    wtr.write_record(&header)?;

    let mut tiers: Vec<Vec<csv::StringRecord>> = vec![Vec::new(); OUTLIER_TIERS.len()];
    let mut points: Vec<(f64, f64)> = Vec::new();
    let mut rows: u64 = 0;

    for record in rdr.records() {
        let record = record?;
        let weight_col = record.len() - 1;
        let weight: f64 = record
            .get(weight_col)
            .and_then(|w| w.parse().ok())
            .unwrap_or(0.0);
        let scaled = weight / task.global_max;

        let mut out = csv::StringRecord::new();
        for field in record.iter().take(weight_col) {
            out.push_field(field);
        }
        out.push_field(&scaled.to_string());

        if opts.graphics {
            if let Some(Ok(pos)) = record.get(0).map(str::parse::<f64>) {
                points.push((pos, scaled));
            }
        }

        if opts.outliers {
            if let Some(tier) = OUTLIER_TIERS.iter().position(|&(_, t)| scaled > t) {
                tiers[tier].push(out.clone());
            }
        }

        wtr.write_record(&out)?;
        rows += 1;
    }

    wtr.flush()?;
    drop(wtr);
    fs::rename(&tmp_path, &task.path)?;

    if opts.outliers {
        write_outlier_files(task, &header, &tiers)?;
    }

    if opts.graphics {
        #[cfg(feature = "plotting")]
        {
            let png_path = task.path.with_extension("png");
            if let Err(e) = crate::plotting::scatter_plot(&points, &png_path) {
                eprintln!(
                    "Warning: plot for {} failed: {}",
                    task.path.display(),
                    e
                );
            }
        }
        #[cfg(not(feature = "plotting"))]
        let _ = &points;
    }

    Ok(NormalizeStats {
        rows,
        rescaled: true,
    })
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_outlier_files(
    task: &NormalizeTask,
    header: &csv::StringRecord,
    tiers: &[Vec<csv::StringRecord>],
) -> Result<()> {
    let dir = task.path.parent().unwrap_or_else(|| Path::new("."));
    let base = task
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    for ((tier_name, _), records) in OUTLIER_TIERS.iter().zip(tiers) {
        let tier_path = dir.join(format!("{}.{}", tier_name, base));
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(task.delimiter)
            .from_path(&tier_path)?;
        wtr.write_record(header)?;
        for record in records {
            wtr.write_record(record)?;
        }
        wtr.flush()?;
    }
    Ok(())
}

/// Run every normalize task on the rayon pool. Each task owns its file; no
/// two tasks touch the same path.
pub fn run_stage(
    tasks: &[NormalizeTask],
    opts: NormalizeOptions,
    progress: &ProgressBar,
) -> StageReport<NormalizeStats> {
    let results: Vec<_> = tasks
        .par_iter()
        .map(|task| {
            let outcome = run(task, opts);
            progress.inc(1);
            (task.path.display().to_string(), outcome)
        })
        .collect();
    StageReport::from_results(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn write_result_file(dir: &Path, name: &str, rows: &[(&str, &str, &str, f64)]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Pos,Ref,Alt,RF").unwrap();
        for (pos, r, a, w) in rows {
            writeln!(f, "{},{},{},{}", pos, r, a, w).unwrap();
        }
        path
    }

    fn make_task(path: PathBuf, global_max: f64) -> NormalizeTask {
        NormalizeTask {
            path,
            global_max,
            delimiter: b',',
        }
    }

    fn read_weights(path: &Path) -> Vec<f64> {
        let mut rdr = csv::Reader::from_path(path).unwrap();
        rdr.records()
            .map(|r| r.unwrap()[3].parse().unwrap())
            .collect()
    }

    #[test]
    fn test_rescales_by_global_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_result_file(
            dir.path(),
            "chr1.1_3.csv",
            &[("100", "A", "T", 2.0), ("200", "C", "G", 8.0), ("300", "G", "A", 4.0)],
        );
        let stats = run(&make_task(path.clone(), 8.0), NormalizeOptions::default()).unwrap();

        assert!(stats.rescaled);
        assert_eq!(stats.rows, 3);
        let weights = read_weights(&path);
        assert_relative_eq!(weights[0], 0.25);
        assert_relative_eq!(weights[1], 1.0);
        assert_relative_eq!(weights[2], 0.5);
    }

    #[test]
    fn test_row_achieving_max_normalizes_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_result_file(dir.path(), "f.csv", &[("100", "A", "T", 8.333333333333334)]);
        run(
            &make_task(path.clone(), 8.333333333333334),
            NormalizeOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(read_weights(&path)[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_global_max_one_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_result_file(dir.path(), "f.csv", &[("100", "A", "T", 0.5)]);
        let before = std::fs::read(&path).unwrap();

        let stats = run(&make_task(path.clone(), 1.0), NormalizeOptions::default()).unwrap();
        assert!(!stats.rescaled);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_global_max_zero_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_result_file(dir.path(), "f.csv", &[("100", "A", "T", 0.0)]);
        let before = std::fs::read(&path).unwrap();

        let stats = run(&make_task(path.clone(), 0.0), NormalizeOptions::default()).unwrap();
        assert!(!stats.rescaled);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_no_tmp_sibling_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_result_file(dir.path(), "chr1.1_3.csv", &[("100", "A", "T", 2.0)]);
        run(&make_task(path.clone(), 2.0), NormalizeOptions::default()).unwrap();
        assert!(!sibling_tmp_path(&path).exists());
    }

    #[test]
    fn test_outlier_tiers_exclusive_and_exhaustive() {
        let dir = tempfile::tempdir().unwrap();
        // normalized weights: 0.09, 0.3, 0.5, 0.7, 0.9, 1.0
        let path = write_result_file(
            dir.path(),
            "chr1.1_3.csv",
            &[
                ("1", "A", "T", 0.9),
                ("2", "A", "T", 3.0),
                ("3", "A", "T", 5.0),
                ("4", "A", "T", 7.0),
                ("5", "A", "T", 9.0),
                ("6", "A", "T", 10.0),
            ],
        );
        let opts = NormalizeOptions {
            outliers: true,
            graphics: false,
        };
        run(&make_task(path.clone(), 10.0), opts).unwrap();

        let tier_rows = |tier: &str| -> Vec<String> {
            let tier_path = dir.path().join(format!("{}.chr1.1_3.csv", tier));
            let mut rdr = csv::Reader::from_path(tier_path).unwrap();
            rdr.records().map(|r| r.unwrap()[0].to_string()).collect()
        };

        assert_eq!(tier_rows("gt_8"), vec!["5", "6"]);
        assert_eq!(tier_rows("gt_6"), vec!["4"]);
        assert_eq!(tier_rows("gt_4"), vec!["3"]);
        assert_eq!(tier_rows("gt_2"), vec!["2"]);
        // 0.09 is below every tier and appears nowhere
    }

    #[test]
    fn test_outlier_files_carry_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_result_file(dir.path(), "chr2.1_3.csv", &[("1", "A", "T", 1.0)]);
        let opts = NormalizeOptions {
            outliers: true,
            graphics: false,
        };
        run(&make_task(path, 2.0), opts).unwrap();

        let tier_path = dir.path().join("gt_2.chr2.1_3.csv");
        let mut rdr = csv::Reader::from_path(tier_path).unwrap();
        assert_eq!(
            rdr.headers().unwrap(),
            &csv::StringRecord::from(vec!["Pos", "Ref", "Alt", "RF"])
        );
    }
}

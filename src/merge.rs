//! Ordered merge of two generation buckets into raw fitness weights.
//!
//! The two buckets are consumed in lockstep: row i of the first generation is
//! paired with row i of the second. Both buckets come from the same source
//! restricted to the same chromosome, so they normally carry the same variant
//! set in the same order. When they do not, pairs after the first divergence
//! are misaligned; the stream-length check below surfaces the mismatch but
//! rows already written are kept.

use crate::error::{RelFitError, Result};
use crate::types::{AlleleCounts, GenerationPair, MergeStats, StageReport, WeightModel};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Stand-in frequency when the second generation has no called alleles.
const ZERO_DEPTH_PSEUDO_FREQ: f64 = 1e-8;

/// One (chromosome, generation-pair) merge unit.
pub struct MergeTask {
    pub chrom: String,
    pub pair: GenerationPair,
    pub bucket1: PathBuf,
    pub bucket2: PathBuf,
    pub output: PathBuf,
    pub model: WeightModel,
}

/// Relative-fitness weight from a pair of allele frequencies.
///
/// Zero first-generation frequency forces a zero weight regardless of `f2`.
/// A degenerate denominator yields a non-finite value; the caller clamps it.
pub fn weight(model: WeightModel, f1: f64, f2: f64) -> f64 {
    if f1 == 0.0 {
        return 0.0;
    }
    let denom = match model {
        WeightModel::Population => 2.0 * f1 * f1 - f1 * f2 * f2,
        WeightModel::Pedigree => (f1 * f1 + f1 * f1 * f1) - f1 * f2 * f2,
    };
    (f2 * f2) / denom
}

/// Allele frequency, treating an empty generation as frequency zero.
fn frequency(counts: &AlleleCounts) -> f64 {
    if counts.total_alleles == 0 {
        0.0
    } else {
        counts.alt_count as f64 / counts.total_alleles as f64
    }
}

fn parse_bucket_row(
    record: &csv::StringRecord,
    path: &Path,
    row: usize,
) -> Result<AlleleCounts> {
    let field = |i: usize| {
        record
            .get(i)
            .ok_or_else(|| RelFitError::parse(path, row, format!("missing column {}", i)))
    };
    Ok(AlleleCounts {
        pos: field(0)?
            .parse()
            .map_err(|e| RelFitError::parse(path, row, format!("bad position: {}", e)))?,
        ref_allele: field(1)?.to_string(),
        alt_allele: field(2)?.to_string(),
        alt_count: field(3)?
            .parse()
            .map_err(|e| RelFitError::parse(path, row, format!("bad alt count: {}", e)))?,
        total_alleles: field(4)?
            .parse()
            .map_err(|e| RelFitError::parse(path, row, format!("bad allele total: {}", e)))?,
    })
}

/// Zip the two buckets, write `Pos,Ref,Alt,RF` rows with the raw weight, and
/// return the maximum weight seen.
pub fn run(task: &MergeTask) -> Result<MergeStats> {
    let mut rdr1 = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(&task.bucket1)?;
    let mut rdr2 = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(&task.bucket2)?;
    let mut wtr = csv::Writer::from_path(&task.output)?;
    wtr.write_record(["Pos", "Ref", "Alt", "RF"])?;

    let mut stats = MergeStats {
        chrom: task.chrom.clone(),
        pair: task.pair.id(),
        rows: 0,
        max_weight: 0.0,
        anomalies: 0,
        leftover_rows: 0,
    };

    let mut it1 = rdr1.records();
    let mut it2 = rdr2.records();
    loop {
        match (it1.next(), it2.next()) {
            (Some(r1), Some(r2)) => {
                let row = stats.rows as usize + 1;
                let c1 = parse_bucket_row(&r1?, &task.bucket1, row)?;
                let c2 = parse_bucket_row(&r2?, &task.bucket2, row)?;

                let f1 = frequency(&c1);
                let f2 = if c2.total_alleles == 0 {
                    ZERO_DEPTH_PSEUDO_FREQ
                } else {
                    c2.alt_count as f64 / c2.total_alleles as f64
                };

                let mut w = weight(task.model, f1, f2);
                if !w.is_finite() {
                    w = 0.0;
                    stats.anomalies += 1;
                }
                stats.max_weight = stats.max_weight.max(w);

                wtr.write_record([
                    c1.pos.to_string(),
                    c1.ref_allele,
                    c1.alt_allele,
                    w.to_string(),
                ])?;
                stats.rows += 1;
            }
            (Some(rest), None) => {
                let _ = rest;
                stats.leftover_rows = 1 + it1.by_ref().count() as u64;
                break;
            }
            (None, Some(rest)) => {
                let _ = rest;
                stats.leftover_rows = 1 + it2.by_ref().count() as u64;
                break;
            }
            (None, None) => break,
        }
    }

    wtr.flush()?;
    Ok(stats)
}

/// Run every merge task on the rayon pool and collect all results before the
/// aggregation step sees any of them.
pub fn run_stage(tasks: &[MergeTask], progress: &ProgressBar) -> StageReport<MergeStats> {
    let results: Vec<_> = tasks
        .par_iter()
        .map(|task| {
            let outcome = run(task);
            progress.inc(1);
            (format!("{}:{}", task.chrom, task.pair.id()), outcome)
        })
        .collect();
    StageReport::from_results(results)
}

//! Splits the variant source into per-(chromosome, generation) bucket files.
//!
//! One task per combination; tasks share nothing and each owns its bucket
//! file, so the stage needs no locking. Bucket rows are headerless
//! `pos,ref,alt,alt_count,total` in source (position) order.

use crate::error::Result;
use crate::types::{PartitionStats, StageReport};
use crate::vcf_source::{Site, SnpStream};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// One (chromosome, generation) partition unit.
pub struct PartitionTask {
    pub vcf: PathBuf,
    pub chrom: String,
    pub generation: String,
    pub sample_indices: Vec<usize>,
    pub bucket: PathBuf,
}

/// Bucket file path for a (chromosome, generation) combination.
pub fn bucket_path(temp_dir: &Path, chrom: &str, generation: &str) -> PathBuf {
    temp_dir.join(format!("tmp.{}.{}.csv", chrom, generation))
}

/// Stream one chromosome restricted to one generation's samples and append
/// an allele-count row per retained SNP.
pub fn run(task: &PartitionTask) -> Result<PartitionStats> {
    let mut stream = SnpStream::open(&task.vcf, &task.chrom, task.sample_indices.clone())?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&task.bucket)?;

    let mut stats = PartitionStats {
        chrom: task.chrom.clone(),
        generation: task.generation.clone(),
        written: 0,
        filtered: 0,
        decode_errors: 0,
    };

    while let Some(site) = stream.next_site() {
        match site {
            Site::Counts(c) => {
                wtr.write_record(&[
                    c.pos.to_string(),
                    c.ref_allele,
                    c.alt_allele,
                    c.alt_count.to_string(),
                    c.total_alleles.to_string(),
                ])?;
                stats.written += 1;
            }
            Site::Filtered => stats.filtered += 1,
            Site::Undecodable => stats.decode_errors += 1,
        }
    }

    wtr.flush()?;
    Ok(stats)
}

/// Run every partition task on the rayon pool; the collect is the stage
/// barrier. A failed task is reported, its siblings keep running.
pub fn run_stage(tasks: &[PartitionTask], progress: &ProgressBar) -> StageReport<PartitionStats> {
    let results: Vec<_> = tasks
        .par_iter()
        .map(|task| {
            let outcome = run(task);
            progress.inc(1);
            (format!("{}:{}", task.chrom, task.generation), outcome)
        })
        .collect();
    StageReport::from_results(results)
}

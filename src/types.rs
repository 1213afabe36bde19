use crate::error::RelFitError;

/// Allele counts for a single SNP within one generation
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleCounts {
    pub pos: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    /// het samples + 2 * hom-alt samples
    pub alt_count: u32,
    /// 2 * samples with a called genotype
    pub total_alleles: u32,
}

/// A pair of generation labels whose buckets get compared
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationPair {
    pub first: String,
    pub second: String,
}

impl GenerationPair {
    /// Pair identifier used in file names and the normalization scale map
    pub fn id(&self) -> String {
        format!("{}_{}", self.first, self.second)
    }
}

/// Which relative-fitness denominator the merge stage uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightModel {
    /// Population comparison: w = f2^2 / (2*f1^2 - f1*f2^2)
    Population,
    /// Pedigree comparison: w = f2^2 / ((f1^2 + f1^3) - f1*f2^2)
    Pedigree,
}

/// Options threaded into every normalize task
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    pub outliers: bool,
    pub graphics: bool,
}

/// Counters from one partition task
#[derive(Debug, Clone)]
pub struct PartitionStats {
    pub chrom: String,
    pub generation: String,
    pub written: u64,
    /// Sites rejected by the SNP/alt filter
    pub filtered: u64,
    /// Records that failed to decode and were skipped
    pub decode_errors: u64,
}

/// Counters and the running maximum from one merge task
#[derive(Debug, Clone)]
pub struct MergeStats {
    pub chrom: String,
    pub pair: String,
    pub rows: u64,
    pub max_weight: f64,
    /// Non-finite weights clamped to zero
    pub anomalies: u64,
    /// Rows left unconsumed in the longer bucket when the other ran out
    pub leftover_rows: u64,
}

/// Counters from one normalize task
#[derive(Debug, Clone)]
pub struct NormalizeStats {
    pub rows: u64,
    /// false when the scale was 0 or 1 and the file was left untouched
    pub rescaled: bool,
}

/// A task that failed; siblings in the stage are unaffected
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub error: RelFitError,
}

/// Outcome of one pipeline stage: completed payloads plus isolated failures
#[derive(Debug)]
pub struct StageReport<T> {
    pub completed: Vec<T>,
    pub failed: Vec<TaskFailure>,
}

impl<T> StageReport<T> {
    pub fn from_results(results: Vec<(String, crate::error::Result<T>)>) -> Self {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for (task, result) in results {
            match result {
                Ok(value) => completed.push(value),
                Err(error) => failed.push(TaskFailure { task, error }),
            }
        }
        StageReport { completed, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelFitError;

    #[test]
    fn test_pair_id() {
        let pair = GenerationPair {
            first: "1".to_string(),
            second: "3".to_string(),
        };
        assert_eq!(pair.id(), "1_3");
    }

    #[test]
    fn test_stage_report_isolates_failures() {
        let results = vec![
            ("chr1:1".to_string(), Ok(10u64)),
            (
                "chr2:1".to_string(),
                Err(RelFitError::source("x.vcf.gz", "no index")),
            ),
            ("chr3:1".to_string(), Ok(20u64)),
        ];
        let report = StageReport::from_results(results);
        assert_eq!(report.completed, vec![10, 20]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].task, "chr2:1");
    }
}

//! Two-table comparison mode over pre-tabulated allele counts.
//!
//! Input rows carry fixed column offsets (chromosome, start, end, ref, alt at
//! 0..=4, allele count at 13). A row is accepted only when start == end and
//! neither allele is the `-` placeholder. Sites are joined per chromosome by
//! (start, ref, alt) key with an ordered two-pointer sweep; unmatched keys are
//! counted instead of silently misaligning the pairing.

use crate::error::Result;
use crate::merge::weight;
use crate::types::{StageReport, WeightModel};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const START_COL: usize = 1;
const END_COL: usize = 2;
const REF_COL: usize = 3;
const ALT_COL: usize = 4;
const COUNT_COL: usize = 13;

/// One accepted site from a pre-tabulated file.
#[derive(Debug, Clone)]
pub struct TabSite {
    pub start: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub count: f64,
}

/// A parsed table, grouped by chromosome.
pub struct TabTable {
    pub by_chrom: HashMap<String, Vec<TabSite>>,
    pub accepted: u64,
    /// Header rows, short rows, placeholder alleles, non-SNP spans
    pub rejected: u64,
}

/// Load a tab-separated allele-count table. Malformed rows are counted and
/// skipped, never fatal; only failing to open the file aborts.
pub fn load_table(path: &Path) -> Result<TabTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut table = TabTable {
        by_chrom: HashMap::new(),
        accepted: 0,
        rejected: 0,
    };

    for record in rdr.records() {
        let Ok(record) = record else {
            table.rejected += 1;
            continue;
        };
        if record.len() <= COUNT_COL {
            table.rejected += 1;
            continue;
        }

        let (Ok(start), Ok(end)) = (
            record[START_COL].parse::<u64>(),
            record[END_COL].parse::<u64>(),
        ) else {
            table.rejected += 1;
            continue;
        };
        if start != end {
            table.rejected += 1;
            continue;
        }

        let ref_allele = &record[REF_COL];
        let alt_allele = &record[ALT_COL];
        if ref_allele == "-" || alt_allele == "-" {
            table.rejected += 1;
            continue;
        }

        let Ok(count) = record[COUNT_COL].parse::<f64>() else {
            table.rejected += 1;
            continue;
        };

        table
            .by_chrom
            .entry(record[0].to_string())
            .or_default()
            .push(TabSite {
                start,
                ref_allele: ref_allele.to_string(),
                alt_allele: alt_allele.to_string(),
                count,
            });
        table.accepted += 1;
    }

    Ok(table)
}

/// One per-chromosome join unit.
pub struct TabJoinTask {
    pub chrom: String,
    pub sites1: Vec<TabSite>,
    pub sites2: Vec<TabSite>,
    /// Cohort allele totals behind each table's counts
    pub total1: f64,
    pub total2: f64,
    pub output: PathBuf,
}

/// Counters and the running maximum from one join task.
#[derive(Debug, Clone)]
pub struct JoinStats {
    pub chrom: String,
    pub matched: u64,
    pub unmatched1: u64,
    pub unmatched2: u64,
    pub max_weight: f64,
    pub anomalies: u64,
}

fn site_key(site: &TabSite) -> (u64, &str, &str) {
    (site.start, &site.ref_allele, &site.alt_allele)
}

/// Merge-join both site lists by (start, ref, alt) and write
/// `Start\tRef\tAlt\tRelative_Fitness` rows with the pedigree weight.
pub fn run(task: &TabJoinTask) -> Result<JoinStats> {
    let mut sites1 = task.sites1.clone();
    let mut sites2 = task.sites2.clone();
    sites1.sort_by(|a, b| site_key(a).cmp(&site_key(b)));
    sites2.sort_by(|a, b| site_key(a).cmp(&site_key(b)));

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&task.output)?;
    wtr.write_record(["Start", "Ref", "Alt", "Relative_Fitness"])?;

    let mut stats = JoinStats {
        chrom: task.chrom.clone(),
        matched: 0,
        unmatched1: 0,
        unmatched2: 0,
        max_weight: 0.0,
        anomalies: 0,
    };

    let (mut i, mut j) = (0, 0);
    while i < sites1.len() && j < sites2.len() {
        match site_key(&sites1[i]).cmp(&site_key(&sites2[j])) {
            Ordering::Less => {
                stats.unmatched1 += 1;
                i += 1;
            }
            Ordering::Greater => {
                stats.unmatched2 += 1;
                j += 1;
            }
            Ordering::Equal => {
                let f1 = sites1[i].count / task.total1;
                let f2 = sites2[j].count / task.total2;
                let mut w = weight(WeightModel::Pedigree, f1, f2);
                if !w.is_finite() {
                    w = 0.0;
                    stats.anomalies += 1;
                }
                stats.max_weight = stats.max_weight.max(w);

                wtr.write_record([
                    sites1[i].start.to_string(),
                    sites1[i].ref_allele.clone(),
                    sites1[i].alt_allele.clone(),
                    w.to_string(),
                ])?;
                stats.matched += 1;
                i += 1;
                j += 1;
            }
        }
    }
    stats.unmatched1 += (sites1.len() - i) as u64;
    stats.unmatched2 += (sites2.len() - j) as u64;

    wtr.flush()?;
    Ok(stats)
}

/// Pair identifier for the two tables, from their file stems.
pub fn pair_id(tab1: &Path, tab2: &Path) -> String {
    let stem = |p: &Path| {
        p.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "tab".to_string())
    };
    format!("{}_{}", stem(tab1), stem(tab2))
}

/// Run every join task on the rayon pool, one task per common chromosome.
pub fn run_stage(tasks: &[TabJoinTask], progress: &ProgressBar) -> StageReport<JoinStats> {
    let results: Vec<_> = tasks
        .par_iter()
        .map(|task| {
            let outcome = run(task);
            progress.inc(1);
            (task.chrom.clone(), outcome)
        })
        .collect();
    StageReport::from_results(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn tab_row(chrom: &str, start: u64, end: u64, r: &str, a: &str, count: f64) -> String {
        let mut cols = vec![
            chrom.to_string(),
            start.to_string(),
            end.to_string(),
            r.to_string(),
            a.to_string(),
        ];
        cols.extend(std::iter::repeat(".".to_string()).take(COUNT_COL - ALT_COL - 1));
        cols.push(count.to_string());
        cols.join("\t")
    }

    fn write_table(dir: &Path, name: &str, rows: &[String]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for row in rows {
            writeln!(f, "{}", row).unwrap();
        }
        path
    }

    #[test]
    fn test_load_accepts_snp_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(
            dir.path(),
            "t1.tsv",
            &[
                "Chr\tStart\tEnd\tRef\tAlt\tx\tx\tx\tx\tx\tx\tx\tx\tCount".to_string(),
                tab_row("chr1", 100, 100, "A", "T", 4.0),
                tab_row("chr1", 200, 205, "A", "T", 4.0), // span, not a SNP
                tab_row("chr1", 300, 300, "-", "T", 4.0), // placeholder ref
                tab_row("chr1", 400, 400, "A", "-", 4.0), // placeholder alt
                tab_row("chr2", 500, 500, "C", "G", 2.0),
            ],
        );

        let table = load_table(&path).unwrap();
        assert_eq!(table.accepted, 2);
        assert_eq!(table.rejected, 4); // header + three bad rows
        assert_eq!(table.by_chrom["chr1"].len(), 1);
        assert_eq!(table.by_chrom["chr2"].len(), 1);
    }

    #[test]
    fn test_load_skips_short_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(
            dir.path(),
            "t1.tsv",
            &["chr1\t100\t100\tA\tT".to_string(), tab_row("chr1", 100, 100, "A", "T", 1.0)],
        );
        let table = load_table(&path).unwrap();
        assert_eq!(table.accepted, 1);
        assert_eq!(table.rejected, 1);
    }

    fn site(start: u64, r: &str, a: &str, count: f64) -> TabSite {
        TabSite {
            start,
            ref_allele: r.to_string(),
            alt_allele: a.to_string(),
            count,
        }
    }

    #[test]
    fn test_join_matches_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let task = TabJoinTask {
            chrom: "chr1".to_string(),
            sites1: vec![site(100, "A", "T", 2.0), site(200, "C", "G", 5.0)],
            sites2: vec![site(100, "A", "T", 4.0), site(300, "G", "A", 1.0)],
            total1: 10.0,
            total2: 8.0,
            output: dir.path().join("chr1.t1_t2.tsv"),
        };

        let stats = run(&task).unwrap();
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.unmatched1, 1); // 200,C,G only in table 1
        assert_eq!(stats.unmatched2, 1); // 300,G,A only in table 2

        // f1=0.2, f2=0.5 under the pedigree model
        assert_relative_eq!(stats.max_weight, 0.0); // -125 clamps below the running max of 0
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(&task.output)
            .unwrap();
        assert_eq!(
            rdr.headers().unwrap(),
            &csv::StringRecord::from(vec!["Start", "Ref", "Alt", "Relative_Fitness"])
        );
        let record = rdr.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "100");
        let w: f64 = record[3].parse().unwrap();
        assert_relative_eq!(w, -125.0, epsilon = 1e-9);
    }

    #[test]
    fn test_join_same_key_different_alleles_is_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let task = TabJoinTask {
            chrom: "chr1".to_string(),
            sites1: vec![site(100, "A", "T", 2.0)],
            sites2: vec![site(100, "A", "G", 2.0)],
            total1: 10.0,
            total2: 10.0,
            output: dir.path().join("out.tsv"),
        };
        let stats = run(&task).unwrap();
        assert_eq!(stats.matched, 0);
        assert_eq!(stats.unmatched1 + stats.unmatched2, 2);
    }

    #[test]
    fn test_pair_id_from_stems() {
        assert_eq!(
            pair_id(Path::new("/data/parents.tsv"), Path::new("/data/offspring.tsv")),
            "parents_offspring"
        );
    }
}

//! Variant source adapter over rust-htslib.
//!
//! All htslib contact lives here: header inspection for the driver, plus a
//! per-task stream of SNP allele counts restricted to one chromosome and one
//! sample subset. Every partition task opens its own handle; readers are
//! never shared across workers.

use crate::error::{RelFitError, Result};
use crate::types::AlleleCounts;
use rust_htslib::bcf::record::GenotypeAllele;
use rust_htslib::{bcf, bcf::Read};
use std::path::Path;

/// List sample names from the VCF header.
pub fn list_samples(path: &Path) -> Result<Vec<String>> {
    let reader = bcf::Reader::from_path(path).map_err(|e| RelFitError::source(path, e))?;
    Ok(reader
        .header()
        .samples()
        .iter()
        .map(|s| String::from_utf8_lossy(s).to_string())
        .collect())
}

/// List contig names from the VCF header.
pub fn list_chromosomes(path: &Path) -> Result<Vec<String>> {
    let reader = bcf::Reader::from_path(path).map_err(|e| RelFitError::source(path, e))?;
    let header = reader.header();
    let mut names = Vec::with_capacity(header.contig_count() as usize);
    for rid in 0..header.contig_count() {
        names.push(String::from_utf8_lossy(header.rid2name(rid)?).to_string());
    }
    Ok(names)
}

/// Resolve sample names to their column indices in the VCF header order.
pub fn sample_indices(header_samples: &[String], wanted: &[String]) -> Result<Vec<usize>> {
    wanted
        .iter()
        .map(|name| {
            header_samples.iter().position(|s| s == name).ok_or_else(|| {
                RelFitError::config(format!("sample '{}' not found in VCF header", name))
            })
        })
        .collect()
}

/// One pull from the stream.
pub enum Site {
    /// A single-nucleotide substitution with a defined alternate allele
    Counts(AlleleCounts),
    /// Rejected by the SNP/alt filter
    Filtered,
    /// The record could not be decoded; skipped, never fatal
    Undecodable,
}

/// Streams allele counts for one chromosome over a fixed sample subset.
pub struct SnpStream {
    reader: bcf::IndexedReader,
    record: bcf::Record,
    samples: Vec<usize>,
}

impl SnpStream {
    /// Open the source and position it at the start of `chrom`.
    ///
    /// Requires a tabix/CSI index next to the source file. Open and fetch
    /// failures fail this task only.
    pub fn open(path: &Path, chrom: &str, samples: Vec<usize>) -> Result<Self> {
        let mut reader =
            bcf::IndexedReader::from_path(path).map_err(|e| RelFitError::source(path, e))?;
        let rid = reader
            .header()
            .name2rid(chrom.as_bytes())
            .map_err(|e| RelFitError::source(path, e))?;
        reader
            .fetch(rid, 0, None)
            .map_err(|e| RelFitError::source(path, e))?;
        let record = reader.empty_record();
        Ok(SnpStream {
            reader,
            record,
            samples,
        })
    }

    /// Next site in the stream, or `None` at end of chromosome.
    pub fn next_site(&mut self) -> Option<Site> {
        match self.reader.read(&mut self.record) {
            Some(Ok(())) => Some(self.classify()),
            Some(Err(_)) => Some(Site::Undecodable),
            None => None,
        }
    }

    fn classify(&mut self) -> Site {
        let alleles = self.record.alleles();
        // Needs a reference base plus at least one defined alternate
        if alleles.len() < 2 {
            return Site::Filtered;
        }
        if alleles[0].len() != 1 {
            return Site::Filtered;
        }
        let is_snp = alleles[1..]
            .iter()
            .all(|a| a.len() == 1 && matches!(a[0], b'A' | b'C' | b'G' | b'T'));
        if !is_snp {
            return Site::Filtered;
        }

        let pos = self.record.pos() as u64 + 1; // htslib is 0-based
        let ref_allele = String::from_utf8_lossy(alleles[0]).to_string();
        let alt_allele = String::from_utf8_lossy(alleles[1]).to_string();

        let genotypes = match self.record.genotypes() {
            Ok(g) => g,
            Err(_) => return Site::Undecodable,
        };

        let mut called: u32 = 0;
        let mut het: u32 = 0;
        let mut hom_alt: u32 = 0;

        for &idx in &self.samples {
            let gt = genotypes.get(idx);
            if gt.len() == 0 {
                continue;
            }

            let mut alt_alleles: u32 = 0;
            let mut missing = false;
            for allele in gt.iter() {
                match allele {
                    GenotypeAllele::Unphased(i) | GenotypeAllele::Phased(i) => {
                        if *i > 0 {
                            alt_alleles += 1;
                        }
                    }
                    GenotypeAllele::UnphasedMissing | GenotypeAllele::PhasedMissing => {
                        missing = true;
                    }
                }
            }
            if missing {
                continue;
            }

            called += 1;
            if alt_alleles == gt.len() as u32 {
                hom_alt += 1;
            } else if alt_alleles > 0 {
                het += 1;
            }
        }

        Site::Counts(AlleleCounts {
            pos,
            ref_allele,
            alt_allele,
            alt_count: het + 2 * hom_alt,
            total_alleles: 2 * called,
        })
    }
}

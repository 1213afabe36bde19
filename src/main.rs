use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use relfit::types::{NormalizeOptions, TaskFailure, WeightModel};
use relfit::{aggregate, generations, merge, normalize, partition, pedigree, vcf_source};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "relfit")]
#[command(version)]
#[command(about = "Calculate relative fitness of SNP mutations across sampled generations", long_about = None)]
struct Args {
    /// Input VCF/BCF file (indexed)
    #[arg(short, long, required_unless_present = "tab1", conflicts_with_all = ["tab1", "tab2"])]
    input: Option<String>,

    /// First pre-tabulated allele-count table (enables the two-table mode)
    #[arg(long, requires = "tab2")]
    tab1: Option<String>,

    /// Second pre-tabulated allele-count table
    #[arg(long, requires = "tab1")]
    tab2: Option<String>,

    /// Total allele number behind the counts in --tab1
    #[arg(long, requires = "tab1")]
    alleles1: Option<u32>,

    /// Total allele number behind the counts in --tab2
    #[arg(long, requires = "tab2")]
    alleles2: Option<u32>,

    /// Number of worker threads
    #[arg(short = 'c', long, default_value_t = num_cpus())]
    threads: usize,

    /// Regex pattern to match chromosome names (e.g. "^chr[0-9]+$")
    #[arg(short = 'C', long)]
    chromosomes: Option<String>,

    /// Sample generations: /<id>/<regex>/<id>/<regex>/... or a
    /// comma-separated allow-list of name-suffix tokens
    #[arg(short, long, required_unless_present = "tab1")]
    generations: Option<String>,

    /// Separator before the generation token in sample names (allow-list form)
    #[arg(long, default_value = "_")]
    generation_separator: String,

    /// Sample generation pairs by id (e.g. "1_3,2_3")
    #[arg(short = 'p', long, default_value = "1_3,2_3", value_delimiter = ',')]
    generation_pairs: Vec<String>,

    /// Directory for output files
    #[arg(short, long, default_value = "results")]
    out_dir: String,

    /// Directory for temporary bucket files
    #[arg(short = 't', long, default_value = "tmp")]
    temp_dir: String,

    /// Write outlier relative-fitness tier files
    #[arg(short = 'O', long)]
    outliers: bool,

    /// Generate a scatter plot for each output file
    #[arg(short = 'G', long)]
    generate_graphics: bool,

    /// Do not delete temporary bucket files
    #[arg(long)]
    keep_temp: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

macro_rules! progress {
    ($quiet:expr) => {
        if !$quiet {
            eprintln!();
        }
    };
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            eprintln!($($arg)*);
        }
    };
}

fn make_progress_bar(quiet: bool, len: u64) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("  [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb
}

/// Task failures are isolated: log them and let the run continue with
/// whatever the stage produced.
fn log_failures(stage: &str, failures: &[TaskFailure]) {
    for failure in failures {
        eprintln!(
            "Warning: {} task {} failed: {}",
            stage, failure.task, failure.error
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
        .unwrap();

    let graphics = if args.generate_graphics && !cfg!(feature = "plotting") {
        eprintln!("Warning: plotting feature not enabled. Rebuild with default features to enable plots.");
        false
    } else {
        args.generate_graphics
    };
    let opts = NormalizeOptions {
        outliers: args.outliers,
        graphics,
    };

    fs::create_dir_all(&args.out_dir)?;

    if args.tab1.is_some() {
        run_tab_mode(&args, opts)
    } else {
        run_vcf_mode(&args, opts)
    }
}

fn run_vcf_mode(args: &Args, opts: NormalizeOptions) -> Result<()> {
    let start = Instant::now();
    let input = PathBuf::from(args.input.as_ref().unwrap());
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    // Header listing failures are fatal; nothing useful can run without them
    let samples = vcf_source::list_samples(&input)?;
    let all_chroms = vcf_source::list_chromosomes(&input)?;

    let chromosomes: Vec<String> = match &args.chromosomes {
        Some(pattern) => {
            let re = regex::Regex::new(pattern).map_err(|e| {
                anyhow::anyhow!("Invalid --chromosomes pattern '{}': {}", pattern, e)
            })?;
            all_chroms.into_iter().filter(|c| re.is_match(c)).collect()
        }
        None => all_chroms,
    };
    if chromosomes.is_empty() {
        anyhow::bail!("No chromosomes match the --chromosomes filter");
    }

    let gen_spec = args.generations.as_ref().unwrap();
    let gens =
        generations::resolve_generations(&samples, gen_spec, &args.generation_separator)?;
    let pairs = generations::parse_pairs(&args.generation_pairs, &gens)?;

    progress!(args.quiet, "Relative Fitness Calculator");
    progress!(args.quiet, "=========================================");
    progress!(args.quiet, "Input VCF: {}", input.display());
    progress!(args.quiet, "Output dir: {}", args.out_dir);
    for (label, members) in &gens {
        progress!(args.quiet, "Generation {}: {} samples", label, members.len());
    }
    progress!(
        args.quiet,
        "Pairs: {}",
        pairs.iter().map(|p| p.id()).collect::<Vec<_>>().join(", ")
    );
    progress!(args.quiet, "Chromosomes: {}", chromosomes.len());
    progress!(args.quiet, "Threads: {}", args.threads);

    let temp_dir = Path::new(&args.temp_dir);
    let out_dir = Path::new(&args.out_dir);
    fs::create_dir_all(temp_dir)?;

    // Step 1: one partition task per (chromosome, generation)
    progress!(args.quiet);
    progress!(args.quiet, "Step 1: Splitting variants into generation buckets...");
    let mut partition_tasks = Vec::new();
    for chrom in &chromosomes {
        for (label, members) in &gens {
            partition_tasks.push(partition::PartitionTask {
                vcf: input.clone(),
                chrom: chrom.clone(),
                generation: label.clone(),
                sample_indices: vcf_source::sample_indices(&samples, members)?,
                bucket: partition::bucket_path(temp_dir, chrom, label),
            });
        }
    }
    let pb = make_progress_bar(args.quiet, partition_tasks.len() as u64);
    let partition_report = partition::run_stage(&partition_tasks, &pb);
    pb.finish_and_clear();
    log_failures("partition", &partition_report.failed);

    let written: u64 = partition_report.completed.iter().map(|s| s.written).sum();
    let filtered: u64 = partition_report.completed.iter().map(|s| s.filtered).sum();
    let decode_errors: u64 = partition_report
        .completed
        .iter()
        .map(|s| s.decode_errors)
        .sum();
    progress!(
        args.quiet,
        "  {} bucket rows written, {} sites filtered, {} records skipped as undecodable",
        written,
        filtered,
        decode_errors
    );
    progress!(args.quiet, "Step 1 in {:.2}s", start.elapsed().as_secs_f64());

    // Step 2: one merge task per (chromosome, pair) whose buckets both exist.
    // A chromosome whose partition task failed is a gap in the output, not an
    // abort.
    progress!(args.quiet);
    progress!(args.quiet, "Step 2: Computing relative fitness per generation pair...");
    let mut merge_tasks = Vec::new();
    for chrom in &chromosomes {
        for pair in &pairs {
            let bucket1 = partition::bucket_path(temp_dir, chrom, &pair.first);
            let bucket2 = partition::bucket_path(temp_dir, chrom, &pair.second);
            if !bucket1.exists() || !bucket2.exists() {
                continue;
            }
            merge_tasks.push(merge::MergeTask {
                chrom: chrom.clone(),
                pair: pair.clone(),
                bucket1,
                bucket2,
                output: out_dir.join(format!("{}.{}.csv", chrom, pair.id())),
                model: WeightModel::Population,
            });
        }
    }
    let pb = make_progress_bar(args.quiet, merge_tasks.len() as u64);
    let merge_report = merge::run_stage(&merge_tasks, &pb);
    pb.finish_and_clear();
    log_failures("merge", &merge_report.failed);

    for stats in &merge_report.completed {
        if stats.leftover_rows > 0 {
            eprintln!(
                "Warning: buckets for {}.{} differ by {} rows; trailing rows were not paired",
                stats.chrom, stats.pair, stats.leftover_rows
            );
        }
    }
    let anomalies: u64 = merge_report.completed.iter().map(|s| s.anomalies).sum();
    if anomalies > 0 {
        eprintln!(
            "Warning: {} non-finite weights were clamped to 0",
            anomalies
        );
    }
    progress!(args.quiet, "Step 2 in {:.2}s", start.elapsed().as_secs_f64());

    // Step 3: aggregate per-pair maxima across chromosomes, then normalize
    let scale = aggregate::reduce_pair_maxima(
        merge_report
            .completed
            .iter()
            .map(|s| (s.pair.clone(), s.max_weight)),
    );
    let mut pair_ids: Vec<&String> = scale.keys().collect();
    pair_ids.sort();
    for pair in pair_ids {
        progress!(args.quiet, "  max RF for {}: {:.6}", pair, scale[pair]);
    }

    progress!(args.quiet);
    progress!(args.quiet, "Step 3: Normalizing relative fitness values...");
    let normalize_tasks: Vec<_> = merge_report
        .completed
        .iter()
        .map(|s| normalize::NormalizeTask {
            path: out_dir.join(format!("{}.{}.csv", s.chrom, s.pair)),
            global_max: scale.get(&s.pair).copied().unwrap_or(0.0),
            delimiter: b',',
        })
        .collect();
    let pb = make_progress_bar(args.quiet, normalize_tasks.len() as u64);
    let normalize_report = normalize::run_stage(&normalize_tasks, opts, &pb);
    pb.finish_and_clear();
    log_failures("normalize", &normalize_report.failed);
    progress!(args.quiet, "Step 3 in {:.2}s", start.elapsed().as_secs_f64());

    if !args.keep_temp {
        progress!(args.quiet, "Deleting temporary files...");
        fs::remove_dir_all(temp_dir)?;
    }

    progress!(args.quiet);
    progress!(args.quiet, "Done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_tab_mode(args: &Args, opts: NormalizeOptions) -> Result<()> {
    let start = Instant::now();
    let tab1 = PathBuf::from(args.tab1.as_ref().unwrap());
    let tab2 = PathBuf::from(args.tab2.as_ref().unwrap());

    let Some(alleles1) = args.alleles1 else {
        anyhow::bail!("--alleles1 is required in two-table mode");
    };
    let Some(alleles2) = args.alleles2 else {
        anyhow::bail!("--alleles2 is required in two-table mode");
    };
    if alleles1 == 0 || alleles2 == 0 {
        anyhow::bail!("--alleles1 and --alleles2 must be greater than zero");
    }
    for path in [&tab1, &tab2] {
        if !path.exists() {
            anyhow::bail!("Input file not found: {}", path.display());
        }
    }

    progress!(args.quiet, "Relative Fitness Calculator (two-table mode)");
    progress!(args.quiet, "=========================================");
    progress!(args.quiet, "Table 1: {} ({} alleles)", tab1.display(), alleles1);
    progress!(args.quiet, "Table 2: {} ({} alleles)", tab2.display(), alleles2);
    progress!(args.quiet, "Threads: {}", args.threads);

    let table1 = pedigree::load_table(&tab1)?;
    let table2 = pedigree::load_table(&tab2)?;
    progress!(
        args.quiet,
        "Table 1: {} sites accepted, {} rows rejected",
        table1.accepted,
        table1.rejected
    );
    progress!(
        args.quiet,
        "Table 2: {} sites accepted, {} rows rejected",
        table2.accepted,
        table2.rejected
    );

    let mut chromosomes: Vec<String> = table1
        .by_chrom
        .keys()
        .filter(|c| table2.by_chrom.contains_key(*c))
        .cloned()
        .collect();
    chromosomes.sort();
    if chromosomes.is_empty() {
        anyhow::bail!("No chromosomes are common to both input tables");
    }
    let dropped =
        table1.by_chrom.len() + table2.by_chrom.len() - 2 * chromosomes.len();
    if dropped > 0 {
        progress!(
            args.quiet,
            "  {} chromosomes present in only one table were dropped",
            dropped
        );
    }

    let pair = pedigree::pair_id(&tab1, &tab2);
    let out_dir = Path::new(&args.out_dir);

    progress!(args.quiet);
    progress!(args.quiet, "Step 1: Joining tables per chromosome...");
    let mut table1_sites = table1.by_chrom;
    let mut table2_sites = table2.by_chrom;
    let join_tasks: Vec<_> = chromosomes
        .iter()
        .map(|chrom| pedigree::TabJoinTask {
            chrom: chrom.clone(),
            sites1: table1_sites.remove(chrom).unwrap_or_default(),
            sites2: table2_sites.remove(chrom).unwrap_or_default(),
            total1: alleles1 as f64,
            total2: alleles2 as f64,
            output: out_dir.join(format!("{}.{}.tsv", chrom, pair)),
        })
        .collect();
    let pb = make_progress_bar(args.quiet, join_tasks.len() as u64);
    let join_report = pedigree::run_stage(&join_tasks, &pb);
    pb.finish_and_clear();
    log_failures("join", &join_report.failed);

    let matched: u64 = join_report.completed.iter().map(|s| s.matched).sum();
    let unmatched: u64 = join_report
        .completed
        .iter()
        .map(|s| s.unmatched1 + s.unmatched2)
        .sum();
    progress!(
        args.quiet,
        "  {} sites joined, {} unmatched keys skipped",
        matched,
        unmatched
    );
    progress!(args.quiet, "Step 1 in {:.2}s", start.elapsed().as_secs_f64());

    let scale = aggregate::reduce_pair_maxima(
        join_report
            .completed
            .iter()
            .map(|s| (pair.clone(), s.max_weight)),
    );
    let global_max = scale.get(&pair).copied().unwrap_or(0.0);
    progress!(args.quiet, "  max RF for {}: {:.6}", pair, global_max);

    progress!(args.quiet);
    progress!(args.quiet, "Step 2: Normalizing relative fitness values...");
    let normalize_tasks: Vec<_> = join_report
        .completed
        .iter()
        .map(|s| normalize::NormalizeTask {
            path: out_dir.join(format!("{}.{}.tsv", s.chrom, pair)),
            global_max,
            delimiter: b'\t',
        })
        .collect();
    let pb = make_progress_bar(args.quiet, normalize_tasks.len() as u64);
    let normalize_report = normalize::run_stage(&normalize_tasks, opts, &pb);
    pb.finish_and_clear();
    log_failures("normalize", &normalize_report.failed);
    progress!(args.quiet, "Step 2 in {:.2}s", start.elapsed().as_secs_f64());

    progress!(args.quiet);
    progress!(args.quiet, "Done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

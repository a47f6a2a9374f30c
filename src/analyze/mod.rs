//! Per-gene phenotypic similarity and its significance.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use indicatif::ParallelProgressIterator;
use itertools::Itertools;
use rayon::prelude::*;

use crate::cohort::{self, Cohort, GeneMembership};
use crate::common::{OutputFormat, SetCombiner, Version};
use crate::ontology::{obo, OntologyGraph};
use crate::similarity::{Context, InformationContent};
use crate::simulate::{self, PermutationEngine, Settings};
use crate::Error;

/// Command line arguments for `analyze` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Phenotypic similarity of probands per gene", long_about = None)]
pub struct Args {
    /// Path to the ontology OBO file (may be gzip-compressed).
    #[arg(long, required = true)]
    pub path_ontology: String,
    /// Path to JSON file with the HPO terms per proband.
    #[arg(long, required = true)]
    pub path_phenotypes: String,
    /// Path to JSON file with the probands per gene.
    #[arg(long, required = true)]
    pub path_genes: String,
    /// Path to the output file; standard output if omitted.
    #[arg(long)]
    pub path_output: Option<String>,
    /// Format of the output.
    #[arg(long, default_value_t = OutputFormat::default())]
    pub output_format: OutputFormat,

    /// Number of random groups to simulate per group size.
    #[arg(long, default_value_t = simulate::DEFAULT_ITERATIONS)]
    pub iterations: u64,
    /// Number of iterations between checks for interruption.
    #[arg(long, default_value_t = simulate::DEFAULT_BATCH_SIZE)]
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,
    /// How to combine pairwise term similarities into proband similarities.
    #[arg(long, default_value_t = SetCombiner::default())]
    pub combiner: SetCombiner,
    /// Randomly reassign probands to genes before the analysis, to assess robustness.
    #[arg(long, default_value_t = false)]
    pub permute: bool,
    /// Sort the output by ascending P-value instead of input order.
    #[arg(long, default_value_t = false)]
    pub sort_by_p_value: bool,

    /// Number of threads to use (default is 1 thread per core).
    #[arg(long)]
    pub num_threads: Option<usize>,
    /// Seed for the random number generator.
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Outcome of the analysis of one gene.
#[derive(
    serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, derive_more::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Similarity and P-value were computed.
    #[display("analyzed")]
    Analyzed,
    /// Fewer than two probands with phenotypes, the statistic is undefined.
    #[display("skipped")]
    Skipped,
}

/// Result record for one gene.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct GeneResult {
    /// The gene identifier.
    pub gene: String,
    /// Number of distinct probands with phenotypes.
    pub probands: usize,
    /// Observed mean pairwise similarity.
    pub similarity: Option<f64>,
    /// Empirical P-value of the observed similarity.
    pub p_value: Option<f64>,
    /// Size of the null distribution the P-value is based on.
    pub iterations: Option<u64>,
    /// Whether the gene was analyzed.
    pub status: Status,
    /// Why the gene was skipped.
    pub reason: Option<String>,
}

/// Results of an analysis run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    /// One record per processed gene.
    pub results: Vec<GeneResult>,
    /// Whether the run was interrupted before all genes were processed.
    pub partial: bool,
}

/// A gene that cannot be analyzed.
#[derive(Debug, Clone)]
struct Skip {
    /// Number of distinct probands with phenotypes.
    probands: usize,
    /// Human-readable reason.
    reason: String,
}

/// Computes observed similarity and significance per gene.
pub struct Analyzer<'a> {
    /// Similarity context.
    ctx: Context<'a>,
    /// The full cohort.
    cohort: &'a Cohort,
    /// Null distributions by group size.
    engine: PermutationEngine<'a>,
}

impl<'a> Analyzer<'a> {
    /// Construct a new analyzer.
    pub fn new(ctx: Context<'a>, cohort: &'a Cohort, settings: Settings) -> Self {
        Self {
            ctx,
            cohort,
            engine: PermutationEngine::new(ctx, cohort, settings),
        }
    }

    /// Map the gene's probands onto the cohort.
    ///
    /// Unknown and repeated probands are dropped; fewer than two remaining is a [`Skip`].
    fn proband_group(&self, gene: &str, proband_ids: &[String]) -> Result<Vec<usize>, Skip> {
        let group = proband_ids
            .iter()
            .unique()
            .filter_map(|proband_id| {
                let idx = self.cohort.index_of(proband_id);
                if idx.is_none() {
                    tracing::warn!(
                        "gene {}: proband {} has no phenotypes, skipping",
                        gene,
                        proband_id
                    );
                }
                idx
            })
            .collect::<Vec<_>>();
        if group.len() < 2 {
            Err(Skip {
                probands: group.len(),
                reason: format!(
                    "fewer than 2 probands with phenotypes ({} of {} listed)",
                    group.len(),
                    proband_ids.len()
                ),
            })
        } else {
            Ok(group)
        }
    }

    /// Analyze all genes; records follow the input order.
    ///
    /// If `stop` is raised, null distributions not completed by then are not computed and
    /// genes of those sizes are left out of the report, which is marked as partial. Skipped
    /// genes and genes with a completed null distribution are always reported.
    ///
    /// # Errors
    ///
    /// If a null distribution cannot be computed for a reason other than cancellation.
    pub fn analyze(&self, genes: &GeneMembership, stop: &AtomicBool) -> Result<Report, Error> {
        let groups = genes
            .iter()
            .map(|(gene, proband_ids)| (gene, self.proband_group(gene, proband_ids)))
            .collect::<Vec<_>>();

        let group_sizes = groups
            .iter()
            .filter_map(|(_, group)| group.as_ref().ok().map(Vec::len))
            .collect::<Vec<_>>();
        tracing::info!(
            "  simulating null distributions for {} group sizes ...",
            group_sizes.iter().unique().count()
        );
        let before_simulation = Instant::now();
        match self.engine.warm(&group_sizes, stop) {
            Ok(()) => tracing::info!("  ... done simulating in {:?}", before_simulation.elapsed()),
            Err(Error::Cancelled) => tracing::warn!("  ... simulation interrupted"),
            Err(e) => return Err(e),
        }

        let results = groups
            .par_iter()
            .progress_with(crate::common::progress_bar(groups.len()))
            .map(|(gene, group)| match group {
                Err(skip) => Some(GeneResult {
                    gene: (*gene).clone(),
                    probands: skip.probands,
                    similarity: None,
                    p_value: None,
                    iterations: None,
                    status: Status::Skipped,
                    reason: Some(skip.reason.clone()),
                }),
                Ok(members) => {
                    // Missing only if the simulation for this size was interrupted.
                    let null = self.engine.cached(members.len())?;
                    let sets = members
                        .iter()
                        .map(|idx| self.cohort.get(*idx).terms.as_slice())
                        .collect::<Vec<_>>();
                    let observed = self.ctx.group_similarity(&sets)?;
                    Some(GeneResult {
                        gene: (*gene).clone(),
                        probands: members.len(),
                        similarity: Some(observed),
                        p_value: Some(null.p_value(observed)),
                        iterations: Some(null.len() as u64),
                        status: Status::Analyzed,
                        reason: None,
                    })
                }
            })
            .collect::<Vec<_>>();

        let partial = results.iter().any(Option::is_none);
        Ok(Report {
            results: results.into_iter().flatten().collect(),
            partial,
        })
    }
}

/// Sort by ascending P-value; skipped genes go last, ties keep their order.
pub fn sort_by_p_value(results: &mut [GeneResult]) {
    results.sort_by(|a, b| match (a.p_value, b.p_value) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Parameters of the run, written into the JSON report.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Permutation engine settings.
    pub settings: Settings,
    /// Set similarity combiner.
    pub combiner: SetCombiner,
    /// Whether probands were randomly reassigned to genes.
    pub permute: bool,
}

/// JSON report container.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Container {
    /// Version information.
    pub version: Version,
    /// Parameters of the run.
    pub parameters: Parameters,
    /// Whether the run was interrupted.
    pub partial: bool,
    /// The per-gene records.
    pub results: Vec<GeneResult>,
}

/// Column names of the TSV output, in the field order of [`GeneResult`].
const TSV_HEADER: [&str; 7] = [
    "gene",
    "probands",
    "similarity",
    "p_value",
    "iterations",
    "status",
    "reason",
];

/// Write records as tab-separated values with header.
///
/// The header is written even if there are no records.
///
/// # Errors
///
/// In the case of I/O or serialization failure.
pub fn write_tsv<W: Write>(results: &[GeneResult], writer: W) -> Result<(), anyhow::Error> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(TSV_HEADER)?;
    for record in results {
        csv_writer.serialize(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write the report container as pretty-printed JSON.
///
/// # Errors
///
/// In the case of I/O or serialization failure.
pub fn write_json<W: Write>(container: &Container, mut writer: W) -> Result<(), anyhow::Error> {
    serde_json::to_writer_pretty(&mut writer, container)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write the report in `format`.
fn write_report<W: Write>(
    format: OutputFormat,
    container: &Container,
    writer: W,
) -> Result<(), anyhow::Error> {
    match format {
        OutputFormat::Tsv => write_tsv(&container.results, writer),
        OutputFormat::Json => write_json(container, writer),
    }
}

/// Install a Ctrl-C handler that raises the returned stop flag.
fn install_stop_handler() -> Result<Arc<AtomicBool>, anyhow::Error> {
    let stop = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let flag = Arc::clone(&stop);
    std::thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping at the next checkpoint ...");
                flag.store(true, Ordering::Relaxed);
            }
        });
    });
    Ok(stop)
}

/// Run the analysis with an explicit stop flag.
///
/// # Errors
///
/// In the case of loading, analysis, or output failure.
pub fn run_with_stop(args: &Args, stop: &AtomicBool) -> Result<Report, anyhow::Error> {
    tracing::info!("Loading ontology...");
    let before_loading = Instant::now();
    let obo = obo::load_obo(crate::common::expand_path(&args.path_ontology)?)?;
    let graph = OntologyGraph::from_records(&obo.records)?;
    tracing::info!(
        "...done loading ontology [{}] with {} terms in {:?}",
        obo.data_version.as_deref().unwrap_or("unknown version"),
        graph.len(),
        before_loading.elapsed()
    );

    tracing::info!("Loading phenotypes and genes...");
    let before_cohort = Instant::now();
    let raw = cohort::load_phenotypes(crate::common::expand_path(&args.path_phenotypes)?)?;
    let cohort = Cohort::resolve(&graph, &raw);
    let mut genes = cohort::load_genes(crate::common::expand_path(&args.path_genes)?)?;
    tracing::info!(
        "...done loading {} probands and {} genes in {:?}",
        cohort.len(),
        genes.len(),
        before_cohort.elapsed()
    );

    let seed = args.seed.unwrap_or_else(|| fastrand::u64(..));
    tracing::info!("Using seed {}", seed);
    if args.permute {
        tracing::info!("Randomly reassigning probands to genes");
        let mut rng = fastrand::Rng::with_seed(seed);
        genes = cohort::permute_probands(&genes, &mut rng);
    }

    tracing::info!("Computing information content...");
    let ic = InformationContent::from_cohort(&graph, &cohort);
    let ctx = Context::new(&graph, &ic, args.combiner);

    tracing::info!("Analysing similarity...");
    let before_analysis = Instant::now();
    let settings = Settings {
        iterations: args.iterations,
        batch_size: args.batch_size,
        seed,
    };
    let mut report = Analyzer::new(ctx, &cohort, settings).analyze(&genes, stop)?;
    tracing::info!("...done analysing in {:?}", before_analysis.elapsed());
    if report.partial {
        tracing::warn!(
            "run was interrupted, writing {} of {} genes",
            report.results.len(),
            genes.len()
        );
    }

    if args.sort_by_p_value {
        sort_by_p_value(&mut report.results);
    }

    let container = Container {
        version: Version::new(obo.data_version.as_deref()),
        parameters: Parameters {
            settings,
            combiner: args.combiner,
            permute: args.permute,
        },
        partial: report.partial,
        results: report.results.clone(),
    };
    match args.path_output.as_ref() {
        Some(path) => {
            let mut writer =
                crate::common::open_write_maybe_gz(crate::common::expand_path(path)?)?;
            write_report(args.output_format, &container, &mut writer)?;
            writer.finish()?;
        }
        None => write_report(args.output_format, &container, std::io::stdout().lock())?,
    }

    tracing::info!(
        "{: >4} | {: <10} | {: >10} | {: >10}",
        "rank",
        "gene",
        "P-value",
        "similarity"
    );
    tracing::info!("     |            |            |");
    for (i, result) in report
        .results
        .iter()
        .filter(|r| r.status == Status::Analyzed)
        .sorted_by(|a, b| {
            a.p_value
                .unwrap_or(1.0)
                .total_cmp(&b.p_value.unwrap_or(1.0))
        })
        .take(10)
        .enumerate()
    {
        tracing::info!(
            "{: >4} | {: <10} | {: >10.5} | {: >10.4}",
            i + 1,
            result.gene,
            result.p_value.unwrap_or(1.0),
            result.similarity.unwrap_or_default()
        );
    }

    Ok(report)
}

/// Main entry point for `analyze` sub command.
///
/// # Errors
///
/// In the case of loading, analysis, or output failure.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    crate::common::init_env_logger(args_common);

    if let Some(num_threads) = args.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()?;
    }

    let stop = install_stop_handler()?;
    run_with_stop(args, &stop)?;

    tracing::info!("All done. Have a nice day!");
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use kmersearch::cli::counters::CorpusLoadCounters;
use kmersearch::cli::io::load_corpus;
use kmersearch::cli::opts::{AnalyzeArgs, CorpusArgs, EngineArgs, MetaDirArgs};
use kmersearch::kmersearch::analyze::{
    perform_highfreq_analysis, undo_highfreq_analysis, AnalyzeOptions, CancelFlag,
};
use kmersearch::kmersearch::config::{EngineConfig, EngineContext};
use kmersearch::kmersearch::index::MemIndex;
use kmersearch::kmersearch::score::{correctedscore, rawscore};
use kmersearch::kmersearch::seq::{self, Alphabet};
use kmersearch::kmersearch::store::{MetadataStore, RelId};
use std::time::Instant;

/// Command-line interface of the k-mer similarity-search engine
#[derive(Parser)]
#[command(
    name = "kmersearch",
    about = "K-mer similarity search over DNA sequence corpora",
    long_about = "K-mer similarity search over DNA sequence corpora.


EXAMPLES:
    // Analyze a corpus and persist the high-frequency k-mer set
    $ kmersearch analyze -i corpus.txt -k 8 -t 4 -m <path/to/meta_dir/>

    // Search the corpus for rows sharing k-mers with the query
    $ kmersearch search -i corpus.txt -k 8 -q ACGTACGTNR -m <path/to/meta_dir/>
    ",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count per-row k-mer appearances and persist the high-frequency set
    Analyze {
        #[clap(flatten)]
        corpus: CorpusArgs,
        #[clap(flatten)]
        engine: EngineArgs,
        #[clap(flatten)]
        analysis: AnalyzeArgs,
        #[clap(flatten)]
        meta: MetaDirArgs,
    },
    /// Remove a persisted analysis and invalidate its caches
    Undo {
        /// Logical table name used in metadata records [string]
        #[clap(long, default_value = "corpus")]
        table: String,
        /// Logical column name used in metadata records [string]
        #[clap(long, default_value = "seq")]
        column: String,
        #[clap(flatten)]
        meta: MetaDirArgs,
    },
    /// Find corpus rows sharing at least min-score k-mers with the query
    Search {
        #[clap(flatten)]
        corpus: CorpusArgs,
        #[clap(flatten)]
        engine: EngineArgs,
        #[clap(flatten)]
        meta: MetaDirArgs,
        /// Query sequence text; IUPAC degenerate letters expand [string]
        #[clap(short = 'q', long, required = true)]
        query: String,
        /// Maximum number of hits to print [integer]
        #[clap(long, default_value = "20")]
        limit: usize,
    },
    /// Exact shared-k-mer count between one sequence and a query
    Rawscore {
        #[clap(flatten)]
        engine: EngineArgs,
        /// Stored-side sequence text [string]
        #[clap(short = 's', long, required = true)]
        sequence: String,
        /// Query sequence text [string]
        #[clap(short = 'q', long, required = true)]
        query: String,
    },
    /// Raw score plus mutual high-frequency k-mers for a column
    Correctedscore {
        #[clap(flatten)]
        engine: EngineArgs,
        #[clap(flatten)]
        meta: MetaDirArgs,
        /// Logical table name used in metadata records [string]
        #[clap(long, default_value = "corpus")]
        table: String,
        /// Logical column name used in metadata records [string]
        #[clap(long, default_value = "seq")]
        column: String,
        /// Stored-side sequence text [string]
        #[clap(short = 's', long, required = true)]
        sequence: String,
        /// Query sequence text [string]
        #[clap(short = 'q', long, required = true)]
        query: String,
    },
}

fn main() {
    env_logger::init();
    // Catch and handle errors
    // Ensures that tempfile has time to remove the tmp dir
    if let Err(e) = run() {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn load_store(meta_dir: &Option<std::path::PathBuf>) -> Result<MetadataStore> {
    match meta_dir {
        Some(dir) => MetadataStore::load(dir).context("loading metadata directory"),
        None => Ok(MetadataStore::new()),
    }
}

fn save_store(store: &MetadataStore, meta_dir: &Option<std::path::PathBuf>) -> Result<()> {
    if let Some(dir) = meta_dir {
        store.save(dir).context("saving metadata directory")?;
    }
    Ok(())
}

fn run() -> Result<()> {
    let start_time = Instant::now();
    match Cli::parse().command {
        Command::Analyze {
            corpus,
            engine,
            analysis,
            meta,
        } => {
            println!("Start: Loading corpus");
            let mut counters = CorpusLoadCounters::default();
            let rows = load_corpus(&corpus.input, &mut counters)?;
            println!("       {}", counters.report());

            let config = engine.to_config();
            let store = load_store(&meta.meta_dir)?;
            let mut ctx = EngineContext::with_store(config, store)?;
            let rel = RelId::new(&corpus.table, &corpus.column);

            let workers = analysis.n_threads.max(1);
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build_global()
                .context("building Rayon thread pool")?;

            let pb = ProgressBar::new(workers as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("       {bar:40} {pos}/{len} [{elapsed_precise}] {msg}")
                    .unwrap(),
            );

            println!("Start: Counting k-mer appearances");
            let summary = perform_highfreq_analysis(
                &mut ctx,
                &rel,
                &rows,
                &AnalyzeOptions {
                    parallelism: workers,
                    batch_flush_threshold: analysis.batch_flush_threshold,
                    mem_budget_bytes: analysis.merge_mem_mib << 20,
                },
                &CancelFlag::new(),
                Some(&pb),
            )?;
            pb.finish_with_message("| Finished counting");

            save_store(&ctx.store, &meta.meta_dir)?;

            println!(
                "Analyzed {}: {} rows, {} distinct k-mers, {} high-frequency ({} workers, {} ms)",
                summary.rel,
                summary.total_rows,
                summary.distinct_kmers,
                summary.highfreq_count,
                summary.workers,
                summary.elapsed_ms
            );
        }

        Command::Undo {
            table,
            column,
            meta,
        } => {
            let store = load_store(&meta.meta_dir)?;
            let mut ctx = EngineContext::with_store(EngineConfig::default(), store)?;
            let rel = RelId::new(&table, &column);
            let summary = undo_highfreq_analysis(&mut ctx, &rel)?;
            save_store(&ctx.store, &meta.meta_dir)?;
            println!(
                "Removed analysis of {}: {} high-frequency k-mers dropped",
                summary.rel, summary.removed_kmers
            );
        }

        Command::Search {
            corpus,
            engine,
            meta,
            query,
            limit,
        } => {
            println!("Start: Loading corpus");
            let mut counters = CorpusLoadCounters::default();
            let rows = load_corpus(&corpus.input, &mut counters)?;
            println!("       {}", counters.report());

            let config = engine.to_config();
            let store = load_store(&meta.meta_dir)?;
            let mut ctx = EngineContext::with_store(config, store)?;
            let rel = RelId::new(&corpus.table, &corpus.column);

            println!("Start: Building index");
            let index_id = format!("{}_{}_kmer_idx", corpus.table, corpus.column);
            let index = MemIndex::build(&mut ctx, &index_id, &rel, &rows)?;

            println!("Start: Searching");
            let hits = index.search(&mut ctx, &rows, &query)?;
            println!("{} row(s) matched", hits.len());
            for hit in hits.iter().take(limit) {
                let text = seq::decode(&rows[hit.row]).context("decoding matched row")?;
                println!("row {}\tscore {}\t{}", hit.row, hit.rawscore, text);
            }
            if hits.len() > limit {
                println!("... {} more", hits.len() - limit);
            }
        }

        Command::Rawscore {
            engine,
            sequence,
            query,
        } => {
            let mut ctx = EngineContext::new(engine.to_config())?;
            let stored = seq::encode(Alphabet::for_text(&sequence), &sequence)?;
            println!("{}", rawscore(&mut ctx, &stored, &query)?);
        }

        Command::Correctedscore {
            engine,
            meta,
            table,
            column,
            sequence,
            query,
        } => {
            let store = load_store(&meta.meta_dir)?;
            let mut ctx = EngineContext::with_store(engine.to_config(), store)?;
            let rel = RelId::new(&table, &column);
            let stored = seq::encode(Alphabet::for_text(&sequence), &sequence)?;
            println!("{}", correctedscore(&mut ctx, &rel, &stored, &query)?);
        }
    }

    let elapsed = start_time.elapsed();
    println!("Elapsed time: {:.2?}", elapsed);
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fli::index::{
    Index, Indexer, Preprocess, SearchMode, merge_sorted_files, sort_files_separately,
};
use fli::utils::lines::split_lines;
use fli::utils::{AppConfig, Progress};
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Parser)]
#[command(name = "fli")]
#[command(about = "Disk-backed membership index for large line sets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort and deduplicate each file separately
    Sort {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        out_dir: PathBuf,
    },
    /// Merge separately sorted files into globally sorted files
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        out_dir: PathBuf,
    },
    /// Build an index from line files
    Index {
        /// Resource directory for the index
        dir: PathBuf,

        inputs: Vec<PathBuf>,

        /// How much preprocessing the inputs need
        #[arg(short, long, value_enum, default_value = "sort-and-merge")]
        preprocess: PreprocessArg,

        /// Exact number of batch files
        #[arg(long)]
        files: Option<usize>,

        #[arg(long)]
        min_files: Option<usize>,

        #[arg(long)]
        max_files: Option<usize>,
    },
    /// Check whether lines are in the index (reads stdin when none are given)
    Query {
        dir: PathBuf,

        lines: Vec<String>,

        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Show index statistics
    Stats {
        dir: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Read every batch and check the index invariants
    Verify { dir: PathBuf },
    /// Remove an index
    Drop { dir: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum PreprocessArg {
    None,
    Merge,
    SortAndMerge,
}

impl From<PreprocessArg> for Preprocess {
    fn from(arg: PreprocessArg) -> Self {
        match arg {
            PreprocessArg::None => Preprocess::None,
            PreprocessArg::Merge => Preprocess::Merge,
            PreprocessArg::SortAndMerge => Preprocess::SortAndMerge,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Seek,
    Mapped,
    Auto,
}

impl From<ModeArg> for SearchMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Full => SearchMode::FullLoad,
            ModeArg::Seek => SearchMode::Seek,
            ModeArg::Mapped => SearchMode::Mapped,
            ModeArg::Auto => SearchMode::Auto,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("FLI_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let progress = |message: &str| {
        if config.show_progress && !cli.quiet {
            Progress::console(message)
        } else {
            Progress::hidden()
        }
    };

    match cli.command {
        Commands::Sort { inputs, out_dir } => {
            let outputs = sort_files_separately(&inputs, &out_dir, &mut progress("Sorting"))
                .context("Failed to sort files")?;
            print_paths(&outputs);
        }
        Commands::Merge { inputs, out_dir } => {
            let outputs = merge_sorted_files(&inputs, &out_dir, &mut progress("Merging"))
                .context("Failed to merge files")?;
            print_paths(&outputs);
        }
        Commands::Index {
            dir,
            inputs,
            preprocess,
            files,
            min_files,
            max_files,
        } => {
            let mut options = config.indexer.clone();
            options.wanted_file_count = files.or(options.wanted_file_count);
            options.min_file_count = min_files.unwrap_or(options.min_file_count);
            options.max_file_count = max_files.unwrap_or(options.max_file_count);

            let indexer = Indexer::new(&dir, options)?.with_query_options(config.query.clone());
            let index = indexer
                .index_files(&inputs, preprocess.into(), &mut progress("Indexing"))
                .with_context(|| format!("Failed to build index in {}", dir.display()))?;
            println!(
                "Indexed {} lines into {} batches at {}",
                index.line_count(),
                index.batch_count(),
                dir.display()
            );
        }
        Commands::Query { dir, lines, mode } => {
            let mut options = config.query.clone();
            if let Some(mode) = mode {
                options.mode = mode.into();
            }
            let index = open_index(&dir, &options)?;

            let lines: Vec<Vec<u8>> = if lines.is_empty() {
                let mut input = Vec::new();
                io::stdin()
                    .read_to_end(&mut input)
                    .context("Failed to read stdin")?;
                split_lines(&input).map(|l| l.to_vec()).collect()
            } else {
                lines.into_iter().map(String::into_bytes).collect()
            };

            if !print_lookups(&index, &lines)? {
                std::process::exit(1);
            }
        }
        Commands::Stats { dir, json } => {
            let index = open_index(&dir, &config.query)?;
            let stats = index.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Index: {}", dir.display());
                println!("  Format version: {}", stats.version);
                println!("  Generation: {}", stats.generation);
                println!("  Lines: {}", stats.line_count);
                println!("  Batches: {}", stats.batch_count);
                println!(
                    "  Batch lines: {} - {}",
                    stats.min_batch_lines, stats.max_batch_lines
                );
                println!("  Total size: {:.1} MB", stats.total_bytes as f64 / 1024.0 / 1024.0);
                println!("  Largest batch: {} bytes", stats.max_batch_bytes);
                println!("  Search mode: {:?}", stats.mode);
            }
        }
        Commands::Verify { dir } => {
            let index = open_index(&dir, &config.query)?;
            index
                .verify()
                .with_context(|| format!("Index at {} failed verification", dir.display()))?;
            println!("OK: {} lines in {} batches", index.line_count(), index.batch_count());
        }
        Commands::Drop { dir } => {
            let indexer = Indexer::new(&dir, config.indexer.clone())?;
            indexer.drop_index()?;
            println!("Removed index at {}", dir.display());
        }
    }

    Ok(())
}

fn open_index(dir: &Path, options: &fli::index::QueryOptions) -> Result<Index> {
    Index::open(dir, options).with_context(|| format!("Failed to open index at {}", dir.display()))
}

fn print_paths(paths: &[PathBuf]) {
    for path in paths {
        println!("{}", path.display());
    }
}

/// Print one colored verdict per line; returns true if every line was found
fn print_lookups(index: &Index, lines: &[Vec<u8>]) -> Result<bool> {
    let choice = if io::stdout().is_terminal() {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);
    let mut all_found = true;

    for line in lines {
        let found = index
            .try_has(line)
            .with_context(|| format!("Lookup failed for {:?}", String::from_utf8_lossy(line)))?;
        all_found &= found;

        let (label, color) = if found {
            ("found  ", Color::Green)
        } else {
            ("missing", Color::Red)
        };
        stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
        write!(stdout, "{}", label)?;
        stdout.reset()?;
        writeln!(stdout, " {}", String::from_utf8_lossy(line))?;
    }

    stdout.flush()?;
    Ok(all_found)
}

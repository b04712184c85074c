use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cu_tf_resolver::{
    output_dir_is_occupied, read_observations, write_stats_csv, BatchComposer, BatchOptions,
    ComposedPair, CsvResultWriter, EdgeObservation, EdgeSeriesStore, ExtractionConfig, FrameGraph,
    ResultWriter, StreamingExtractor,
};
use log::{info, warn};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::fs::File;
use std::io::{stdout, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Turns recorded tf observations into transform series between arbitrary frames.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Log debug messages, skipped lookups included.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Latest value lookups from the base frame to each target, message by message.
    Stream {
        /// RON extraction configuration.
        #[arg(short, long)]
        config: PathBuf,
        /// Dynamic observations, `timestamp_ns,parent,child,x,y,z,qx,qy,qz,qw` per line.
        #[arg(long)]
        observations: PathBuf,
        /// Static observations loaded before anything else.
        #[arg(long)]
        static_observations: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        /// Write into a non empty output directory.
        #[arg(long)]
        overwrite: bool,
    },
    /// Time aligned composition on the fastest edge timeline.
    Batch {
        /// RON `child -> parent` map, inferred from the observations when absent.
        #[arg(long)]
        tree: Option<PathBuf>,
        #[arg(long)]
        observations: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, requires = "target", conflicts_with = "all_from_root")]
        source: Option<String>,
        #[arg(long, requires = "source")]
        target: Option<String>,
        /// Every frame in the root frame.
        #[arg(long)]
        all_from_root: bool,
        /// Forward fill every result onto the reference timeline.
        #[arg(long)]
        resample: bool,
        #[arg(long, default_value_t = BatchOptions::default().static_threshold)]
        static_threshold: usize,
        #[arg(long)]
        overwrite: bool,
    },
    /// Per edge publication statistics as CSV.
    Stats {
        #[arg(long)]
        observations: PathBuf,
        #[arg(long, default_value_t = BatchOptions::default().static_threshold)]
        static_threshold: usize,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Prints the frame tree in Graphviz dot.
    Tree {
        #[arg(long)]
        tree: Option<PathBuf>,
        /// Infers the tree from these observations instead.
        #[arg(long, conflicts_with = "tree")]
        observations: Option<PathBuf>,
    },
}

fn load_observations(path: &Path) -> Result<Vec<EdgeObservation>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let observations = read_observations(BufReader::new(file))
        .with_context(|| format!("reading {}", path.display()))?;
    info!(
        "Read {} observations from {}",
        observations.len(),
        path.display()
    );
    Ok(observations)
}

fn load_tree(tree: Option<&Path>, observations: &[EdgeObservation]) -> Result<FrameGraph> {
    let graph = match tree {
        Some(path) => FrameGraph::read_tree_file(path)
            .with_context(|| format!("loading frame tree {}", path.display()))?,
        None => FrameGraph::from_observations(observations)?,
    };
    Ok(graph)
}

fn run_stream(
    config: &Path,
    observations: &Path,
    static_observations: Option<&Path>,
    output: &Path,
    overwrite: bool,
) -> Result<()> {
    if !overwrite && output_dir_is_occupied(output)? {
        warn!(
            "Output folder {} already exists and is not empty, skipping",
            output.display()
        );
        return Ok(());
    }

    let config = ExtractionConfig::read_config_file(config)
        .with_context(|| format!("loading configuration {}", config.display()))?;
    info!(
        "Extracting transforms from '{}' to {} target frames",
        config.base_frame,
        config.target_frames.len()
    );
    let use_euler = config.use_euler;
    let mut extractor = StreamingExtractor::new(config)?;
    if let Some(path) = static_observations {
        extractor.load_static(&load_observations(path)?);
    }
    extractor.run(load_observations(observations)?);

    let mut writer = CsvResultWriter::new(output, use_euler);
    let written = extractor.write_results(&mut writer)?;
    info!("Wrote {} files to {}", written.len(), output.display());
    Ok(())
}

fn write_pair(
    composer: &BatchComposer,
    writer: &mut CsvResultWriter,
    pair: &ComposedPair,
    resample: bool,
) -> Result<()> {
    for series in [&pair.forward, &pair.reverse] {
        if resample {
            let resampled = series.resample(&composer.timeline().stamps);
            writer.write_series(&resampled.name, &resampled.samples)?;
        } else {
            writer.write_series(&series.name, &series.samples)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_batch(
    tree: Option<&Path>,
    observations: &Path,
    output: &Path,
    pair: Option<(&str, &str)>,
    all_from_root: bool,
    resample: bool,
    options: BatchOptions,
    overwrite: bool,
) -> Result<()> {
    let observations = load_observations(observations)?;
    let graph = Arc::new(load_tree(tree, &observations)?);
    let store = EdgeSeriesStore::from_observations(&observations, options.static_threshold);
    let composer = BatchComposer::new(graph.clone(), store);

    let reference_frame = match pair {
        Some((source, _)) => source,
        None => graph.root(),
    };
    let dir = output.join(reference_frame.replace('/', "_"));
    if !overwrite && output_dir_is_occupied(&dir)? {
        warn!(
            "Output folder {} already exists and is not empty, skipping",
            dir.display()
        );
        return Ok(());
    }
    let mut writer = CsvResultWriter::new(&dir, false);

    match pair {
        Some((source, target)) => {
            let composed = composer.compute_pair(source, target)?;
            write_pair(&composer, &mut writer, &composed, resample)?;
        }
        None if all_from_root => {
            for composed in composer.compute_all_from_root()?.values() {
                write_pair(&composer, &mut writer, composed, resample)?;
            }
        }
        None => bail!("either --source and --target or --all-from-root is required"),
    }
    info!("Batch results written to {}", dir.display());
    Ok(())
}

fn run_stats(observations: &Path, options: BatchOptions, output: &Path) -> Result<()> {
    let observations = load_observations(observations)?;
    let store = EdgeSeriesStore::from_observations(&observations, options.static_threshold);
    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(file);
    write_stats_csv(&mut out, &store.stats())?;
    out.flush()?;
    info!("Statistics of {} edges written to {}", store.len(), output.display());
    Ok(())
}

fn run_tree(tree: Option<&Path>, observations: Option<&Path>) -> Result<()> {
    let observations = match observations {
        Some(path) => load_observations(path)?,
        None if tree.is_none() => bail!("either --tree or --observations is required"),
        None => Vec::new(),
    };
    let graph = load_tree(tree, &observations)?;
    let mut out = stdout().lock();
    graph.render(&mut out)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("installing the terminal logger")?;

    match cli.command {
        Command::Stream {
            config,
            observations,
            static_observations,
            output,
            overwrite,
        } => run_stream(
            &config,
            &observations,
            static_observations.as_deref(),
            &output,
            overwrite,
        ),
        Command::Batch {
            tree,
            observations,
            output,
            source,
            target,
            all_from_root,
            resample,
            static_threshold,
            overwrite,
        } => run_batch(
            tree.as_deref(),
            &observations,
            &output,
            source.as_deref().zip(target.as_deref()),
            all_from_root,
            resample,
            BatchOptions { static_threshold },
            overwrite,
        ),
        Command::Stats {
            observations,
            static_threshold,
            output,
        } => run_stats(&observations, BatchOptions { static_threshold }, &output),
        Command::Tree { tree, observations } => {
            run_tree(tree.as_deref(), observations.as_deref())
        }
    }
}

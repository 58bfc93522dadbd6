//! bacnet CLI: extract cell/nanowire networks from micrographs.

use std::path::{Path, PathBuf};

use bacnet::{
    network::StoreParams, process_with_labels, CancelToken, CellSubtype, DarknetDetector, EdgeKind,
    ImagePipeline, InteractiveGraphStore, NetworkGraph, NetworkResult, PipelineConfig, Progress,
    Stage,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "bacnet")]
#[command(about = "Extract bacterial cell and nanowire networks from micrographs")]
#[command(version)]
struct Cli {
    /// Pipeline config (JSON). Defaults apply to every missing field.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). Ignored when RUST_LOG is set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the object detector on an image and write its network graph.
    Detect {
        /// Path to the input image.
        #[arg(long)]
        image: PathBuf,

        /// Path to write the graph (JSON).
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Build the network from an image and its YOLO label file.
    Labels {
        /// Path to the input image.
        #[arg(long)]
        image: PathBuf,

        /// YOLO label file for the image.
        #[arg(long)]
        labels: PathBuf,

        /// Class-name file indexed by the label class column.
        #[arg(long)]
        classes: Option<PathBuf>,

        /// Path to write the graph (JSON).
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Run the detector on every image of a directory.
    Batch {
        /// Directory of images.
        #[arg(long)]
        dir: PathBuf,

        /// Directory for `<image stem>.json` graphs.
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Edit a saved graph by position.
    Edit(EditArgs),
    /// Write the default config as JSON.
    InitConfig {
        #[arg(short, long)]
        out: PathBuf,
    },
}

/// Edits are applied in this order: edge removals, node removals, new
/// cells, new edges, subtypes.
#[derive(Args)]
struct EditArgs {
    /// Graph to edit (JSON).
    #[arg(long)]
    graph: PathBuf,

    /// Where to write the edited graph. Defaults to overwriting `--graph`.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Remove the latest edge between the nodes nearest to X1,Y1 and X2,Y2.
    #[arg(long, value_name = "X1,Y1:X2,Y2", value_parser = parse_segment)]
    remove_edge: Vec<((f32, f32), (f32, f32))>,

    /// Remove the cell nearest to X,Y and its edges.
    #[arg(long, value_name = "X,Y", value_parser = parse_point)]
    remove_node: Vec<(f32, f32)>,

    /// Add a cell at X,Y.
    #[arg(long, value_name = "X,Y", value_parser = parse_point)]
    add_cell: Vec<(f32, f32)>,

    /// Connect the nodes nearest to X1,Y1 and X2,Y2.
    #[arg(long, value_name = "X1,Y1:X2,Y2", value_parser = parse_segment)]
    add_edge: Vec<((f32, f32), (f32, f32))>,

    /// Kind of the edges added with --add-edge.
    #[arg(long, value_enum, default_value_t = EdgeKindArg::CellContact)]
    edge_kind: EdgeKindArg,

    /// Set the subtype of the cell nearest to X,Y.
    #[arg(long, value_name = "X,Y=SUBTYPE", value_parser = parse_subtype)]
    subtype: Vec<((f32, f32), CellSubtype)>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EdgeKindArg {
    CellContact,
    CellToCell,
    CellToSurface,
}

impl From<EdgeKindArg> for EdgeKind {
    fn from(arg: EdgeKindArg) -> Self {
        match arg {
            EdgeKindArg::CellContact => EdgeKind::CellContact,
            EdgeKindArg::CellToCell => EdgeKind::CellToCell,
            EdgeKindArg::CellToSurface => EdgeKind::CellToSurface,
        }
    }
}

fn parse_point(raw: &str) -> Result<(f32, f32), String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {raw:?}"))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<f32>()
            .map_err(|e| format!("bad coordinate {v:?}: {e}"))
    };
    Ok((coord(x)?, coord(y)?))
}

fn parse_segment(raw: &str) -> Result<((f32, f32), (f32, f32)), String> {
    let (a, b) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected X1,Y1:X2,Y2, got {raw:?}"))?;
    Ok((parse_point(a)?, parse_point(b)?))
}

fn parse_subtype(raw: &str) -> Result<((f32, f32), CellSubtype), String> {
    let (p, s) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected X,Y=SUBTYPE, got {raw:?}"))?;
    let subtype = serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
        .map_err(|_| {
            format!("unknown subtype {s:?} (expected normal, filament, curved or spheroplast)")
        })?;
    Ok((parse_point(p)?, subtype))
}

fn init_logging(verbose: u8) {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        bacnet::core::init_tracing(false);
    }
    #[cfg(not(feature = "tracing"))]
    {
        if std::env::var_os("RUST_LOG").is_some() {
            let _ = env_logger::try_init();
            return;
        }
        let level = match verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        let _ = bacnet::core::init_with_level(level);
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Detect { image, out } => run_detect(config, &image, &out),
        Commands::Labels {
            image,
            labels,
            classes,
            out,
        } => run_labels(&config, &image, &labels, classes.as_deref(), &out),
        Commands::Batch { dir, out_dir } => run_batch(config, &dir, &out_dir),
        Commands::Edit(args) => run_edit(config.store, args),
        Commands::InitConfig { out } => {
            config.write_json(&out)?;
            info!("config written to {}", out.display());
            Ok(())
        }
    }
}

fn log_progress(stage: Stage, percent: u8) {
    if percent % 10 == 0 {
        info!("{:?}: {}%", stage, percent);
    }
}

fn summarize(result: &NetworkResult) {
    let r = &result.report;
    info!(
        "{} cells, {} edges: {} contact, {} cell-cell, {} cell-surface",
        result.graph.cell_count(),
        result.graph.edge_count(),
        r.contact_edges,
        r.cell_to_cell_edges,
        r.cell_to_surface_edges
    );
    if !r.unresolved_nanowires.is_empty() {
        warn!(
            "{} nanowires touch more than two cells and were left out",
            r.unresolved_nanowires.len()
        );
    }
}

fn run_detect(config: PipelineConfig, image: &Path, out: &Path) -> CliResult<()> {
    let detector = DarknetDetector::new(config.darknet.clone())?;
    let pipeline = ImagePipeline::new(detector, config)?;
    let result = pipeline.process_image(image, &mut log_progress, &CancelToken::new())?;
    summarize(&result);
    result.graph.write_json(out)?;
    info!("graph written to {}", out.display());
    Ok(())
}

fn run_labels(
    config: &PipelineConfig,
    image: &Path,
    labels: &Path,
    classes: Option<&Path>,
    out: &Path,
) -> CliResult<()> {
    let mut sink = |p| log_progress(Stage::EdgeBuilding, p);
    let result = process_with_labels(
        image,
        labels,
        classes,
        config,
        &mut Progress::new(&mut sink),
        &CancelToken::new(),
    )?;
    summarize(&result);
    result.graph.write_json(out)?;
    info!("graph written to {}", out.display());
    Ok(())
}

fn run_batch(config: PipelineConfig, dir: &Path, out_dir: &Path) -> CliResult<()> {
    let detector = DarknetDetector::new(config.darknet.clone())?;
    let pipeline = ImagePipeline::new(detector, config)?;
    std::fs::create_dir_all(out_dir)?;

    let results = pipeline.process_directory(
        dir,
        &mut |path, stage, p| {
            if p == 100 {
                info!("{}: {:?} done", path.display(), stage);
            }
        },
        &CancelToken::new(),
    )?;

    let total = results.len();
    let mut failed = 0usize;
    for (path, result) in results {
        match result {
            Ok(result) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                let out = out_dir.join(format!("{stem}.json"));
                result.graph.write_json(&out)?;
                info!("{} -> {}", path.display(), out.display());
            }
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        return Err(format!("{failed} of {total} images failed").into());
    }
    Ok(())
}

fn run_edit(params: StoreParams, args: EditArgs) -> CliResult<()> {
    let graph = NetworkGraph::load_json(&args.graph)?;
    let mut store = InteractiveGraphStore::new(graph, params);

    for (a, b) in &args.remove_edge {
        if store.remove_edge_near(*a, *b).is_none() {
            warn!("no edge near {:?} - {:?}", a, b);
        }
    }
    for &(x, y) in &args.remove_node {
        if store.remove_node_near(x, y).is_none() {
            warn!("no removable cell near ({}, {})", x, y);
        }
    }
    for &(x, y) in &args.add_cell {
        let id = store.add_cell(x, y);
        info!("added cell {} at ({}, {})", id, x, y);
    }
    for (a, b) in &args.add_edge {
        if store.add_edge_near(*a, *b, args.edge_kind.into()).is_none() {
            warn!("no pair of distinct nodes near {:?} - {:?}", a, b);
        }
    }
    for &((x, y), subtype) in &args.subtype {
        if store.set_subtype_near(x, y, subtype).is_none() {
            warn!("no cell near ({}, {})", x, y);
        }
    }

    let graph = store.into_graph();
    let out = args.out.as_deref().unwrap_or(&args.graph);
    graph.write_json(out)?;
    info!(
        "{} cells, {} edges written to {}",
        graph.cell_count(),
        graph.edge_count(),
        out.display()
    );
    Ok(())
}

//! Command-line driver for the nighttime-lights pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nightlight::config::{ProjectPaths, StudyConfig};
use nightlight::core::{clip, georef, normalize};
use nightlight::io::boundary::{BoundaryLoader, NaturalEarthSource};
use nightlight::io::download::{year_dir, BlackMarbleDownloader, EarthdataClient};
use nightlight::pipeline::{self, Pipeline, Stage};
use nightlight::types::BoundingBox;
use nightlight::utils;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nightlight")]
#[command(about = "VIIRS Black Marble nighttime-lights preprocessing for Chile")]
struct Args {
    /// Repository root (default: discovered from the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// JSON file overriding the study parameters
    #[arg(long, global = true, env = "NIGHTLIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search and download VNP46A3 granules
    Download {
        /// Years to download (default: configured study years)
        #[arg(long = "year")]
        years: Vec<i32>,
    },
    /// Average a year's granules into an annual composite
    Composite {
        #[arg(long)]
        year: i32,
        /// Keep pixels regardless of their quality flag
        #[arg(long)]
        no_quality_mask: bool,
    },
    /// Clip a raster to the Chile boundary
    Clip {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Boundary cache (default: data/raw/boundaries/chile.gpkg)
        #[arg(long)]
        boundary: Option<PathBuf>,
    },
    /// Georeference a raster with a bounding box
    Georef {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// min_lon,min_lat,max_lon,max_lat (default: configured bbox)
        #[arg(long, allow_hyphen_values = true, value_parser = parse_bbox)]
        bbox: Option<BoundingBox>,
        /// CRS to assign (default: configured CRS)
        #[arg(long)]
        crs: Option<String>,
    },
    /// Min-max normalize a raster to [0, 1]
    Normalize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Full pipeline for each year
    Run {
        #[arg(long = "year")]
        years: Vec<i32>,
        /// Use granules already on disk instead of downloading
        #[arg(long)]
        skip_download: bool,
    },
}

fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    s.parse().map_err(|e: nightlight::NtlError| e.to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    utils::suppress_warnings();

    let root = match &args.root {
        Some(root) => root.clone(),
        None => utils::set_working_directory_to_repo_root().context("Failed to locate repository root")?,
    };
    let paths = ProjectPaths::new(&root);
    paths.ensure_dirs().context("Failed to create project directories")?;

    let mut config = match &args.config {
        Some(path) => StudyConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StudyConfig::default(),
    };

    match args.command {
        Command::Download { years } => {
            let years = if years.is_empty() { config.years.clone() } else { years };
            let downloader = BlackMarbleDownloader::new(EarthdataClient::login()?);
            for year in years {
                let files = downloader
                    .download_year(year, &config.bbox, &paths.raw)
                    .with_context(|| format!("Download failed for {}", year))?;
                println!("{}: {} files in {}", year, files.len(), year_dir(&paths.raw, year).display());
            }
        }
        Command::Composite { year, no_quality_mask } => {
            config.use_quality_mask = !no_quality_mask;
            let granules = nightlight::io::download::existing_granules(&year_dir(&paths.raw, year))?;
            let out = pipeline::build_annual_composite(&paths, &config, year, &granules)
                .with_context(|| format!("Composite failed for {}", year))?;
            println!("{}", out.display());
        }
        Command::Clip { input, output, boundary } => {
            let cache = boundary.unwrap_or_else(|| paths.boundary_cache());
            let boundary = BoundaryLoader::new().load(&cache).context("Failed to load boundary")?;
            let out = clip::clip_raster_to_geometry(&input, &output, &boundary, &config.crs)?;
            println!("{}", out.display());
        }
        Command::Georef { input, output, bbox, crs } => {
            let bbox = bbox.unwrap_or(config.bbox);
            let crs = crs.unwrap_or_else(|| config.crs.clone());
            let out = georef::georef_raster_with_bbox(&input, &output, &bbox, &crs)?;
            println!("{}", out.display());
        }
        Command::Normalize { input, output } => {
            let out = normalize::minmax_normalize(&input, &output)?;
            println!("{}", out.display());
        }
        Command::Run { years, skip_download } => {
            if !years.is_empty() {
                config.years = years;
            }
            let downloader = if skip_download {
                None
            } else {
                Some(BlackMarbleDownloader::new(EarthdataClient::login()?))
            };
            let pipeline = Pipeline::new(
                paths.clone(),
                config,
                downloader,
                BoundaryLoader::<NaturalEarthSource>::new(),
            );
            for outputs in pipeline.run()? {
                println!(
                    "{}: {} granules -> {}",
                    outputs.year,
                    outputs.granules,
                    Stage::Normalized.path(&paths, outputs.year).display()
                );
            }
        }
    }

    Ok(())
}

#![warn(clippy::all)]

//! NEXRAD Replay command line.
//!
//! Drives the replay pipeline from a terminal:
//! - `render` turns a local Level-2 file into a PNG frame
//! - `list` shows the archive volumes for a site and date
//! - `prefetch` loads an event and renders every frame into the cache

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use nexrad_replay::cache::{FrameCache, RawCache};
use nexrad_replay::geo::compute_radar_bounds;
use nexrad_replay::nexrad::{ArchiveSource, S3ArchiveSource};
use nexrad_replay::prefetch::PrefetchManager;
use nexrad_replay::render::{parse_color_table, ColorTable, Product, Smoothing};
use nexrad_replay::worker::{DecodeRenderJob, WorkerPool, WorkerRequest};
use nexrad_replay::PipelineConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "nexrad-replay")]
#[command(about = "Decode, render and prefetch archived NEXRAD Level-2 radar")]
struct Args {
    /// Pipeline configuration file (JSON)
    #[arg(long, global = true, env = "NEXRAD_REPLAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one sweep of a local archive file to PNG
    Render {
        /// Level-2 archive file, optionally gzipped
        file: PathBuf,

        #[arg(long, default_value = "reflectivity")]
        product: Product,

        /// Index into the volume's elevation list
        #[arg(long, default_value_t = 0)]
        elevation: usize,

        /// Supplemental sweep within the lowest elevation
        #[arg(long)]
        sweep: Option<u8>,

        #[arg(long)]
        smoothing: Option<Smoothing>,

        /// Output edge length in pixels
        #[arg(long)]
        size: Option<u32>,

        /// Color table in the text palette format
        #[arg(long)]
        palette: Option<PathBuf>,

        /// Station latitude, used when the volume carries no coordinates
        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f32>,

        /// Station longitude, used when the volume carries no coordinates
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f32>,

        #[arg(long, short, default_value = "frame.png")]
        out: PathBuf,
    },

    /// List archived volumes for a site and UTC date
    List {
        #[arg(long)]
        site: String,

        /// Date as YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
    },

    /// Load an event and render every frame
    Prefetch {
        #[arg(long)]
        site: String,

        /// Event start (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,

        /// Event end (RFC 3339)
        #[arg(long)]
        end: DateTime<Utc>,

        #[arg(long, default_value = "reflectivity")]
        product: Product,

        #[arg(long, default_value_t = 0)]
        elevation: usize,

        #[arg(long)]
        smoothing: Option<Smoothing>,
    },
}

fn load_config(path: Option<&PathBuf>) -> PipelineConfig {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::default(),
    }
}

fn load_table(product: Product, palette: Option<&PathBuf>) -> Result<ColorTable> {
    match palette {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading palette {}", path.display()))?;
            Ok(parse_color_table(&text)?)
        }
        None => Ok(ColorTable::builtin(product)),
    }
}

fn archive_source(config: &PipelineConfig) -> Result<S3ArchiveSource> {
    Ok(S3ArchiveSource::new(
        &config.bucket,
        Duration::from_secs(config.http_timeout_secs),
    )?)
}

#[allow(clippy::too_many_arguments)]
async fn render(
    config: &PipelineConfig,
    file: PathBuf,
    product: Product,
    elevation: usize,
    sweep: Option<u8>,
    smoothing: Option<Smoothing>,
    size: Option<u32>,
    palette: Option<PathBuf>,
    fallback_coords: Option<(f32, f32)>,
    out: PathBuf,
) -> Result<()> {
    let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let table = load_table(product, palette.as_ref())?;
    let pool = WorkerPool::new(1, config.parsed_cache_capacity);

    let output = pool
        .submit(WorkerRequest::DecodeRender(DecodeRenderJob {
            volume_key: file.display().to_string(),
            data: data.into(),
            product,
            elevation_index: elevation,
            sweep_index: sweep,
            smoothing: smoothing.unwrap_or(config.smoothing),
            table: Arc::new(table),
            size: size.unwrap_or(config.canvas_size),
            range_km: config.range_km,
            fallback_coords,
        }))
        .await?
        .into_rendered()?;

    std::fs::write(&out, &output.png).with_context(|| format!("writing {}", out.display()))?;

    let bounds = compute_radar_bounds(
        output.site_lat as f64,
        output.site_lon as f64,
        output.range_km as f64,
    );
    println!(
        "{} {} elevation {} -> {} ({}x{})",
        output.site_id,
        product,
        output.elevation_number,
        out.display(),
        output.width,
        output.height
    );
    println!("{}", output.stats.summary());
    println!(
        "bounds: N {:.4} S {:.4} W {:.4} E {:.4}",
        bounds.north(),
        bounds.south(),
        bounds.west(),
        bounds.east()
    );
    Ok(())
}

async fn list(config: &PipelineConfig, site: &str, date: NaiveDate) -> Result<()> {
    let source = archive_source(config)?;
    let scans = source.list(&site.to_uppercase(), date).await?;
    for scan in &scans {
        let time = DateTime::<Utc>::from_timestamp_millis(scan.timestamp_ms)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{}  {:>10}  {}", time, scan.size, scan.key);
    }
    println!("{} volumes", scans.len());
    Ok(())
}

async fn prefetch(
    config: PipelineConfig,
    site: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    product: Product,
    elevation: usize,
    smoothing: Option<Smoothing>,
) -> Result<()> {
    let source = Arc::new(archive_source(&config)?);
    let pool = Arc::new(WorkerPool::new(config.worker_count, config.parsed_cache_capacity));
    let manager = PrefetchManager::new(
        config.clone(),
        source,
        pool.clone(),
        FrameCache::shared(config.frame_cache_capacity),
        RawCache::shared(config.raw_cache_capacity),
    );
    manager.set_view(product, elevation, smoothing.unwrap_or(config.smoothing));

    let timeline = manager.load_event(site, start, end).await?;
    println!("{} timeline frames for {}", timeline.len(), site.to_uppercase());

    let summary = manager
        .download_all(0, |done, total| {
            log::info!("Prefetch progress {}/{}", done, total);
        })
        .await?;

    let stats = pool.stats();
    println!(
        "rendered {}, cached {}, failed {} ({} worker jobs, {} crashed)",
        summary.rendered, summary.cached, summary.failed, stats.completed, stats.crashed
    );
    let frames = manager.frame_cache().lock().map(|c| c.len()).unwrap_or(0);
    println!("{} frames in cache", frames);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref());
    config.validate()?;

    match args.command {
        Command::Render {
            file,
            product,
            elevation,
            sweep,
            smoothing,
            size,
            palette,
            lat,
            lon,
            out,
        } => {
            render(
                &config,
                file,
                product,
                elevation,
                sweep,
                smoothing,
                size,
                palette,
                lat.zip(lon),
                out,
            )
            .await
        }
        Command::List { site, date } => list(&config, &site, date).await,
        Command::Prefetch {
            site,
            start,
            end,
            product,
            elevation,
            smoothing,
        } => prefetch(config, &site, start, end, product, elevation, smoothing).await,
    }
}

//! stripecache
//!
//! Assembles a parity array from member images (or in-memory disks), runs a
//! deterministic sub-stripe write workload through the partial-chunk cache,
//! verifies the data reads back, and reports reconciliation statistics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          stripecache                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workload   │───▶│  RaidVolume  │───▶│ Member disks │       │
//! │  │              │    │  + cache     │    │ (file / mem) │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             │ stats                             │
//! │                      ┌──────▼───────┐                           │
//! │                      │  /metrics    │                           │
//! │                      └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stripecache::adapters::{member_handles, FileDisk, MemDisk, ParityArrayIo};
use stripecache::array::{ArrayConfig, Layout, RaidLevel, VolumeConfigFile, SECTOR_SIZE_U64};
use stripecache::domain::MemberDisk;
use stripecache::finalize::finalizer_for;
use stripecache::metrics::{render_prometheus, ReconcileStatsSnapshot};
use stripecache::{FlushSchedulerConfig, RaidVolume, StripeGeometry};

// =============================================================================
// CLI Arguments
// =============================================================================

/// stripecache - partial-chunk write reconciliation for parity RAID
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML volume description; a 4-disk RAID-5 is used when absent
    #[arg(long, env = "STRIPECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Use in-memory member disks instead of the images in the config
    #[arg(long, env = "STRIPECACHE_IN_MEMORY")]
    in_memory: bool,

    /// Number of sub-stripe writes in the workload
    #[arg(long, env = "STRIPECACHE_WRITES", default_value = "512")]
    writes: usize,

    /// Chunk groups the workload spreads over
    #[arg(long, env = "STRIPECACHE_GROUPS", default_value = "8")]
    groups: u64,

    /// Metrics server bind address; when set, serve until Ctrl-C
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Final report printed to stdout.
#[derive(Debug, Serialize)]
struct RunReport {
    array: String,
    level: String,
    raid_disks: usize,
    chunk_sectors: usize,
    writes: usize,
    verified: bool,
    stats: ReconcileStatsSnapshot,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let file = match &args.config {
        Some(path) => VolumeConfigFile::load(path)
            .with_context(|| format!("loading volume description {}", path.display()))?,
        None => default_volume(),
    };
    let flush = FlushSchedulerConfig::from_section(&file.flush)?;
    let geometry = StripeGeometry::new(&file.array)?;
    if !geometry.level().has_parity() {
        bail!("{} has no partial-chunk cache to exercise", geometry.level());
    }

    info!("Starting stripecache");
    info!("  Level: {}", geometry.level());
    info!("  Disks: {}", geometry.raid_disks());
    info!("  Chunk: {} sectors", geometry.chunk_sectors());
    info!("  Layout: {:?}", geometry.layout());
    info!("  Flush interval: {:?}", flush.interval);

    let disks = open_members(&args, &file, &geometry)?;
    let finalizer = finalizer_for(&geometry, &disks)?;
    let level_io = ParityArrayIo::new(geometry.clone(), disks.clone(), finalizer.clone())?;
    let volume = Arc::new(RaidVolume::with_finalizer(
        file.array.clone(),
        disks,
        Arc::new(level_io),
        Some(finalizer),
        flush,
    )?);

    volume.start_flush_scheduler();

    if let Some(addr) = args.metrics_addr.clone() {
        let volume = volume.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, volume).await {
                error!("Metrics server error: {:#}", e);
            }
        });
    }

    let verified = run_workload(&volume, args.writes, args.groups).await?;
    volume
        .flush_all_now()
        .await
        .context("final flush left entries cached")?;

    let report = RunReport {
        array: volume.id().to_string(),
        level: geometry.level().to_string(),
        raid_disks: geometry.raid_disks(),
        chunk_sectors: geometry.chunk_sectors(),
        writes: args.writes,
        verified,
        stats: volume.stats_snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.metrics_addr.is_some() {
        info!("Serving metrics, press Ctrl-C to exit");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
    }

    volume.shutdown().await;
    if !verified {
        bail!("read-back verification failed");
    }
    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

// =============================================================================
// Array Assembly
// =============================================================================

fn default_volume() -> VolumeConfigFile {
    let mut array = ArrayConfig::new(RaidLevel::Raid5, 4, 128, 0).with_layout(Layout::LeftSymmetric);
    array.array_size = 64 * array.full_chunk_bytes();
    VolumeConfigFile {
        array,
        members: Vec::new(),
        flush: Default::default(),
    }
}

fn open_members(
    args: &Args,
    file: &VolumeConfigFile,
    geometry: &StripeGeometry,
) -> anyhow::Result<Vec<Arc<dyn MemberDisk>>> {
    let stripes = file.array.array_size.div_ceil(geometry.full_chunk_bytes());
    let member_bytes = stripes * geometry.chunk_bytes();

    if args.in_memory || file.members.is_empty() {
        info!(member_bytes, "Using in-memory member disks");
        return Ok(member_handles(&MemDisk::array(geometry.raid_disks(), member_bytes)));
    }

    file.members
        .iter()
        .enumerate()
        .map(|(index, member)| {
            let data_offset = member.data_offset_sectors * SECTOR_SIZE_U64;
            let disk = FileDisk::open(index, &member.path, data_offset, Some(data_offset + member_bytes))
                .with_context(|| format!("opening member {} at {}", index, member.path.display()))?;
            Ok(Arc::new(disk) as Arc<dyn MemberDisk>)
        })
        .collect()
}

// =============================================================================
// Workload
// =============================================================================

/// Scatter sub-stripe writes over the first `groups` chunk groups, then
/// compare a full read-back against a shadow copy.
async fn run_workload(volume: &RaidVolume, writes: usize, groups: u64) -> anyhow::Result<bool> {
    let geometry = volume.geometry();
    let region = (groups.max(1) * geometry.full_chunk_bytes()).min(volume.config().array_size);
    let region_sectors = region / SECTOR_SIZE_U64;
    if region_sectors == 0 {
        bail!("array is too small for the workload");
    }

    let mut shadow = vec![0u8; region as usize];
    volume
        .read(0, &mut shadow)
        .await
        .context("reading initial contents")?;

    for i in 0..writes as u64 {
        let sector = (i * 7919) % region_sectors;
        let sectors = (1 + i % 4).min(region_sectors - sector);
        let offset = sector * SECTOR_SIZE_U64;
        let len = (sectors * SECTOR_SIZE_U64) as usize;
        let data = vec![(i % 251) as u8 + 1; len];

        volume
            .write(offset, &data)
            .await
            .with_context(|| format!("writing {} bytes at {}", len, offset))?;
        shadow[offset as usize..offset as usize + len].copy_from_slice(&data);
    }

    let cached = volume.cache_gauges().await.entries;
    info!(writes, cached, "Workload written");

    let mut back = vec![0u8; region as usize];
    volume.read(0, &mut back).await.context("reading back")?;
    if back != shadow {
        warn!("Read-back differs before flush");
        return Ok(false);
    }

    volume.flush_all_now().await.context("flushing workload")?;
    back.fill(0);
    volume.read(0, &mut back).await.context("reading back after flush")?;
    if back != shadow {
        warn!("Read-back differs after flush");
        return Ok(false);
    }

    info!(bytes = region, "Read-back verified");
    Ok(true)
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, volume: Arc<RaidVolume>) -> anyhow::Result<()> {
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
        volume: Arc<RaidVolume>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let gauges = volume.cache_gauges().await;
                match render_prometheus(&volume.stats_snapshot(), gauges) {
                    Ok(text) => {
                        let mut response = respond(StatusCode::OK, text);
                        response.headers_mut().insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                        response
                    }
                    Err(e) => {
                        error!("Failed to render metrics: {}", e);
                        respond(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                    }
                }
            }
            "/healthz" => respond(StatusCode::OK, "ok"),
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept error")?;

        let io = TokioIo::new(stream);
        let volume = volume.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(req, volume.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

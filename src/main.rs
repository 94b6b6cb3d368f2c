use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::time::{sleep_until, Duration, Instant};

use scan_deskew_rs::{
    CompensationDirection, InertialSample, IngressBuffers, PipelineConfig, ProcessingPipeline, Scan, SessionLog,
    SessionReport, Stream, SubmitOutcome, SyntheticConfig, SyntheticSession,
};

/// Longest wait for the consumer to finish after both streams are replayed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "scan_deskew")]
#[command(about = "Replay a lidar-inertial session through the deskew pipeline", long_about = None)]
struct Args {
    /// Recorded session (.json or .json.gz)
    #[arg(long, conflicts_with = "synthetic")]
    session: Option<PathBuf>,

    /// Generate a synthetic rotating-platform session of this many seconds
    #[arg(long, value_name = "SECONDS")]
    synthetic: Option<f64>,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compensation direction (forward, backward)
    #[arg(long)]
    direction: Option<CompensationDirection>,

    /// Inertial samples used for the warm-up calibration
    #[arg(long)]
    calibration_threshold: Option<usize>,

    /// Include the sorted raw scan next to each undistorted one
    #[arg(long, default_value_t = false)]
    emit_raw: bool,

    /// Pace the replay by message timestamps
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Output directory
    #[arg(long, default_value = "deskew_sessions")]
    output_dir: PathBuf,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(direction) = args.direction {
        config.direction = direction;
    }
    if let Some(threshold) = args.calibration_threshold {
        config.calibration_threshold = threshold;
    }
    if args.emit_raw {
        config.emit_raw_scan = true;
    }
    config.validate()?;
    Ok(config)
}

fn load_session(args: &Args) -> Result<SessionLog> {
    match (&args.session, args.synthetic) {
        (Some(path), _) => Ok(SessionLog::load(path)?),
        (None, Some(seconds)) if seconds > 0.0 => {
            let session = SyntheticSession::generate(SyntheticConfig {
                duration: seconds,
                ..SyntheticConfig::default()
            });
            Ok(session.log)
        }
        (None, Some(seconds)) => bail!("--synthetic needs a positive duration, got {seconds}"),
        (None, None) => bail!("Provide --session or --synthetic"),
    }
}

/// Push one stream into the ingress in order, optionally paced by timestamps.
async fn replay<T, S>(items: Vec<T>, stamp: fn(&T) -> f64, origin: f64, realtime: bool, stream: Stream, submit: S) -> u64
where
    S: Fn(T) -> SubmitOutcome,
{
    let start = Instant::now();
    let mut loop_backs = 0;
    for item in items {
        if realtime {
            let offset = (stamp(&item) - origin).max(0.0);
            sleep_until(start + Duration::from_secs_f64(offset)).await;
        }
        if let Err(err) = submit(item).check(stream) {
            log::warn!("{err}");
            loop_backs += 1;
        }
    }
    log::debug!("{stream} replay finished");
    loop_backs
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let session = load_session(&args)?;
    log::info!(
        "Scan deskew starting: {} inertial samples, {} scans, direction {:?}, realtime {}",
        session.inertial.len(),
        session.scans.len(),
        config.direction,
        args.realtime
    );

    let mut pipeline = ProcessingPipeline::new(config.clone())?;

    // Collect events until the consumer drops its sender
    let events = pipeline.events().clone();
    let collector = tokio::task::spawn_blocking(move || {
        let mut report = SessionReport::new(config);
        for event in events.iter() {
            report.record(event);
        }
        report
    });

    let origin = session.time_span().map(|(lo, _)| lo).unwrap_or(0.0);
    let SessionLog { inertial, scans } = session;

    let ingress: Arc<IngressBuffers> = pipeline.ingress();
    let inertial_task = tokio::spawn(replay(
        inertial,
        |s: &InertialSample| s.timestamp,
        origin,
        args.realtime,
        Stream::Inertial,
        move |s| ingress.submit_inertial(s),
    ));
    let ingress = pipeline.ingress();
    let scan_task = tokio::spawn(replay(
        scans,
        |s: &Scan| s.timestamp,
        origin,
        args.realtime,
        Stream::Scan,
        move |s| ingress.submit_scan(s),
    ));

    let inertial_loop_backs = inertial_task.await?;
    let scan_loop_backs = scan_task.await?;

    let ingress = pipeline.ingress();
    let drained = tokio::task::spawn_blocking(move || ingress.wait_idle(DRAIN_TIMEOUT)).await?;
    if !drained {
        log::warn!("consumer still busy after {DRAIN_TIMEOUT:?}, shutting down anyway");
    }
    let consumer = pipeline.shutdown()?;

    let mut report = collector.await?;
    report.ingress = Some(pipeline.stats());
    report.consumer = Some(consumer);
    let path = report.write_to_dir(&args.output_dir)?;

    println!("\n=== Final Stats ===");
    println!("Groups processed: {}", consumer.groups);
    println!("Scans undistorted: {}", consumer.scans_undistorted);
    println!("Groups dropped: {}", consumer.groups_dropped);
    println!("Resets: {}", consumer.resets);
    println!("Loop-backs: inertial {inertial_loop_backs}, scan {scan_loop_backs}");
    if let Some(calibration) = &report.calibration {
        let bias = calibration.zero_bias_angular_velocity;
        println!("Gravity scale: {:.5}", calibration.gravity_scale);
        println!("Gyro bias: [{:.5}, {:.5}, {:.5}] rad/s", bias.x, bias.y, bias.z);
    } else {
        println!("Calibration: incomplete");
    }
    println!("Report: {}", path.display());

    Ok(())
}

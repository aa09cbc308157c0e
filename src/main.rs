use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use posture_engine::config::{FilterStrategy, RecordFormat, SensorMode};
use posture_engine::effectors::{drive_all, EffectorPlan, LoggingDriver};
use posture_engine::live_status::LiveStatus;
use posture_engine::sensors::{spawn_line_reader, ReaderStats, SensorReader, SimulatedSource};
use posture_engine::statistics::SessionReport;
use posture_engine::telemetry::TelemetryWriter;
use posture_engine::{EngineConfig, EnginePhase, PostureEngine};

const STATUS_INTERVAL_MS: u64 = 2_000;
const CHANNEL_CAPACITY: usize = 256;
const READER_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FilterKind {
    MovingAverage,
    LowPass,
}

#[derive(Parser, Debug)]
#[command(name = "posture_tracker")]
#[command(about = "Posture tracker - calibrate, classify and alert on sustained bad posture", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(long, value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial device or capture file per transport ("-" = stdin)
    #[arg(long = "input", value_name = "PATH")]
    inputs: Vec<String>,

    /// Use simulated sensors instead of --input
    #[arg(long, conflicts_with = "inputs")]
    simulate: bool,

    #[arg(long, value_enum)]
    mode: Option<SensorMode>,

    /// Record format on the serial link
    #[arg(long, value_enum)]
    format: Option<RecordFormat>,

    #[arg(long, value_enum)]
    filter: Option<FilterKind>,

    /// Moving-average window size
    #[arg(long)]
    window: Option<usize>,

    /// Low-pass blend coefficient in (0, 1]
    #[arg(long)]
    alpha: Option<f64>,

    #[arg(long)]
    alert_delay_secs: Option<u64>,

    /// Output directory
    #[arg(long, default_value = "posture_sessions")]
    output_dir: String,

    /// Mirror telemetry CSV to stdout
    #[arg(long)]
    stdout_telemetry: bool,
}

#[derive(Serialize)]
struct SessionOutput<'a> {
    started: String,
    config: &'a EngineConfig,
    report: SessionReport,
    reader: ReaderStats,
    telemetry_rows: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(run(args));
    // Readers parked on a silent transport never return; leave them behind.
    runtime.shutdown_timeout(READER_SHUTDOWN_GRACE);
    result
}

async fn run(args: Args) -> Result<()> {
    let config = build_config(&args)?;
    let session = ts_now_clean();

    log::info!("Posture Tracker starting");
    log::info!("  Mode: {:?} ({:?} records)", config.mode, config.sensor_format);
    log::info!("  Filter: {:?}", config.filter);
    log::info!("  Tick: {}ms, alert delay {}ms", config.sample_interval_ms, config.alert_delay_ms);
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir))?;

    let mut engine = PostureEngine::new(config.clone())?;
    let mut reader = build_reader(&args, &config)?;
    let plan = EffectorPlan::new(config.first_warning_tone, config.escalated_tone);
    let mut effectors = LoggingDriver::default();

    let telemetry_path = format!("{}/telemetry_{}.csv", args.output_dir, session);
    let telemetry_file = File::create(&telemetry_path).with_context(|| format!("creating {}", telemetry_path))?;
    let mut telemetry = TelemetryWriter::new(BufWriter::new(telemetry_file), config.sensor_count())?;
    let mut stdout_telemetry = if args.stdout_telemetry {
        Some(TelemetryWriter::new(std::io::stdout(), config.sensor_count())?)
    } else {
        None
    };

    let status_path = format!("{}/live_status.json", args.output_dir);
    let mut ticker = interval(Duration::from_millis(config.sample_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let start = Instant::now();
    let mut last_status_ms = 0u64;

    log::info!("[calib] hold still: calibrating sensor 0 ({} samples)", config.calibration_samples);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown requested, stopping...");
                break;
            }
            _ = ticker.tick() => {}
        }

        let now_ms = start.elapsed().as_millis() as u64;
        if args.duration > 0 && now_ms >= args.duration * 1000 {
            log::info!("Duration reached, stopping...");
            break;
        }

        engine.ingest_all(reader.poll(now_ms));
        let report = match engine.tick(now_ms) {
            Ok(report) => report,
            Err(e) if e.is_fatal_at_startup() => {
                drive_all(&mut effectors, EffectorPlan::fault());
                let status = LiveStatus::capture(&mut engine, reader.stats(), now_ms);
                if let Err(save_err) = status.save(&status_path) {
                    log::warn!("[status] could not write {}: {}", status_path, save_err);
                }
                return Err(anyhow::Error::new(e).context("startup calibration failed, not entering main loop"));
            }
            Err(e) => return Err(e.into()),
        };

        if report.phase == EnginePhase::Running && !report.calibrated.is_empty() {
            log::info!("Calibration complete, monitoring posture");
            drive_all(&mut effectors, EffectorPlan::calm());
        }

        if let Some(event) = report.alert {
            drive_all(&mut effectors, plan.commands_for(event));
        }

        if let (true, Some(estimate), Some(state)) = (report.classified, report.estimate.as_ref(), report.posture) {
            telemetry.write(estimate, state)?;
            if let Some(out) = stdout_telemetry.as_mut() {
                out.write(estimate, state)?;
            }
        }

        if now_ms.saturating_sub(last_status_ms) >= STATUS_INTERVAL_MS {
            let status = LiveStatus::capture(&mut engine, reader.stats(), now_ms);
            if let Err(e) = status.save(&status_path) {
                log::warn!("[status] could not write {}: {}", status_path, e);
            }
            log::debug!("{}", engine.health_status(now_ms));
            last_status_ms = now_ms;
        }
    }

    // Final save
    telemetry.flush()?;
    if let Some(out) = stdout_telemetry.as_mut() {
        out.flush()?;
    }

    let now_ms = start.elapsed().as_millis() as u64;
    let final_status = LiveStatus::capture(&mut engine, reader.stats(), now_ms);
    let final_status_path = format!("{}/live_status_final.json", args.output_dir);
    if let Err(e) = final_status.save(&final_status_path) {
        log::warn!("[status] could not write {}: {}", final_status_path, e);
    }

    let report = engine.statistics().report(config.mode);
    let output = SessionOutput {
        started: session.clone(),
        config: &config,
        report: report.clone(),
        reader: reader.stats(),
        telemetry_rows: telemetry.rows(),
    };
    let filename = format!("{}/session_{}.json", args.output_dir, session);
    let json = serde_json::to_string_pretty(&output)?;
    std::fs::write(&filename, json).with_context(|| format!("writing {}", filename))?;
    log::info!("Final save: {} telemetry rows to {}", telemetry.rows(), telemetry_path);

    // Print stats
    let mut stdout = std::io::stdout();
    writeln!(stdout, "\n=== Session Summary ===")?;
    writeln!(stdout, "{}", report.summary())?;
    for (state, pct) in &report.state_percentages {
        writeln!(stdout, "  {:<13} {:5.1}%", state.label(), pct)?;
    }
    writeln!(stdout, "Report: {}", filename)?;

    Ok(())
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(format) = args.format {
        config.sensor_format = format;
    }
    if let Some(secs) = args.alert_delay_secs {
        config.alert_delay_ms = secs * 1000;
    }

    let kind = args.filter.unwrap_or(match config.filter {
        FilterStrategy::MovingAverage { .. } => FilterKind::MovingAverage,
        FilterStrategy::LowPass { .. } => FilterKind::LowPass,
    });
    config.filter = match (kind, config.filter) {
        (FilterKind::MovingAverage, FilterStrategy::MovingAverage { window }) => FilterStrategy::MovingAverage {
            window: args.window.unwrap_or(window),
        },
        (FilterKind::MovingAverage, _) => FilterStrategy::MovingAverage {
            window: args.window.unwrap_or(10),
        },
        (FilterKind::LowPass, FilterStrategy::LowPass { alpha }) => FilterStrategy::LowPass {
            alpha: args.alpha.unwrap_or(alpha),
        },
        (FilterKind::LowPass, _) => FilterStrategy::LowPass {
            alpha: args.alpha.unwrap_or(0.2),
        },
    };

    config.validate()?;
    Ok(config)
}

fn build_reader(args: &Args, config: &EngineConfig) -> Result<SensorReader> {
    let transports = config.transport_sensors();
    let mut reader = SensorReader::new(config.sensor_count());

    if args.simulate {
        // keep the simulated rig still until every sensor has had its turn
        let still_ms = config.calibration_samples as u64 * config.sample_interval_ms * config.sensor_count() as u64 + 5_000;
        for (i, sensors) in transports.into_iter().enumerate() {
            let source = SimulatedSource::new(config.sensor_format, i == 0, config.sample_interval_ms, still_ms);
            reader.add_transport(Box::new(source), config.sensor_format, sensors);
        }
        log::info!("Using simulated sensors (tilt starts after {}s)", still_ms / 1000);
        return Ok(reader);
    }

    if args.inputs.len() != transports.len() {
        bail!(
            "{:?} mode with {:?} records needs {} --input path(s), got {}",
            config.mode,
            config.sensor_format,
            transports.len(),
            args.inputs.len()
        );
    }
    for (path, sensors) in args.inputs.iter().zip(transports) {
        let source = spawn_line_reader(path, CHANNEL_CAPACITY)?;
        log::info!("[reader] {} -> sensors {:?}", path, sensors);
        reader.add_transport(Box::new(source), config.sensor_format, sensors);
    }
    Ok(reader)
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

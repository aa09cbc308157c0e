use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use posture_engine::alert::AlertEvent;
use posture_engine::config::{RecordFormat, SensorMode};
use posture_engine::sensors::{for_each_line, ParseOutcome, ReaderStats, RecordParser};
use posture_engine::telemetry::TelemetryWriter;
use posture_engine::{EngineConfig, PostureEngine, Sample};
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a captured serial log (.gz accepted)
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of captures to batch replay (*.csv, *.txt, optionally .gz)
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// JSON engine config
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<SensorMode>,

    #[arg(long, value_enum)]
    format: Option<RecordFormat>,

    /// Write per-tick telemetry CSV here (single --log only)
    #[arg(long, conflicts_with = "golden_dir")]
    telemetry: Option<PathBuf>,
}

#[derive(Default)]
struct AlertCounts {
    first_warnings: u64,
    escalations: u64,
    cleared: u64,
}

fn open_log(path: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn is_capture(name: &str) -> bool {
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.ends_with(".csv") || name.ends_with(".txt")
}

fn run_once(path: &Path, config: &EngineConfig, telemetry_path: Option<&Path>) -> anyhow::Result<serde_json::Value> {
    let transports = config.transport_sensors();
    let [sensors] = transports.as_slice() else {
        anyhow::bail!(
            "replay reads one capture per run; {:?} mode with {:?} records needs {} transports",
            config.mode,
            config.sensor_format,
            transports.len()
        );
    };
    let parser = RecordParser::new(config.sensor_format, sensors.clone());
    let mut engine = PostureEngine::new(config.clone())?;

    let mut telemetry = match telemetry_path {
        Some(p) => {
            let file = File::create(p).with_context(|| format!("creating {}", p.display()))?;
            Some(TelemetryWriter::new(BufWriter::new(file), config.sensor_count())?)
        }
        None => None,
    };

    let mut records = ReaderStats::default();
    let mut alerts = AlertCounts::default();
    let mut calibration_error: Option<String> = None;
    let mut write_error: Option<std::io::Error> = None;
    let mut last_ts = 0u64;
    let mut index = 0u64;

    let lines = for_each_line(open_log(path)?, |line| {
        index += 1;
        // YPR records carry no device clock; assume the configured cadence
        let fallback_ts = index * config.sample_interval_ms;

        let samples: Vec<Sample> = match parser.parse(&line, fallback_ts) {
            ParseOutcome::Sample(s) => vec![s],
            ParseOutcome::Pair(a, b) => vec![a, b],
            ParseOutcome::Incomplete => {
                records.incomplete += 1;
                return true;
            }
            ParseOutcome::Malformed(_) => {
                records.malformed += 1;
                return true;
            }
        };
        records.accepted += 1;

        let ts = samples[0].device_timestamp_ms.unwrap_or(fallback_ts);
        last_ts = ts;
        engine.ingest_all(samples.into_iter().map(|mut s| {
            s.timestamp_ms = ts;
            s
        }));

        let report = match engine.tick(ts) {
            Ok(report) => report,
            Err(e) => {
                calibration_error = Some(e.to_string());
                return false;
            }
        };
        match report.alert {
            Some(AlertEvent::FirstWarning) => alerts.first_warnings += 1,
            Some(AlertEvent::Escalated { .. }) => alerts.escalations += 1,
            Some(AlertEvent::Cleared) => alerts.cleared += 1,
            None => {}
        }
        if let (Some(out), Some(estimate), Some(state)) = (telemetry.as_mut(), report.estimate.as_ref(), report.posture) {
            if report.classified {
                if let Err(e) = out.write(estimate, state) {
                    write_error = Some(e);
                    return false;
                }
            }
        }
        true
    })
    .with_context(|| format!("reading {}", path.display()))?;

    if let Some(e) = write_error {
        return Err(e).context("writing telemetry");
    }
    let telemetry_rows = match telemetry.as_mut() {
        Some(out) => {
            out.flush()?;
            out.rows()
        }
        None => 0,
    };

    let report = engine.statistics().report(config.mode);
    log::info!("[replay] {}: {}", path.display(), report.summary());

    Ok(json!({
        "log": path.display().to_string(),
        "lines": lines,
        "records": records,
        "last_timestamp_ms": last_ts,
        "calibration": calibration_error.unwrap_or_else(|| format!("{:?}", engine.phase())),
        "alerts": {
            "first_warnings": alerts.first_warnings,
            "escalations": alerts.escalations,
            "cleared": alerts.cleared
        },
        "telemetry_rows": telemetry_rows,
        "report": report
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(format) = args.format {
        config.sensor_format = format;
    }
    config.validate()?;

    let mut results = Vec::new();

    if let Some(dir) = args.golden_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !is_capture(name) {
                continue;
            }
            match run_once(&path, &config, None) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {:#}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config, args.telemetry.as_deref())?);
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

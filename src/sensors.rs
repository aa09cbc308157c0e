//! Sensor Reader: turns serial text records into `Sample`s.
//!
//! Each tick drains whatever complete lines the transports have delivered and
//! keeps the newest valid sample per sensor. Partial or malformed records are
//! counted and dropped; no error reaches the caller, the missing sample is
//! the signal.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::config::RecordFormat;
use crate::error::{PostureError, Result};
use crate::types::{Orientation, Sample, SensorId};

const YPR_TAG: &str = "*YPR=";
const RAW_FIELDS_PER_SENSOR: usize = 7;

/// Status lines the firmware prints around its data records.
const BANNER_PREFIXES: [&str; 6] = ["Smart", "=", "MPU", "CSV", "Sensor", "Calibrating"];

// ─── Parsing ─────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordFault {
    #[error("firmware banner line")]
    Banner,

    #[error("missing {0} tag")]
    MissingTag(&'static str),

    #[error("expected {expected} separators, found {found}")]
    SeparatorCount { expected: usize, found: usize },

    #[error("field {index} is not a finite number: {text:?}")]
    BadNumber { index: usize, text: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParseOutcome {
    Sample(Sample),
    /// One record carrying both sensors of a dual rig.
    Pair(Sample, Sample),
    /// Cut off before its line terminator, or empty.
    Incomplete,
    Malformed(RecordFault),
}

#[derive(Clone, Debug)]
pub struct RecordParser {
    format: RecordFormat,
    sensors: Vec<SensorId>,
}

impl RecordParser {
    /// `sensors` are the ids this transport feeds, in record order.
    pub fn new(format: RecordFormat, sensors: Vec<SensorId>) -> Self {
        Self { format, sensors }
    }

    /// Parse one raw line (terminator included) received at `received_at_ms`.
    pub fn parse(&self, line: &str, received_at_ms: u64) -> ParseOutcome {
        let Some(body) = line.strip_suffix('\n') else {
            return ParseOutcome::Incomplete;
        };
        let body = body.strip_suffix('\r').unwrap_or(body).trim();
        if body.is_empty() {
            return ParseOutcome::Incomplete;
        }

        let sensor = |i: usize| self.sensors.get(i).copied().unwrap_or(i);

        match self.format {
            RecordFormat::Ypr => match parse_ypr(body) {
                Ok(o) => ParseOutcome::Sample(Sample::from_orientation(sensor(0), received_at_ms, o)),
                Err(fault) => ParseOutcome::Malformed(fault),
            },
            RecordFormat::RawImu => match parse_raw(body, 1) {
                Ok((device_ts, mut blocks)) => {
                    let block = blocks.remove(0);
                    ParseOutcome::Sample(block.into_sample(sensor(0), received_at_ms, device_ts))
                }
                Err(fault) => ParseOutcome::Malformed(fault),
            },
            RecordFormat::DualRawImu => match parse_raw(body, 2) {
                Ok((device_ts, mut blocks)) => {
                    let second = blocks.remove(1);
                    let first = blocks.remove(0);
                    ParseOutcome::Pair(
                        first.into_sample(sensor(0), received_at_ms, device_ts),
                        second.into_sample(sensor(1), received_at_ms, device_ts),
                    )
                }
                Err(fault) => ParseOutcome::Malformed(fault),
            },
        }
    }
}

struct RawBlock {
    accel: Vector3<f64>,
    gyro: Vector3<f64>,
    temperature: f64,
}

impl RawBlock {
    fn into_sample(self, sensor: SensorId, received_at_ms: u64, device_ts: u64) -> Sample {
        let mut sample = Sample::from_imu(sensor, received_at_ms, self.accel, self.gyro);
        sample.device_timestamp_ms = Some(device_ts);
        sample.temperature = Some(self.temperature);
        sample
    }
}

fn split_exact(body: &str, fields: usize) -> std::result::Result<Vec<&str>, RecordFault> {
    let found = body.matches(',').count();
    if found != fields - 1 {
        return Err(RecordFault::SeparatorCount { expected: fields - 1, found });
    }
    Ok(body.split(',').map(str::trim).collect())
}

fn parse_number(index: usize, text: &str) -> std::result::Result<f64, RecordFault> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RecordFault::BadNumber { index, text: text.to_string() })
}

fn parse_ypr(body: &str) -> std::result::Result<Orientation, RecordFault> {
    let values = body.strip_prefix(YPR_TAG).ok_or(RecordFault::MissingTag(YPR_TAG))?;
    let fields = split_exact(values, 3)?;
    Ok(Orientation {
        yaw: parse_number(0, fields[0])?,
        pitch: parse_number(1, fields[1])?,
        roll: parse_number(2, fields[2])?,
    })
}

fn parse_raw(body: &str, sensors: usize) -> std::result::Result<(u64, Vec<RawBlock>), RecordFault> {
    if BANNER_PREFIXES.iter().any(|p| body.starts_with(p)) {
        return Err(RecordFault::Banner);
    }
    let fields = split_exact(body, 1 + RAW_FIELDS_PER_SENSOR * sensors)?;
    let values = fields
        .iter()
        .enumerate()
        .map(|(i, f)| parse_number(i, f))
        .collect::<std::result::Result<Vec<f64>, _>>()?;

    if values[0] < 0.0 {
        return Err(RecordFault::BadNumber { index: 0, text: fields[0].to_string() });
    }
    let device_ts = values[0] as u64;

    let blocks = values[1..]
        .chunks(RAW_FIELDS_PER_SENSOR)
        .map(|v| RawBlock {
            accel: Vector3::new(v[0], v[1], v[2]),
            gyro: Vector3::new(v[3], v[4], v[5]),
            temperature: v[6],
        })
        .collect();
    Ok((device_ts, blocks))
}

// ─── Line sources ────────────────────────────────────────────────────────────

/// Non-blocking supplier of raw lines (terminators included).
pub trait LineSource: Send {
    /// Next buffered line, or `None` when nothing is ready right now.
    fn poll_line(&mut self, now_ms: u64) -> Option<String>;
}

/// In-memory queue of lines.
#[derive(Debug, Default)]
pub struct BufferedSource {
    lines: VecDeque<String>,
}

impl BufferedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
    }
}

impl LineSource for BufferedSource {
    fn poll_line(&mut self, _now_ms: u64) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Lines forwarded from a blocking reader task.
pub struct ChannelSource {
    name: String,
    rx: mpsc::Receiver<String>,
    closed: bool,
}

impl LineSource for ChannelSource {
    fn poll_line(&mut self, _now_ms: u64) -> Option<String> {
        match self.rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.closed {
                    log::warn!("[reader] {} closed, no further samples", self.name);
                    self.closed = true;
                }
                None
            }
        }
    }
}

/// Read `reader` line by line, terminators kept, invalid UTF-8 replaced.
/// Stops early when `f` returns false. Returns the number of lines read.
pub fn for_each_line<R: BufRead>(mut reader: R, mut f: impl FnMut(String) -> bool) -> std::io::Result<u64> {
    let mut count = 0u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(count);
        }
        count += 1;
        if !f(String::from_utf8_lossy(&buf).into_owned()) {
            return Ok(count);
        }
    }
}

/// Open `path` (`-` for stdin) and forward its lines over a bounded channel
/// from a blocking task. Must be called inside a tokio runtime.
///
/// Serial devices are expected to be configured (baud, raw mode) beforehand,
/// e.g. with `stty`.
pub fn spawn_line_reader(path: &str, capacity: usize) -> Result<ChannelSource> {
    let reader: Box<dyn BufRead + Send> = if path == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = File::open(path).map_err(|e| PostureError::Transport(format!("{}: {}", path, e)))?;
        Box::new(BufReader::new(file))
    };
    Ok(forward_lines(path.to_string(), reader, capacity))
}

/// Run `reader` on the blocking pool, one channel message per line.
///
/// The task may stay parked in a read on a silent transport. Owners of the
/// runtime should shut it down with a timeout rather than wait for it.
pub fn forward_lines(name: String, reader: Box<dyn BufRead + Send>, capacity: usize) -> ChannelSource {
    let (tx, rx) = mpsc::channel(capacity);
    let task_name = name.clone();
    tokio::task::spawn_blocking(move || {
        match for_each_line(reader, |line| tx.blocking_send(line).is_ok()) {
            Ok(lines) => log::info!("[reader] {} ended after {} lines", task_name, lines),
            Err(e) => log::error!("[reader] {} read failed: {}", task_name, e),
        }
    });
    ChannelSource { name, rx, closed: false }
}

/// Deterministic stand-in for hardware: holds still, then slowly tilts
/// forward and back. Only a `tilting` source moves; the other stays upright.
pub struct SimulatedSource {
    format: RecordFormat,
    tilting: bool,
    interval_ms: u64,
    still_ms: u64,
    next_at_ms: u64,
}

impl SimulatedSource {
    const GRAVITY: f64 = 9.81;
    const PERIOD_MS: f64 = 60_000.0;

    pub fn new(format: RecordFormat, tilting: bool, interval_ms: u64, still_ms: u64) -> Self {
        Self { format, tilting, interval_ms: interval_ms.max(1), still_ms, next_at_ms: 0 }
    }

    fn tilt_at(&self, tilting: bool, now_ms: u64) -> (f64, f64) {
        if !tilting || now_ms < self.still_ms {
            return (0.0, 0.0);
        }
        let phase = 2.0 * std::f64::consts::PI * (now_ms - self.still_ms) as f64 / Self::PERIOD_MS;
        let pitch = 20.0 * (1.0 - phase.cos());
        let roll = 5.0 * phase.sin();
        (pitch, roll)
    }

    fn raw_fields(&self, tilting: bool, now_ms: u64) -> String {
        let (pitch, roll) = self.tilt_at(tilting, now_ms);
        let (p, r) = (pitch.to_radians(), roll.to_radians());
        let noise = 0.02 * (now_ms as f64 * 0.0017).sin();
        let ax = -Self::GRAVITY * p.sin() + noise;
        let ay = Self::GRAVITY * p.cos() * r.sin() - noise;
        let az = Self::GRAVITY * p.cos() * r.cos() + noise;
        format!("{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.1}", ax, ay, az, noise, -noise, 0.0, 24.5)
    }

    fn render(&self, now_ms: u64) -> String {
        match self.format {
            RecordFormat::RawImu => format!("{},{}\n", now_ms, self.raw_fields(self.tilting, now_ms)),
            RecordFormat::DualRawImu => format!(
                "{},{},{}\n",
                now_ms,
                self.raw_fields(self.tilting, now_ms),
                self.raw_fields(false, now_ms)
            ),
            RecordFormat::Ypr => {
                let (pitch, roll) = self.tilt_at(self.tilting, now_ms);
                format!("{}{:.2},{:.2},{:.2}\n", YPR_TAG, 0.0, pitch, roll)
            }
        }
    }
}

impl LineSource for SimulatedSource {
    fn poll_line(&mut self, now_ms: u64) -> Option<String> {
        if now_ms < self.next_at_ms {
            return None;
        }
        self.next_at_ms = now_ms + self.interval_ms;
        Some(self.render(now_ms))
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderStats {
    pub accepted: u64,
    pub incomplete: u64,
    pub malformed: u64,
}

impl ReaderStats {
    fn merge(&mut self, other: &ReaderStats) {
        self.accepted += other.accepted;
        self.incomplete += other.incomplete;
        self.malformed += other.malformed;
    }
}

struct Transport {
    source: Box<dyn LineSource>,
    parser: RecordParser,
    stats: ReaderStats,
}

pub struct SensorReader {
    transports: Vec<Transport>,
    sensor_count: usize,
}

impl SensorReader {
    pub fn new(sensor_count: usize) -> Self {
        Self { transports: Vec::new(), sensor_count }
    }

    /// Attach a transport feeding `sensors` with records of `format`.
    pub fn add_transport(&mut self, source: Box<dyn LineSource>, format: RecordFormat, sensors: Vec<SensorId>) {
        self.transports.push(Transport {
            source,
            parser: RecordParser::new(format, sensors),
            stats: ReaderStats::default(),
        });
    }

    /// Drain every transport; zero or one sample per sensor, newest wins.
    pub fn poll(&mut self, now_ms: u64) -> Vec<Sample> {
        let mut latest: Vec<Option<Sample>> = vec![None; self.sensor_count];

        for transport in &mut self.transports {
            while let Some(line) = transport.source.poll_line(now_ms) {
                match transport.parser.parse(&line, now_ms) {
                    ParseOutcome::Sample(sample) => {
                        transport.stats.accepted += 1;
                        store(&mut latest, sample);
                    }
                    ParseOutcome::Pair(first, second) => {
                        transport.stats.accepted += 1;
                        store(&mut latest, first);
                        store(&mut latest, second);
                    }
                    ParseOutcome::Incomplete => {
                        transport.stats.incomplete += 1;
                        log::trace!("[reader] incomplete record dropped: {:?}", line);
                    }
                    ParseOutcome::Malformed(fault) => {
                        transport.stats.malformed += 1;
                        log::trace!("[reader] malformed record dropped ({}): {:?}", fault, line.trim_end());
                    }
                }
            }
        }

        latest.into_iter().flatten().collect()
    }

    pub fn stats(&self) -> ReaderStats {
        let mut total = ReaderStats::default();
        for t in &self.transports {
            total.merge(&t.stats);
        }
        total
    }
}

fn store(latest: &mut [Option<Sample>], sample: Sample) {
    match latest.get_mut(sample.sensor) {
        Some(slot) => *slot = Some(sample),
        None => log::debug!("[reader] sample for unknown sensor {} ignored", sample.sensor),
    }
}

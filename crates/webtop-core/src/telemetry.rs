//! Telemetry Sampler
//!
//! Periodically runs a batch of read-only commands on the shared session,
//! parses them into a [`TelemetrySample`] and derives network throughput
//! from the previous sample of the same client session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::executor::execute_batch;
use crate::format::{format_bytes, format_rate, format_uptime};
use crate::session::RemoteSession;

/// Default sampling interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

const NOT_AVAILABLE: &str = "N/A";

/// The fixed read-only command batch, in [`RawTelemetry`] field order
pub const TELEMETRY_COMMANDS: [&str; 8] = [
    "hostname -I",
    "lscpu",
    "nproc",
    "cat /proc/uptime",
    "cat /proc/meminfo",
    "cat /etc/os-release",
    "ip route get 1.1.1.1",
    "cat /proc/net/dev",
];

/// Raw command outputs of one batch; empty strings for failed commands
#[derive(Debug, Clone, Default)]
pub struct RawTelemetry {
    /// `hostname -I`
    pub hostname_ips: String,
    /// `lscpu`
    pub lscpu: String,
    /// `nproc`
    pub nproc: String,
    /// `/proc/uptime`
    pub uptime: String,
    /// `/proc/meminfo`
    pub meminfo: String,
    /// `/etc/os-release`
    pub os_release: String,
    /// `ip route get`
    pub route: String,
    /// `/proc/net/dev`
    pub net_dev: String,
}

impl RawTelemetry {
    fn from_outputs(outputs: Vec<String>) -> Self {
        let mut it = outputs.into_iter();
        let mut next = || it.next().unwrap_or_default();
        Self {
            hostname_ips: next(),
            lscpu: next(),
            nproc: next(),
            uptime: next(),
            meminfo: next(),
            os_release: next(),
            route: next(),
            net_dev: next(),
        }
    }
}

/// Point-in-time host measurement
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// Primary IP address
    pub ip: Option<String>,
    /// Distribution pretty name
    pub os_name: Option<String>,
    /// CPU model name
    pub cpu_model: Option<String>,
    /// Online CPU count
    pub cpu_cores: Option<u32>,
    /// Seconds since boot
    pub uptime_secs: Option<f64>,
    /// Total memory in bytes
    pub total_mem: u64,
    /// Available memory in bytes
    pub available_mem: u64,
    /// Received bytes on the default-route interface
    pub rx_bytes: u64,
    /// Transmitted bytes on the default-route interface
    pub tx_bytes: u64,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl TelemetrySample {
    /// Parse a batch of raw outputs captured at `captured_at`
    #[must_use]
    pub fn parse(raw: &RawTelemetry, captured_at: DateTime<Utc>) -> Self {
        let (total_mem, available_mem) = parse_meminfo(&raw.meminfo);
        let (rx_bytes, tx_bytes) = parse_route_interface(&raw.route)
            .and_then(|iface| parse_net_dev(&raw.net_dev, &iface))
            .unwrap_or((0, 0));

        Self {
            ip: raw
                .hostname_ips
                .split_whitespace()
                .next()
                .map(str::to_string),
            os_name: parse_os_name(&raw.os_release),
            cpu_model: parse_cpu_model(&raw.lscpu),
            cpu_cores: raw.nproc.trim().parse().ok(),
            uptime_secs: raw
                .uptime
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok()),
            total_mem,
            available_mem,
            rx_bytes,
            tx_bytes,
            captured_at,
        }
    }
}

/// Stats notification body sent to the browser, pre-formatted for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPayload {
    /// Primary IP
    pub ip: String,
    /// OS name
    pub os_name: String,
    /// CPU model
    pub cpu_model: String,
    /// CPU cores
    pub cpu_cores: String,
    /// Uptime
    pub uptime: String,
    /// Total memory
    pub total_mem: String,
    /// Available memory
    pub free_mem: String,
    /// Receive throughput
    pub rx_speed: String,
    /// Transmit throughput
    pub tx_speed: String,
}

impl StatsPayload {
    fn from_sample(sample: &TelemetrySample, rx_rate: f64, tx_rate: f64) -> Self {
        let or_na = |v: &Option<String>| v.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string());
        Self {
            ip: or_na(&sample.ip),
            os_name: or_na(&sample.os_name),
            cpu_model: or_na(&sample.cpu_model),
            cpu_cores: sample
                .cpu_cores
                .map_or_else(|| NOT_AVAILABLE.to_string(), |c| c.to_string()),
            uptime: sample
                .uptime_secs
                .map_or_else(|| NOT_AVAILABLE.to_string(), format_uptime),
            total_mem: format_bytes(sample.total_mem as f64),
            free_mem: format_bytes(sample.available_mem as f64),
            rx_speed: format_rate(rx_rate),
            tx_speed: format_rate(tx_rate),
        }
    }
}

/// Bytes per second between two samples as `(rx, tx)`.
///
/// Zero when the interval is not positive or a counter went backwards.
#[must_use]
pub fn throughput(previous: &TelemetrySample, current: &TelemetrySample) -> (f64, f64) {
    let elapsed_ms = (current.captured_at - previous.captured_at).num_milliseconds();
    if elapsed_ms <= 0 {
        return (0.0, 0.0);
    }
    let secs = elapsed_ms as f64 / 1000.0;
    let rx = current.rx_bytes.saturating_sub(previous.rx_bytes) as f64 / secs;
    let tx = current.tx_bytes.saturating_sub(previous.tx_bytes) as f64 / secs;
    (rx, tx)
}

/// `MemTotal` and `MemAvailable` in bytes; missing lines read as zero
#[must_use]
pub fn parse_meminfo(meminfo: &str) -> (u64, u64) {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map_or(0, |kb| kb * 1024)
    };
    (field("MemTotal:"), field("MemAvailable:"))
}

/// `PRETTY_NAME` from os-release, quotes stripped
#[must_use]
pub fn parse_os_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.replace('"', ""))
        .filter(|value| !value.is_empty())
}

/// `Model name` from lscpu
#[must_use]
pub fn parse_cpu_model(lscpu: &str) -> Option<String> {
    lscpu
        .lines()
        .find_map(|line| line.trim().strip_prefix("Model name:"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Interface name after `dev` in `ip route get` output
#[must_use]
pub fn parse_route_interface(route: &str) -> Option<String> {
    let mut words = route.split_whitespace();
    while let Some(word) = words.next() {
        if word == "dev" {
            return words.next().map(str::to_string);
        }
    }
    None
}

/// Receive/transmit byte counters of `iface` from `/proc/net/dev`.
///
/// Receive bytes are the first counter after the `iface:` label, transmit
/// bytes the ninth.
#[must_use]
pub fn parse_net_dev(net_dev: &str, iface: &str) -> Option<(u64, u64)> {
    let label = format!("{}:", iface);
    let line = net_dev
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(&label))?;
    let counters: Vec<&str> = line[label.len()..].split_whitespace().collect();
    let rx = counters.first()?.parse().ok()?;
    let tx = counters.get(8)?.parse().ok()?;
    Some((rx, tx))
}

/// Per-client sampler holding the previous sample for rate computation
#[derive(Debug, Default)]
pub struct TelemetrySampler {
    previous: Option<TelemetrySample>,
}

impl TelemetrySampler {
    /// Sampler without history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last successful sample
    #[must_use]
    pub fn previous(&self) -> Option<&TelemetrySample> {
        self.previous.as_ref()
    }

    /// Forget the previous sample
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Run one batch and produce the display payload.
    ///
    /// Fails only when the session itself is gone; the previous sample is
    /// discarded in that case.
    pub async fn tick(&mut self, session: &dyn RemoteSession) -> Result<StatsPayload> {
        if session.is_closed() {
            self.reset();
            return Err(Error::SessionUnavailable);
        }
        let outputs = execute_batch(session, &TELEMETRY_COMMANDS).await;
        let raw = RawTelemetry::from_outputs(outputs);
        Ok(self.observe(TelemetrySample::parse(&raw, Utc::now())))
    }

    /// Record a sample and compute rates against the previous one
    pub fn observe(&mut self, sample: TelemetrySample) -> StatsPayload {
        let (rx, tx) = self
            .previous
            .as_ref()
            .map_or((0.0, 0.0), |prev| throughput(prev, &sample));
        let payload = StatsPayload::from_sample(&sample, rx, tx);
        self.previous = Some(sample);
        payload
    }
}

/// Spawn the periodic sampler for one client session.
///
/// Ticks every `interval` (first tick after one interval) until `cancel`
/// fires or the receiver is dropped. Failed ticks are logged and skipped.
pub fn spawn_sampler(
    session: Arc<dyn RemoteSession>,
    interval: Duration,
    tx: mpsc::Sender<StatsPayload>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = TelemetrySampler::new();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = sampler.tick(session.as_ref()) => result,
            };
            match result {
                Ok(payload) => {
                    if tx.send(payload).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Telemetry tick failed, sample reset"),
            }
        }
        debug!("Telemetry sampler stopped");
    })
}

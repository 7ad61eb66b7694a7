//! Exporter collector: scrapes a Prometheus-style text endpoint
//! (node_exporter, windows_exporter) instead of touching the OS.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use edgemon_common::types::{DiskMetrics, SystemMetrics};
use edgemon_common::{now_rfc3339, round2};
use futures::StreamExt;
use prometheus_parse::{Sample, Scrape, Value};
use tracing::{debug, warn};

use crate::rates::{CpuTotals, DiskCounters, RateState};
use crate::validate::validate;
use crate::{CollectError, Collector};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Metric family names differ per exporter flavor; the logical fields
/// are the same.
#[derive(Debug, Clone)]
pub(crate) struct MetricNames {
    pub cpu_time: &'static str,
    pub cpu_idle_label: &'static str,
    pub memory_free: &'static str,
    pub memory_free_fallback: Option<&'static str>,
    pub disk_free: &'static str,
    pub disk_size: &'static str,
    pub disk_read: &'static str,
    pub disk_write: &'static str,
    pub volume_label: &'static str,
}

pub(crate) fn windows_metric_names() -> MetricNames {
    MetricNames {
        cpu_time: "windows_cpu_time_total",
        cpu_idle_label: "idle",
        memory_free: "windows_memory_available_bytes",
        memory_free_fallback: Some("windows_memory_physical_free_bytes"),
        disk_free: "windows_logical_disk_free_bytes",
        disk_size: "windows_logical_disk_size_bytes",
        disk_read: "windows_logical_disk_read_bytes_total",
        disk_write: "windows_logical_disk_write_bytes_total",
        volume_label: "volume",
    }
}

pub(crate) fn node_metric_names() -> MetricNames {
    MetricNames {
        cpu_time: "node_cpu_seconds_total",
        cpu_idle_label: "idle",
        memory_free: "node_memory_MemAvailable_bytes",
        memory_free_fallback: Some("node_memory_MemFree_bytes"),
        disk_free: "node_filesystem_avail_bytes",
        disk_size: "node_filesystem_size_bytes",
        disk_read: "node_disk_read_bytes_total",
        disk_write: "node_disk_written_bytes_total",
        volume_label: "mountpoint",
    }
}

fn platform_metric_names() -> MetricNames {
    if cfg!(windows) {
        windows_metric_names()
    } else {
        node_metric_names()
    }
}

pub struct ExporterCollector {
    url: String,
    client: reqwest::Client,
    state: Mutex<RateState>,
}

impl ExporterCollector {
    pub fn new(url: impl Into<String>) -> Result<Self, CollectError> {
        let client = reqwest::Client::builder()
            .timeout(SCRAPE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .user_agent(concat!("edgemon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            state: Mutex::new(RateState::new()),
        })
    }

    async fn fetch(&self) -> Result<String, CollectError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectError::HttpStatus(status.as_u16()));
        }

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let remaining = MAX_BODY_BYTES - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                warn!(limit = MAX_BODY_BYTES, "exporter response truncated at size limit");
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Decode a scrape body and fold it through the rate state.
    fn assemble_with(
        &self,
        names: &MetricNames,
        text: &str,
    ) -> Result<SystemMetrics, CollectError> {
        let now = Instant::now();
        let lines = text.lines().map(|l| Ok::<_, std::io::Error>(l.to_string()));
        let scrape = Scrape::parse(lines).map_err(|e| CollectError::Parse(e.to_string()))?;

        let mut metrics = SystemMetrics {
            timestamp: now_rfc3339(),
            ..Default::default()
        };

        // CPU: sum every mode across all cores, and idle alone.
        let mut cpu_totals: Option<CpuTotals> = None;
        for sample in scrape.samples.iter().filter(|s| s.metric == names.cpu_time) {
            let Some(value) = scalar(sample) else { continue };
            let totals = cpu_totals.get_or_insert_with(CpuTotals::default);
            totals.total += value;
            if sample.labels.get("mode") == Some(names.cpu_idle_label) {
                totals.idle += value;
            }
        }

        metrics.memory_free_gb = match extract_memory(&scrape, names) {
            Some(bytes) => round2(bytes / GIB),
            None => {
                warn!(metric = names.memory_free, "memory metric not found in scrape");
                0.0
            }
        };

        // Disk families keyed by volume label, sorted for stable output.
        #[derive(Default)]
        struct VolumeSample {
            free_bytes: Option<f64>,
            total_bytes: Option<f64>,
            read_bytes: Option<f64>,
            write_bytes: Option<f64>,
        }
        let mut volumes: BTreeMap<String, VolumeSample> = BTreeMap::new();
        for sample in &scrape.samples {
            let slot: fn(&mut VolumeSample) -> &mut Option<f64> = if sample.metric == names.disk_free {
                |v: &mut VolumeSample| &mut v.free_bytes
            } else if sample.metric == names.disk_size {
                |v: &mut VolumeSample| &mut v.total_bytes
            } else if sample.metric == names.disk_read {
                |v: &mut VolumeSample| &mut v.read_bytes
            } else if sample.metric == names.disk_write {
                |v: &mut VolumeSample| &mut v.write_bytes
            } else {
                continue;
            };
            let Some(volume) = sample.labels.get(names.volume_label) else {
                continue;
            };
            if volume.is_empty() {
                continue;
            }
            let Some(value) = scalar(sample) else { continue };
            *slot(volumes.entry(volume.to_string()).or_default()) = Some(value);
        }

        let first_sample;
        {
            let mut state = self.state.lock().expect("collector cache lock poisoned");
            if state.reset_if_stale(now) {
                warn!("metrics cache went stale, rates reset to baseline");
            }
            first_sample = state.is_first_sample();
            let elapsed = state.elapsed_secs(now);

            match cpu_totals {
                Some(totals) => metrics.cpu_usage_percent = state.cpu_percent(totals),
                None if !first_sample => {
                    warn!(metric = names.cpu_time, "cpu metric not found in scrape")
                }
                None => {}
            }

            for (volume, sample) in volumes {
                let mut dm = DiskMetrics {
                    drive: volume.clone(),
                    ..Default::default()
                };
                if let Some(free) = sample.free_bytes {
                    dm.free_gb = round2(free / GIB);
                }
                if let Some(total) = sample.total_bytes {
                    dm.total_gb = round2(total / GIB);
                    if total > 0.0 {
                        dm.free_percent =
                            round2(sample.free_bytes.unwrap_or(0.0) / total * 100.0);
                    }
                }
                if sample.read_bytes.is_some() || sample.write_bytes.is_some() {
                    let counters = DiskCounters {
                        read_bytes: sample.read_bytes.unwrap_or(0.0),
                        write_bytes: sample.write_bytes.unwrap_or(0.0),
                    };
                    let (read, write) = state.disk_rates(&volume, counters, elapsed);
                    dm.read_bytes_per_sec = read;
                    dm.write_bytes_per_sec = write;
                }
                // Keep volumes that carry capacity or observed activity.
                if dm.total_gb > 0.0
                    || dm.read_bytes_per_sec != 0.0
                    || dm.write_bytes_per_sec != 0.0
                {
                    metrics.disks.push(dm);
                }
            }

            state.commit(now);
        }

        if metrics.disks.is_empty() {
            warn!(
                free_metric = names.disk_free,
                size_metric = names.disk_size,
                "no disk metrics found in scrape"
            );
        }

        validate(&metrics, first_sample)?;
        Ok(metrics)
    }
}

#[async_trait]
impl Collector for ExporterCollector {
    async fn collect(&self) -> Result<SystemMetrics, CollectError> {
        let text = self.fetch().await?;
        let metrics = self.assemble_with(&platform_metric_names(), &text)?;
        debug!(
            url = %self.url,
            cpu = metrics.cpu_usage_percent,
            memory_free_gb = metrics.memory_free_gb,
            disks = metrics.disks.len(),
            "collected exporter metrics"
        );
        Ok(metrics)
    }

    fn name(&self) -> String {
        format!("exporter ({})", self.url)
    }

    fn reset_cache(&self) {
        self.state
            .lock()
            .expect("collector cache lock poisoned")
            .reset();
    }
}

fn scalar(sample: &Sample) -> Option<f64> {
    match sample.value {
        Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Some(v),
        _ => None,
    }
}

fn extract_memory(scrape: &Scrape, names: &MetricNames) -> Option<f64> {
    let find = |metric: &str| {
        scrape
            .samples
            .iter()
            .find(|s| s.metric == metric)
            .and_then(scalar)
    };
    find(names.memory_free).or_else(|| {
        let fallback = names.memory_free_fallback?;
        let value = find(fallback)?;
        debug!(metric = fallback, "using fallback memory metric");
        Some(value)
    })
}

//! Acquisition metrics in Prometheus text format

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

/// Application metrics collector
#[derive(Default)]
pub struct Metrics {
    /// Completed poll cycles
    pub poll_cycles_total: AtomicU64,
    /// Readings written to the database
    pub readings_recorded_total: AtomicU64,
    /// Failed calls to the IO-Link master
    pub master_errors_total: AtomicU64,
    /// Sensors attached or detached
    pub connection_changes_total: AtomicU64,
    /// Connected sensors without an IODD in the collection
    pub iodd_missing_total: AtomicU64,
    /// IODD archives fetched into the collection
    pub iodd_fetched_total: AtomicU64,
    /// Values written by the OPC-UA bridge
    pub bridge_writes_total: AtomicU64,
    /// Failed bridge transfers
    pub bridge_errors_total: AtomicU64,
    /// HTTP requests served by the console
    pub http_requests_total: AtomicU64,
    /// Ports with a sensor attached
    pub connected_ports: AtomicU64,
    start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn inc_poll_cycles(&self) {
        self.poll_cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_readings_recorded(&self, count: u64) {
        self.readings_recorded_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_master_errors(&self) {
        self.master_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connection_changes(&self) {
        self.connection_changes_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_iodd_missing(&self) {
        self.iodd_missing_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_iodd_fetched(&self, count: u64) {
        self.iodd_fetched_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_bridge_writes(&self) {
        self.bridge_writes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bridge_errors(&self) {
        self.bridge_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_requests(&self) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected_ports(&self, count: u64) {
        self.connected_ports.store(count, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Format metrics in Prometheus text format
    pub fn to_prometheus_format(&self, is_healthy: bool) -> String {
        let mut output = String::with_capacity(2048);

        let counters = [
            (
                "iotbox_poll_cycles_total",
                "Total number of completed poll cycles",
                &self.poll_cycles_total,
            ),
            (
                "iotbox_readings_recorded_total",
                "Total number of readings written to the database",
                &self.readings_recorded_total,
            ),
            (
                "iotbox_master_errors_total",
                "Total number of failed IO-Link master calls",
                &self.master_errors_total,
            ),
            (
                "iotbox_connection_changes_total",
                "Total number of sensors attached or detached",
                &self.connection_changes_total,
            ),
            (
                "iotbox_iodd_missing_total",
                "Total number of connected sensors without a matching IODD",
                &self.iodd_missing_total,
            ),
            (
                "iotbox_iodd_fetched_total",
                "Total number of IODD files added by the fetcher",
                &self.iodd_fetched_total,
            ),
            (
                "iotbox_bridge_writes_total",
                "Total number of values written by the OPC-UA bridge",
                &self.bridge_writes_total,
            ),
            (
                "iotbox_bridge_errors_total",
                "Total number of failed OPC-UA bridge transfers",
                &self.bridge_errors_total,
            ),
            (
                "iotbox_http_requests_total",
                "Total number of HTTP requests received",
                &self.http_requests_total,
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value.load(Ordering::Relaxed)));
        }

        output.push_str("# HELP iotbox_connected_ports Number of ports with a sensor attached\n");
        output.push_str("# TYPE iotbox_connected_ports gauge\n");
        output.push_str(&format!(
            "iotbox_connected_ports {}\n",
            self.connected_ports.load(Ordering::Relaxed)
        ));

        output
            .push_str("# HELP iotbox_uptime_seconds Number of seconds since the server started\n");
        output.push_str("# TYPE iotbox_uptime_seconds gauge\n");
        output.push_str(&format!("iotbox_uptime_seconds {}\n", self.uptime_seconds()));

        output.push_str(
            "# HELP iotbox_healthy Whether the box is healthy (1=healthy, 0=unhealthy)\n",
        );
        output.push_str("# TYPE iotbox_healthy gauge\n");
        output.push_str(&format!(
            "iotbox_healthy {}\n",
            if is_healthy { 1 } else { 0 }
        ));

        output
    }
}

/// Global metrics instance
pub static METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

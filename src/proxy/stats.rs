//! Per-endpoint byte statistics.
//!
//! Each endpoint keeps two [`IoStats`] blocks: raw bytes on the transport and
//! payload bytes on the telnet side of the codec. Lifetime counters are
//! exact; the rate pair is only refreshed by an explicit
//! [`checkpoint`](IoStats::checkpoint), so the dispatch loop pays nothing for
//! it.
//!
//! Rates are an exponentially weighted moving average of bytes per
//! checkpoint interval:
//!
//! ```text
//! rate = weight * delta + (1 - weight) * rate
//! ```
//!
//! A weight of 1.0 ignores history.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifetime, checkpoint and rate counters for one endpoint.
#[derive(Debug, Clone)]
pub struct IoStats {
    bytes_in: u64,
    bytes_out: u64,
    started_at: Instant,
    checkpoint_in: u64,
    checkpoint_out: u64,
    checkpoint_at: Instant,
    rate_in: f64,
    rate_out: f64,
    rate_interval: Duration,
}

impl Default for IoStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IoStats {
    /// Counters starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            bytes_in: 0,
            bytes_out: 0,
            started_at: now,
            checkpoint_in: 0,
            checkpoint_out: 0,
            checkpoint_at: now,
            rate_in: 0.0,
            rate_out: 0.0,
            rate_interval: Duration::ZERO,
        }
    }

    /// Record bytes received.
    pub fn record_in(&mut self, n: usize) {
        self.bytes_in += n as u64;
    }

    /// Take back received bytes that were counted too early.
    pub fn retract_in(&mut self, n: usize) {
        self.bytes_in = self.bytes_in.saturating_sub(n as u64);
        self.checkpoint_in = self.checkpoint_in.min(self.bytes_in);
    }

    /// Record bytes sent.
    pub fn record_out(&mut self, n: usize) {
        self.bytes_out += n as u64;
    }

    /// Lifetime bytes received.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Lifetime bytes sent.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Time since the counters were created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Fold the bytes seen since the last checkpoint into the rate.
    pub fn checkpoint(&mut self, weight: f64) {
        self.checkpoint_at_instant(weight, Instant::now());
    }

    fn checkpoint_at_instant(&mut self, weight: f64, now: Instant) {
        let weight = weight.clamp(0.0, 1.0);
        let delta_in = (self.bytes_in - self.checkpoint_in) as f64;
        let delta_out = (self.bytes_out - self.checkpoint_out) as f64;

        self.rate_in = weight * delta_in + (1.0 - weight) * self.rate_in;
        self.rate_out = weight * delta_out + (1.0 - weight) * self.rate_out;
        self.rate_interval = now.saturating_duration_since(self.checkpoint_at);

        self.checkpoint_in = self.bytes_in;
        self.checkpoint_out = self.bytes_out;
        self.checkpoint_at = now;
    }

    /// Weighted bits per second `(in, out)`, if a checkpoint has run.
    pub fn bits_per_second(&self) -> Option<(f64, f64)> {
        let secs = self.rate_interval.as_secs_f64();
        if secs == 0.0 {
            return None;
        }
        Some((self.rate_in * 8.0 / secs, self.rate_out * 8.0 / secs))
    }

    /// Lifetime totals, e.g. `"1.50 KB in, 200 B out, 3.00 sec"`.
    pub fn human(&self) -> String {
        format!(
            "{}B in, {}B out, {}",
            unit_value(self.bytes_in as f64),
            unit_value(self.bytes_out as f64),
            unit_seconds(self.elapsed().as_secs_f64())
        )
    }

    /// Current rate, e.g. `"8.00 Kb/s in, 0 b/s out, (60.00 sec)"`.
    pub fn human_rate(&self) -> String {
        match self.bits_per_second() {
            None => "No Rate Data.".to_string(),
            Some((rate_in, rate_out)) => format!(
                "{}b/s in, {}b/s out, ({})",
                unit_value(rate_in),
                unit_value(rate_out),
                unit_seconds(self.rate_interval.as_secs_f64())
            ),
        }
    }

    /// Serializable copy of the counters.
    pub fn summary(&self) -> StatsSummary {
        let rate = self.bits_per_second();
        StatsSummary {
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            elapsed_secs: self.elapsed().as_secs_f64(),
            rate_in_bps: rate.map(|r| r.0),
            rate_out_bps: rate.map(|r| r.1),
        }
    }
}

/// Statistics summary for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    /// Lifetime bytes received.
    pub bytes_in: u64,
    /// Lifetime bytes sent.
    pub bytes_out: u64,
    /// Seconds since the counters were created.
    pub elapsed_secs: f64,
    /// Weighted inbound bits per second at the last checkpoint.
    pub rate_in_bps: Option<f64>,
    /// Weighted outbound bits per second at the last checkpoint.
    pub rate_out_bps: Option<f64>,
}

/// Scale a count to K/M/G/T (powers of 1024).
pub fn unit_value(val: f64) -> String {
    if val < 1024.0 {
        return format!("{:.0} ", val);
    }
    let mut val = val / 1024.0;
    let mut unit = "K";
    for next in ["M", "G", "T"] {
        if val <= 1024.0 {
            break;
        }
        val /= 1024.0;
        unit = next;
    }
    format!("{:.2} {}", val, unit)
}

/// Scale seconds to min/hr/day.
pub fn unit_seconds(val: f64) -> String {
    if val < 60.0 {
        return format!("{:.2} sec", val);
    }
    let mut val = val / 60.0;
    let mut unit = "min";
    if val > 60.0 {
        val /= 60.0;
        unit = "hr";
        if val > 24.0 {
            val /= 24.0;
            unit = "day";
        }
    }
    format!("{:.2} {}", val, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifetime_counters() {
        let mut stats = IoStats::new();
        stats.record_in(100);
        stats.record_in(24);
        stats.record_out(7);
        assert_eq!(stats.bytes_in(), 124);
        assert_eq!(stats.bytes_out(), 7);
    }

    #[test]
    fn test_retract_in() {
        let mut stats = IoStats::new();
        stats.record_in(50);
        stats.checkpoint(1.0);
        stats.retract_in(20);
        assert_eq!(stats.bytes_in(), 30);
        // Below the last checkpoint; the next delta must not underflow.
        stats.record_in(5);
        stats.checkpoint(1.0);
        assert_eq!(stats.bytes_in(), 35);
        stats.retract_in(100);
        assert_eq!(stats.bytes_in(), 0);
    }

    #[test]
    fn test_no_rate_before_checkpoint() {
        let stats = IoStats::new();
        assert!(stats.bits_per_second().is_none());
        assert_eq!(stats.human_rate(), "No Rate Data.");
    }

    #[test]
    fn test_weighted_rate() {
        let mut stats = IoStats::new();
        let start = stats.checkpoint_at;

        stats.record_in(1000);
        stats.checkpoint_at_instant(1.0, start + Duration::from_secs(1));
        let (rate_in, rate_out) = stats.bits_per_second().unwrap();
        assert!((rate_in - 8000.0).abs() < 1e-6);
        assert_eq!(rate_out, 0.0);

        // Half weight: new delta of 0 halves the previous rate.
        stats.checkpoint_at_instant(0.5, start + Duration::from_secs(2));
        let (rate_in, _) = stats.bits_per_second().unwrap();
        assert!((rate_in - 4000.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_value() {
        assert_eq!(unit_value(0.0), "0 ");
        assert_eq!(unit_value(1023.0), "1023 ");
        assert_eq!(unit_value(1536.0), "1.50 K");
        assert_eq!(unit_value(3.0 * 1024.0 * 1024.0), "3.00 M");
    }

    #[test]
    fn test_unit_seconds() {
        assert_eq!(unit_seconds(5.0), "5.00 sec");
        assert_eq!(unit_seconds(90.0), "1.50 min");
        assert_eq!(unit_seconds(7200.0), "2.00 hr");
        assert_eq!(unit_seconds(3.0 * 86400.0), "3.00 day");
    }

    #[test]
    fn test_human_format() {
        let mut stats = IoStats::new();
        stats.record_in(2048);
        stats.record_out(10);
        let text = stats.human();
        assert!(text.starts_with("2.00 KB in, 10 B out, "));
        assert!(text.ends_with("sec"));
    }
}

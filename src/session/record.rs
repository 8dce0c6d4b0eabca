//! Per-session record of detected triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::Path;
use uuid::Uuid;

/// One detected trigger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Zero-based trigger number
    pub index: u64,
    /// Clock time in seconds
    pub time: f64,
}

/// Everything a trigger object saw during one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub port_type: String,
    /// Clock time of the first trigger of the last wait, read before any
    /// clock reset it caused
    pub first_trigger_time: Option<f64>,
    pub triggers: Vec<Trigger>,
    pub timeouts: u64,
    pub aborts: u64,
}

/// Inter-trigger interval statistics, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (0 with a single interval)
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl SessionRecord {
    pub fn new(port_type: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            port_type: port_type.into(),
            first_trigger_time: None,
            triggers: Vec::new(),
            timeouts: 0,
            aborts: 0,
        }
    }

    pub fn record_trigger(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_abort(&mut self) {
        self.aborts += 1;
    }

    /// Express every recorded trigger time relative to clock time `origin`,
    /// after the clock was reset at that moment.
    pub fn rebase(&mut self, origin: f64) {
        for trigger in &mut self.triggers {
            trigger.time -= origin;
        }
    }

    /// Intervals between consecutive triggers with increasing index.
    ///
    /// A manual change of the trigger counter or a clock reset would make a
    /// neighbouring pair meaningless; such pairs are skipped.
    pub fn intervals(&self) -> Vec<f64> {
        self.triggers
            .windows(2)
            .filter(|pair| pair[1].index == pair[0].index + 1 && pair[1].time >= pair[0].time)
            .map(|pair| pair[1].time - pair[0].time)
            .collect()
    }

    /// Interval statistics; `None` until two consecutive triggers were seen.
    pub fn interval_stats(&self) -> Option<IntervalStats> {
        let intervals = self.intervals();
        if intervals.is_empty() {
            return None;
        }
        let std_dev = if intervals.len() > 1 {
            Statistics::std_dev(intervals.iter())
        } else {
            0.0
        };
        Some(IntervalStats {
            count: intervals.len(),
            mean: Statistics::mean(intervals.iter()),
            std_dev,
            min: Statistics::min(intervals.iter()),
            max: Statistics::max(intervals.iter()),
        })
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Session {}:\n\
             - Port type: {}\n\
             - Started: {}\n\
             - Triggers detected: {}\n\
             - Timeouts: {}\n\
             - Aborts: {}",
            self.session_id,
            self.port_type,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.triggers.len(),
            self.timeouts,
            self.aborts
        );
        if let Some(first) = self.first_trigger_time {
            out.push_str(&format!("\n- First trigger at: {first:.6}s"));
        }
        if let Some(stats) = self.interval_stats() {
            out.push_str(&format!(
                "\n- Estimated TR: {:.4}s (sd {:.2} ms, range {:.4}-{:.4}s, {} intervals)",
                stats.mean,
                stats.std_dev * 1000.0,
                stats.min,
                stats.max,
                stats.count
            ));
        }
        out
    }

    /// Write the record as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

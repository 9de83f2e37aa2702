//! Channel statistics tracking and quality warnings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use livestream_ipc::{ChannelStats, QualityWarning};

use crate::{HIGH_PACKET_LOSS_PERCENT, HIGH_RTT_MS};

/// Keeps the latest engine statistics for a session.
pub struct StatsTracker {
    joined_at: RwLock<Option<Instant>>,
    latest: RwLock<Option<ChannelStats>>,
    reports: AtomicU64,
    packet_loss_threshold: f32,
    rtt_threshold_ms: u32,
}

impl StatsTracker {
    /// Create a tracker with explicit warning thresholds.
    pub fn new(packet_loss_threshold: f32, rtt_threshold_ms: u32) -> Self {
        Self {
            joined_at: RwLock::new(None),
            latest: RwLock::new(None),
            reports: AtomicU64::new(0),
            packet_loss_threshold,
            rtt_threshold_ms,
        }
    }

    /// Start tracking a joined session.
    pub fn start(&self) {
        *self.joined_at.write() = Some(Instant::now());
        *self.latest.write() = None;
        self.reports.store(0, Ordering::Relaxed);
    }

    /// Stop tracking.
    pub fn stop(&self) {
        *self.joined_at.write() = None;
    }

    /// Record a stats report and return the warnings it triggers.
    pub fn record(&self, stats: &ChannelStats) -> Vec<QualityWarning> {
        let count = self.reports.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            count,
            rtt_ms = stats.rtt_ms,
            tx_kbps = stats.tx_kbps,
            rx_kbps = stats.rx_kbps,
            "Stats report"
        );
        *self.latest.write() = Some(stats.clone());
        self.check_warnings(stats)
    }

    /// Warnings for the given report.
    pub fn check_warnings(&self, stats: &ChannelStats) -> Vec<QualityWarning> {
        let mut warnings = Vec::new();

        let loss = stats.tx_packet_loss_percent.max(stats.rx_packet_loss_percent);
        if loss > self.packet_loss_threshold {
            warnings.push(QualityWarning::HighPacketLoss { percent: loss });
        }

        if stats.rtt_ms > self.rtt_threshold_ms {
            warnings.push(QualityWarning::HighLatency {
                rtt_ms: stats.rtt_ms,
            });
        }

        warnings
    }

    /// Latest report, with the duration filled from the local clock when
    /// the engine did not report one.
    pub fn latest(&self) -> Option<ChannelStats> {
        let mut stats = self.latest.read().clone()?;
        if stats.duration_secs == 0 {
            if let Some(start) = *self.joined_at.read() {
                stats.duration_secs = start.elapsed().as_secs();
            }
        }
        Some(stats)
    }

    /// Number of reports since the session joined.
    pub fn report_count(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new(HIGH_PACKET_LOSS_PERCENT, HIGH_RTT_MS)
    }
}

//! Lock-free statistics exposed per session.
//!
//! A typed struct of atomics, following the directive that stats "must
//! expose atomic reads and writes... without locking" - readers never block
//! writers and vice versa.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Channel IDs bandwidth is bucketed by. Duplicated here (rather than
/// imported from `transport::server`) to avoid a dependency cycle - this
/// module sits below transport.
const CHANNEL_SERVICE: u8 = 0;
const CHANNEL_VIDEO: u8 = 1;
const CHANNEL_AUDIO: u8 = 2;

/// Atomic counters tracked for one session's transport and pipeline.
#[derive(Debug, Default)]
pub struct StatsManager {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    fragments_retransmitted: AtomicU64,
    key_frames_requested: AtomicU64,
    audio_packets_dropped: AtomicU64,
    /// Last measured round-trip turnaround latency, in microseconds.
    last_latency_us: AtomicI64,
    /// Current adaptive fragment size, in bytes.
    current_fragment_size: AtomicU64,
    bandwidth_video_out: AtomicU64,
    bandwidth_video_in: AtomicU64,
    bandwidth_audio_out: AtomicU64,
    bandwidth_audio_in: AtomicU64,
    bandwidth_ctrl_out: AtomicU64,
    bandwidth_ctrl_in: AtomicU64,
    /// Origin-to-present glass-to-glass latency of the most recently
    /// presented video frame, in milliseconds.
    full_latency_ms: AtomicI64,
    /// Send-to-present latency of the most recently presented video frame,
    /// in milliseconds.
    client_latency_ms: AtomicI64,
    /// Current mean A/V desync, in milliseconds (signed - positive means
    /// audio trails video).
    av_desync_ms: AtomicI64,
    /// Slowest single `send_to` loop observed for one outgoing message, in
    /// microseconds.
    worst_send_time_us: AtomicU64,
    /// Count of outgoing sends whose loop exceeded [`SLOW_SEND_THRESHOLD_US`].
    slow_send_cnt: AtomicU64,
}

/// A send loop slower than this is counted towards `slow_send_cnt`.
pub const SLOW_SEND_THRESHOLD_US: u64 = 5_000;

impl StatsManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one outgoing message of `bytes` on `channel`, bucketing
    /// bandwidth by channel (video/audio/control) in addition to the
    /// channel-agnostic totals.
    pub fn record_frame_sent(&self, channel: u8, bytes: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        match channel {
            CHANNEL_VIDEO => self.bandwidth_video_out.fetch_add(bytes, Ordering::Relaxed),
            CHANNEL_AUDIO => self.bandwidth_audio_out.fetch_add(bytes, Ordering::Relaxed),
            CHANNEL_SERVICE => self.bandwidth_ctrl_out.fetch_add(bytes, Ordering::Relaxed),
            _ => self.bandwidth_ctrl_out.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    /// Records one incoming message of `bytes` on `channel`, bucketing
    /// bandwidth by channel in addition to the channel-agnostic totals.
    pub fn record_frame_received(&self, channel: u8, bytes: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        match channel {
            CHANNEL_VIDEO => self.bandwidth_video_in.fetch_add(bytes, Ordering::Relaxed),
            CHANNEL_AUDIO => self.bandwidth_audio_in.fetch_add(bytes, Ordering::Relaxed),
            CHANNEL_SERVICE => self.bandwidth_ctrl_in.fetch_add(bytes, Ordering::Relaxed),
            _ => self.bandwidth_ctrl_in.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_retransmitted(&self) {
        self.fragments_retransmitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_frame_requested(&self) {
        self.key_frames_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_packet_dropped(&self) {
        self.audio_packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_latency_us(&self, latency_us: i64) {
        self.last_latency_us.store(latency_us, Ordering::Relaxed);
    }

    pub fn set_current_fragment_size(&self, size: u64) {
        self.current_fragment_size.store(size, Ordering::Relaxed);
    }

    pub fn set_full_latency_ms(&self, latency_ms: i64) {
        self.full_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn set_client_latency_ms(&self, latency_ms: i64) {
        self.client_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn set_av_desync_ms(&self, desync_ms: i64) {
        self.av_desync_ms.store(desync_ms, Ordering::Relaxed);
    }

    /// Records the wall-clock duration of one outgoing send loop, tracking
    /// the slowest ever seen and counting sends past
    /// [`SLOW_SEND_THRESHOLD_US`].
    pub fn record_send_time_us(&self, duration_us: u64) {
        self.worst_send_time_us.fetch_max(duration_us, Ordering::Relaxed);
        if duration_us > SLOW_SEND_THRESHOLD_US {
            self.slow_send_cnt.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Takes a consistent-enough snapshot for the stats JSON surface.
    ///
    /// Individual fields may be a few stores stale relative to each other -
    /// acceptable for a diagnostics surface, unlike the per-field atomics.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            fragments_retransmitted: self.fragments_retransmitted.load(Ordering::Relaxed),
            key_frames_requested: self.key_frames_requested.load(Ordering::Relaxed),
            audio_packets_dropped: self.audio_packets_dropped.load(Ordering::Relaxed),
            last_latency_us: self.last_latency_us.load(Ordering::Relaxed),
            current_fragment_size: self.current_fragment_size.load(Ordering::Relaxed),
            bandwidth_video_out: self.bandwidth_video_out.load(Ordering::Relaxed),
            bandwidth_video_in: self.bandwidth_video_in.load(Ordering::Relaxed),
            bandwidth_audio_out: self.bandwidth_audio_out.load(Ordering::Relaxed),
            bandwidth_audio_in: self.bandwidth_audio_in.load(Ordering::Relaxed),
            bandwidth_ctrl_out: self.bandwidth_ctrl_out.load(Ordering::Relaxed),
            bandwidth_ctrl_in: self.bandwidth_ctrl_in.load(Ordering::Relaxed),
            full_latency_ms: self.full_latency_ms.load(Ordering::Relaxed),
            client_latency_ms: self.client_latency_ms.load(Ordering::Relaxed),
            av_desync_ms: self.av_desync_ms.load(Ordering::Relaxed),
            worst_send_time_us: self.worst_send_time_us.load(Ordering::Relaxed),
            slow_send_cnt: self.slow_send_cnt.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a [`StatsManager`], serialized to the stats
/// JSON object on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub fragments_retransmitted: u64,
    pub key_frames_requested: u64,
    pub audio_packets_dropped: u64,
    pub last_latency_us: i64,
    pub current_fragment_size: u64,
    pub bandwidth_video_out: u64,
    pub bandwidth_video_in: u64,
    pub bandwidth_audio_out: u64,
    pub bandwidth_audio_in: u64,
    pub bandwidth_ctrl_out: u64,
    pub bandwidth_ctrl_in: u64,
    pub full_latency_ms: i64,
    pub client_latency_ms: i64,
    pub av_desync_ms: i64,
    pub worst_send_time_us: u64,
    pub slow_send_cnt: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StatsManager::new();
        stats.record_frame_sent(CHANNEL_VIDEO, 100);
        stats.record_frame_sent(CHANNEL_VIDEO, 200);
        stats.record_frame_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 300);
        assert_eq!(snap.frames_dropped, 1);
    }

    #[test]
    fn latency_reflects_last_write_not_accumulation() {
        let stats = StatsManager::new();
        stats.set_last_latency_us(1000);
        stats.set_last_latency_us(1500);
        assert_eq!(stats.snapshot().last_latency_us, 1500);
    }

    #[test]
    fn bandwidth_is_bucketed_by_channel() {
        let stats = StatsManager::new();
        stats.record_frame_sent(CHANNEL_VIDEO, 1000);
        stats.record_frame_sent(CHANNEL_AUDIO, 100);
        stats.record_frame_received(CHANNEL_SERVICE, 10);

        let snap = stats.snapshot();
        assert_eq!(snap.bandwidth_video_out, 1000);
        assert_eq!(snap.bandwidth_audio_out, 100);
        assert_eq!(snap.bandwidth_ctrl_in, 10);
        assert_eq!(snap.bandwidth_video_in, 0);
    }

    #[test]
    fn send_time_tracks_worst_case_and_counts_slow_sends() {
        let stats = StatsManager::new();
        stats.record_send_time_us(100);
        stats.record_send_time_us(SLOW_SEND_THRESHOLD_US + 1);
        stats.record_send_time_us(50);

        let snap = stats.snapshot();
        assert_eq!(snap.worst_send_time_us, SLOW_SEND_THRESHOLD_US + 1);
        assert_eq!(snap.slow_send_cnt, 1);
    }
}

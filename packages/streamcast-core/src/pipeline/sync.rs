//! A/V synchronizer: tracks video/audio desync and decides when to drop
//! audio packets to catch up.
//!
//! The window is a `VecDeque` that pops the oldest sample once it exceeds
//! 100 entries, so the mean is always over the most recent <=100 samples;
//! the desync check and ignored-desync accumulation happen under a single
//! lock per audio submission.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const WINDOW_SIZE: usize = 100;

/// Tuning for the A/V synchronizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Mean desync, in milliseconds, past which audio packets start being
    /// dropped to resynchronize.
    pub desync_threshold_ms: i64,
    /// Maximum consecutive audio packets dropped before giving up on
    /// catching up this round (prevents an audio outage under sustained
    /// desync).
    pub max_seq_dropped_audio_packets: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            desync_threshold_ms: 80,
            max_seq_dropped_audio_packets: 50,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_seq_dropped_audio_packets == 0 {
            return Err("max_seq_dropped_audio_packets must be >= 1".to_string());
        }
        Ok(())
    }
}

struct SyncState {
    window: VecDeque<i64>,
    /// Additive baseline offset accepted as "in sync". Starts at zero and is
    /// only set once `consecutive_drops` hits the give-up threshold, at
    /// which point the current desync becomes the new normal.
    desync_to_ignore: i64,
    last_video_pts: Option<i64>,
    consecutive_drops: u32,
}

/// Decides whether to present or drop an audio packet based on rolling
/// video/audio desync.
pub struct AvSynchronizer {
    config: SyncConfig,
    state: Mutex<SyncState>,
}

/// Outcome of submitting one audio packet to the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Present,
    Drop,
}

impl AvSynchronizer {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SyncState {
                window: VecDeque::with_capacity(WINDOW_SIZE),
                desync_to_ignore: 0,
                last_video_pts: None,
                consecutive_drops: 0,
            }),
        }
    }

    /// Records the pts of the most recently decoded video frame.
    pub fn note_video_pts(&self, pts: i64) {
        self.state.lock().last_video_pts = Some(pts);
    }

    /// Submits one audio packet's pts and decides whether to present it or
    /// drop it to resynchronize.
    ///
    /// The window holds raw `lastVideoPts - audioPts` samples; the mean is
    /// only evaluated against the threshold once the window is full (100
    /// samples). `desync_to_ignore` stays zero until 50 consecutive drops
    /// force a give-up, at which point the current desync becomes the new
    /// baseline and is subtracted from every later sample.
    pub fn submit_audio(&self, audio_pts: i64) -> SyncDecision {
        let mut state = self.state.lock();
        let Some(video_pts) = state.last_video_pts else {
            return SyncDecision::Present;
        };

        let raw_desync = video_pts - audio_pts;
        state.window.push_back(raw_desync);
        if state.window.len() > WINDOW_SIZE {
            state.window.pop_front();
        }

        if state.window.len() < WINDOW_SIZE {
            return SyncDecision::Present;
        }

        let raw_mean: i64 = state.window.iter().sum::<i64>() / state.window.len() as i64;
        let mean = raw_mean - state.desync_to_ignore;

        if mean > self.config.desync_threshold_ms {
            state.consecutive_drops += 1;
            if state.consecutive_drops >= self.config.max_seq_dropped_audio_packets {
                state.desync_to_ignore = raw_mean;
                state.consecutive_drops = 0;
                SyncDecision::Present
            } else {
                SyncDecision::Drop
            }
        } else {
            state.consecutive_drops = 0;
            SyncDecision::Present
        }
    }

    /// Current mean desync over the rolling window, in milliseconds.
    #[must_use]
    pub fn mean_desync_ms(&self) -> i64 {
        let state = self.state.lock();
        if state.window.is_empty() {
            0
        } else {
            state.window.iter().sum::<i64>() / state.window.len() as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presents_when_no_video_pts_seen_yet() {
        let sync = AvSynchronizer::new(SyncConfig::default());
        assert_eq!(sync.submit_audio(1000), SyncDecision::Present);
    }

    #[test]
    fn below_window_capacity_never_drops() {
        let sync = AvSynchronizer::new(SyncConfig::default());
        sync.note_video_pts(100_000);
        for _ in 0..99 {
            assert_eq!(sync.submit_audio(0), SyncDecision::Present);
        }
    }

    #[test]
    fn sustained_desync_past_80ms_drops_once_window_is_full() {
        let sync = AvSynchronizer::new(SyncConfig::default());
        sync.note_video_pts(100);
        for _ in 0..100 {
            sync.submit_audio(0);
        }
        // window is now full of samples with desync == 100ms > 80ms threshold.
        assert_eq!(sync.submit_audio(0), SyncDecision::Drop);
    }

    #[test]
    fn gives_up_after_max_consecutive_drops_and_accepts_new_baseline() {
        let mut config = SyncConfig::default();
        config.max_seq_dropped_audio_packets = 5;
        let sync = AvSynchronizer::new(config);

        sync.note_video_pts(100);
        for _ in 0..100 {
            sync.submit_audio(0);
        }

        let mut drops = 0;
        let mut gave_up_and_presented = false;
        for _ in 0..10 {
            match sync.submit_audio(0) {
                SyncDecision::Drop => drops += 1,
                SyncDecision::Present => gave_up_and_presented = true,
            }
        }
        assert!(drops <= 5, "never more than max_seq_dropped_audio_packets consecutive drops");
        assert!(gave_up_and_presented, "must resume playback after giving up");
    }

    #[test]
    fn window_caps_at_100_samples() {
        let sync = AvSynchronizer::new(SyncConfig::default());
        sync.note_video_pts(0);
        for _ in 0..250 {
            sync.submit_audio(0);
        }
        assert_eq!(sync.state.lock().window.len(), 100);
    }
}

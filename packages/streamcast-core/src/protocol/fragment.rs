//! Fragmentation, reassembly, adaptive sizing, and retransmission.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::wire::{Fragment, FragmentHeader, FLAG_LAST_FRAGMENT, PROTOCOL_VERSION};
use crate::error::{StreamError, StreamResult};

/// Ceiling fragment size: the default, maximum `MaxFragmentSize`.
pub const DEFAULT_MAX_FRAGMENT_SIZE: u32 = 65_507;
/// Floor fragment size: adaptive halving never goes below this.
pub const MIN_FRAGMENT_SIZE: u32 = 512;

/// Tuning for fragmentation, reassembly, and adaptive sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentConfig {
    pub max_fragment_size: u32,
    /// Rolling interval over which lost-message counts are evaluated
    /// (`DatagramMsgInterval`).
    pub lost_msg_interval_secs: u64,
    /// Lost-message count within the interval that triggers a halving
    /// (`DatagramLostMsgThreshold`).
    pub lost_msg_threshold: u32,
    /// Consecutive clean intervals required before size is doubled back up
    /// (`DatagramTurningPointThreshold`).
    pub turning_point_threshold: u32,
    /// How long an incomplete reassembly is kept before eviction.
    pub reassembly_window_secs: u64,
    /// Maximum incomplete messages tracked per session before the oldest is
    /// evicted to make room.
    pub max_incomplete_per_session: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            lost_msg_interval_secs: 10,
            lost_msg_threshold: 10,
            turning_point_threshold: 20,
            reassembly_window_secs: 10,
            max_incomplete_per_session: 64,
        }
    }
}

impl FragmentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_fragment_size < MIN_FRAGMENT_SIZE {
            return Err(format!(
                "max_fragment_size must be >= {MIN_FRAGMENT_SIZE}"
            ));
        }
        if self.max_incomplete_per_session == 0 {
            return Err("max_incomplete_per_session must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Splits `payload` into fragments no larger than `max_fragment_size`.
pub fn split_message(channel: u8, msg_id: u32, payload: &[u8], max_fragment_size: u32) -> Vec<Fragment> {
    let max_payload = max_fragment_size as usize;
    let fragment_count = payload.len().div_ceil(max_payload).max(1);
    payload
        .chunks(max_payload.max(1))
        .enumerate()
        .map(|(index, chunk)| {
            let is_last = index + 1 == fragment_count;
            Fragment {
                header: FragmentHeader {
                    version: PROTOCOL_VERSION,
                    channel,
                    msg_id,
                    fragment_index: index as u16,
                    fragment_count: fragment_count as u16,
                    flags: if is_last { FLAG_LAST_FRAGMENT } else { 0 },
                },
                payload: Bytes::copy_from_slice(chunk),
            }
        })
        .collect()
}

/// Tracks in-flight reassembly of one (channel, msgID) message.
struct PendingMessage {
    fragment_count: u16,
    received: Vec<Option<Bytes>>,
    first_seen: Instant,
}

impl PendingMessage {
    fn new(fragment_count: u16) -> Self {
        Self {
            fragment_count,
            received: vec![None; fragment_count as usize],
            first_seen: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.received.iter().all(Option::is_some)
    }

    fn missing_indices(&self) -> Vec<u16> {
        self.received
            .iter()
            .enumerate()
            .filter_map(|(i, frag)| if frag.is_none() { Some(i as u16) } else { None })
            .collect()
    }

    fn assemble(&self) -> Bytes {
        let total: usize = self.received.iter().map(|f| f.as_ref().map_or(0, Bytes::len)).sum();
        let mut buf = Vec::with_capacity(total);
        for fragment in &self.received {
            buf.extend_from_slice(fragment.as_ref().expect("checked by is_complete"));
        }
        Bytes::from(buf)
    }
}

/// Bounded per-session reassembly table, keyed by (channel, msgID).
///
/// Incomplete messages older than `reassembly_window` are evicted lazily on
/// the next `push`/`sweep` call; if the table exceeds
/// `max_incomplete_per_session`, the single oldest pending message is
/// evicted to bound memory under a hostile or confused peer.
pub struct Reassembler {
    window: Duration,
    max_incomplete: usize,
    pending: HashMap<(u8, u32), PendingMessage>,
}

impl Reassembler {
    #[must_use]
    pub fn new(config: &FragmentConfig) -> Self {
        Self {
            window: Duration::from_secs(config.reassembly_window_secs),
            max_incomplete: config.max_incomplete_per_session,
            pending: HashMap::new(),
        }
    }

    /// Feeds one received fragment in. Returns the assembled payload once
    /// every fragment of its message has arrived.
    pub fn push(&mut self, fragment: Fragment) -> StreamResult<Option<Bytes>> {
        self.sweep_expired();
        let key = (fragment.header.channel, fragment.header.msg_id);

        if !self.pending.contains_key(&key) && self.pending.len() >= self.max_incomplete {
            self.evict_oldest();
        }

        let entry = self
            .pending
            .entry(key)
            .or_insert_with(|| PendingMessage::new(fragment.header.fragment_count));

        if entry.fragment_count != fragment.header.fragment_count {
            return Err(StreamError::InvalidArg(
                "fragment_count changed mid-message".into(),
            ));
        }

        entry.received[fragment.header.fragment_index as usize] = Some(fragment.payload);

        if entry.is_complete() {
            let message = self.pending.remove(&key).expect("just inserted").assemble();
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    /// Keys of incomplete messages that have been waiting at least
    /// `min_age`, so a caller can sweep for ones stale enough to warrant a
    /// NACK rather than NACKing a message still mid-flight.
    #[must_use]
    pub fn stale_pending(&self, min_age: Duration) -> Vec<(u8, u32)> {
        self.pending
            .iter()
            .filter(|(_, msg)| msg.first_seen.elapsed() >= min_age)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Returns the fragment indices still missing for a given message, for
    /// building a selective-retransmission request.
    #[must_use]
    pub fn missing_fragments(&self, channel: u8, msg_id: u32) -> Vec<u16> {
        self.pending
            .get(&(channel, msg_id))
            .map(PendingMessage::missing_indices)
            .unwrap_or_default()
    }

    fn sweep_expired(&mut self) {
        let window = self.window;
        self.pending.retain(|_, msg| msg.first_seen.elapsed() < window);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .pending
            .iter()
            .min_by_key(|(_, msg)| msg.first_seen)
            .map(|(key, _)| *key)
        {
            self.pending.remove(&oldest_key);
        }
    }
}

/// Tracks recent lost-message counts and decides when to halve/double
/// `max_fragment_size`.
pub struct AdaptiveSizer {
    ceiling: u32,
    current: u32,
    interval: Duration,
    lost_threshold: u32,
    turning_point: u32,
    window_start: Instant,
    lost_in_window: u32,
    clean_windows: u32,
}

impl AdaptiveSizer {
    #[must_use]
    pub fn new(config: &FragmentConfig) -> Self {
        Self {
            ceiling: config.max_fragment_size,
            current: config.max_fragment_size,
            interval: Duration::from_secs(config.lost_msg_interval_secs),
            lost_threshold: config.lost_msg_threshold,
            turning_point: config.turning_point_threshold,
            window_start: Instant::now(),
            lost_in_window: 0,
            clean_windows: 0,
        }
    }

    #[must_use]
    pub fn current_size(&self) -> u32 {
        self.current
    }

    /// Call once per lost message detected (missing fragment after the
    /// retransmit window).
    pub fn record_loss(&mut self) {
        self.lost_in_window += 1;
    }

    /// Call periodically (or on every received message) to roll the window
    /// forward and apply halving/doubling decisions. Returns `Some(new_size)`
    /// if the size changed, so the caller can announce it in-band.
    pub fn tick(&mut self) -> Option<u32> {
        if self.window_start.elapsed() < self.interval {
            return None;
        }

        let lost = self.lost_in_window;
        self.lost_in_window = 0;
        self.window_start = Instant::now();

        if lost > self.lost_threshold {
            self.clean_windows = 0;
            let halved = (self.current / 2).max(MIN_FRAGMENT_SIZE);
            if halved != self.current {
                self.current = halved;
                return Some(self.current);
            }
            None
        } else if lost > 0 {
            self.clean_windows = 0;
            None
        } else {
            self.clean_windows += 1;
            if self.clean_windows >= self.turning_point && self.current < self.ceiling {
                self.clean_windows = 0;
                self.current = (self.current * 2).min(self.ceiling);
                Some(self.current)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_message_produces_one_fragment_under_the_limit() {
        let fragments = split_message(1, 5, b"hello", 1024);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].header.is_last_fragment());
    }

    #[test]
    fn split_message_splits_across_the_limit() {
        let payload = vec![7u8; 2500];
        let fragments = split_message(1, 5, &payload, 1000);
        assert_eq!(fragments.len(), 3);
        assert!(!fragments[0].header.is_last_fragment());
        assert!(fragments[2].header.is_last_fragment());
    }

    #[test]
    fn reassembler_reassembles_out_of_order_fragments() {
        let config = FragmentConfig::default();
        let mut reassembler = Reassembler::new(&config);
        let payload = vec![9u8; 3000];
        let mut fragments = split_message(1, 1, &payload, 1000);
        fragments.reverse();

        let mut result = None;
        for fragment in fragments {
            result = reassembler.push(fragment).unwrap();
        }
        assert_eq!(result.unwrap().to_vec(), payload);
    }

    #[test]
    fn missing_fragments_reports_unreceived_indices() {
        let config = FragmentConfig::default();
        let mut reassembler = Reassembler::new(&config);
        let fragments = split_message(1, 1, &vec![1u8; 3000], 1000);
        reassembler.push(fragments[0].clone()).unwrap();
        assert_eq!(reassembler.missing_fragments(1, 1), vec![1, 2]);
    }

    #[test]
    fn reassembler_evicts_oldest_when_over_capacity() {
        let mut config = FragmentConfig::default();
        config.max_incomplete_per_session = 2;
        let mut reassembler = Reassembler::new(&config);

        for msg_id in 0..3 {
            let fragments = split_message(1, msg_id, &vec![1u8; 3000], 1000);
            reassembler.push(fragments[0].clone()).unwrap();
        }
        assert_eq!(reassembler.pending.len(), 2);
        assert!(reassembler.missing_fragments(1, 0).is_empty());
    }

    #[test]
    fn adaptive_sizer_halves_on_heavy_loss_then_doubles_after_turning_point() {
        let mut config = FragmentConfig::default();
        config.lost_msg_interval_secs = 0;
        config.lost_msg_threshold = 1;
        config.turning_point_threshold = 2;
        let mut sizer = AdaptiveSizer::new(&config);
        let initial = sizer.current_size();

        sizer.record_loss();
        sizer.record_loss();
        let after_loss = sizer.tick().unwrap();
        assert_eq!(after_loss, initial / 2);

        assert!(sizer.tick().is_none());
        let doubled = sizer.tick().unwrap();
        assert_eq!(doubled, after_loss * 2);
    }

    #[test]
    fn stale_pending_only_reports_messages_older_than_min_age() {
        let config = FragmentConfig::default();
        let mut reassembler = Reassembler::new(&config);
        let fragments = split_message(1, 1, &vec![1u8; 3000], 1000);
        reassembler.push(fragments[0].clone()).unwrap();

        assert!(reassembler.stale_pending(Duration::from_secs(60)).is_empty());
        assert_eq!(reassembler.stale_pending(Duration::from_secs(0)), vec![(1, 1)]);
    }

    #[test]
    fn adaptive_sizer_never_drops_below_floor() {
        let mut config = FragmentConfig::default();
        config.max_fragment_size = MIN_FRAGMENT_SIZE;
        config.lost_msg_interval_secs = 0;
        config.lost_msg_threshold = 0;
        let mut sizer = AdaptiveSizer::new(&config);
        sizer.record_loss();
        assert!(sizer.tick().is_none());
        assert_eq!(sizer.current_size(), MIN_FRAGMENT_SIZE);
    }
}

//! Channel Health (C8, spec §4.8), modeled on the teacher's circuit-breaker
//! style model router: consecutive upstream faults flip a channel to
//! `auto_disabled` and evict it from the Ability Index; re-enable is
//! admin-initiated via a synthetic test, never automatic (spec §4.8 /
//! SPEC_FULL §11 "Passive health probe on auto-disable").

use crate::model::ChannelId;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    AutoDisabled,
}

#[derive(Debug, Default)]
struct ChannelCounters {
    consecutive_faults: u32,
    state: Option<HealthState>,
}

pub struct ChannelHealth {
    disable_threshold: u32,
    automatic_disable_enabled: bool,
    automatic_enable_enabled: bool,
    counters: Mutex<HashMap<ChannelId, ChannelCounters>>,
}

/// Outcome of recording a fault, telling the caller whether the channel just
/// transitioned state so it can trigger an Ability Index rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    NoChange,
    AutoDisabled,
    Reenabled,
}

impl ChannelHealth {
    pub fn new(disable_threshold: u32, automatic_disable_enabled: bool, automatic_enable_enabled: bool) -> Self {
        Self {
            disable_threshold,
            automatic_disable_enabled,
            automatic_enable_enabled,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Called on an upstream error classified `ChannelFault` (spec §4.8).
    /// `UpstreamPermanent` never reaches here — it surfaces to the client
    /// without counting against the channel (spec §7).
    pub fn record_fault(&self, channel_id: ChannelId) -> HealthTransition {
        if !self.automatic_disable_enabled {
            return HealthTransition::NoChange;
        }
        let mut guard = self.counters.lock().expect("health lock poisoned");
        let entry = guard.entry(channel_id).or_default();
        entry.consecutive_faults += 1;

        if entry.state != Some(HealthState::AutoDisabled) && entry.consecutive_faults >= self.disable_threshold {
            entry.state = Some(HealthState::AutoDisabled);
            return HealthTransition::AutoDisabled;
        }
        HealthTransition::NoChange
    }

    pub fn record_success(&self, channel_id: ChannelId) {
        let mut guard = self.counters.lock().expect("health lock poisoned");
        if let Some(entry) = guard.get_mut(&channel_id) {
            entry.consecutive_faults = 0;
        }
    }

    /// `record_test_result` (SPEC_FULL §11): invoked by the admin
    /// `POST /api/channel/test/:id` endpoint. Only a passing test on an
    /// auto-disabled channel restores it, and only when
    /// `AutomaticEnableChannelEnabled` is set; manual disables are never
    /// auto-recovered by this path.
    pub fn record_test_result(&self, channel_id: ChannelId, passed: bool) -> HealthTransition {
        if !passed || !self.automatic_enable_enabled {
            return HealthTransition::NoChange;
        }
        let mut guard = self.counters.lock().expect("health lock poisoned");
        let entry = guard.entry(channel_id).or_default();
        if entry.state == Some(HealthState::AutoDisabled) {
            entry.state = Some(HealthState::Healthy);
            entry.consecutive_faults = 0;
            return HealthTransition::Reenabled;
        }
        HealthTransition::NoChange
    }

    pub fn is_auto_disabled(&self, channel_id: ChannelId) -> bool {
        self.counters
            .lock()
            .expect("health lock poisoned")
            .get(&channel_id)
            .map(|c| c.state == Some(HealthState::AutoDisabled))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_disables_after_threshold_consecutive_faults() {
        let health = ChannelHealth::new(3, true, true);
        assert_eq!(health.record_fault(1), HealthTransition::NoChange);
        assert_eq!(health.record_fault(1), HealthTransition::NoChange);
        assert_eq!(health.record_fault(1), HealthTransition::AutoDisabled);
        assert!(health.is_auto_disabled(1));
    }

    #[test]
    fn success_resets_consecutive_fault_counter() {
        let health = ChannelHealth::new(3, true, true);
        health.record_fault(1);
        health.record_fault(1);
        health.record_success(1);
        assert_eq!(health.record_fault(1), HealthTransition::NoChange);
        assert!(!health.is_auto_disabled(1));
    }

    #[test]
    fn disabled_channel_stays_down_until_passing_test() {
        let health = ChannelHealth::new(1, true, true);
        health.record_fault(1);
        assert!(health.is_auto_disabled(1));
        assert_eq!(health.record_test_result(1, false), HealthTransition::NoChange);
        assert!(health.is_auto_disabled(1));
        assert_eq!(health.record_test_result(1, true), HealthTransition::Reenabled);
        assert!(!health.is_auto_disabled(1));
    }

    #[test]
    fn automatic_disable_disabled_never_trips() {
        let health = ChannelHealth::new(1, false, true);
        health.record_fault(1);
        health.record_fault(1);
        assert!(!health.is_auto_disabled(1));
    }
}

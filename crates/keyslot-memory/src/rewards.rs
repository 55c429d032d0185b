//! Single-slot reward configuration cache.
//!
//! A configuration submission replaces the stored [`RewardConfig`] entirely;
//! nothing is merged across submissions.  Readers only ever see the derived
//! colorName → destination view.

use std::collections::BTreeMap;

use keyslot_types::RewardConfig;
use tracing::info;

/// Holds the most recent [`RewardConfig`], if any.
#[derive(Debug, Default)]
pub struct RewardStore {
    current: Option<RewardConfig>,
}

impl RewardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored configuration with `config`.
    pub fn set(&mut self, config: RewardConfig) {
        info!(entries = config.rewards.len(), "reward configuration replaced");
        self.current = Some(config);
    }

    /// Derived colorName → destination mapping.  Empty when unset.
    pub fn destination_map(&self) -> BTreeMap<String, String> {
        self.current
            .as_ref()
            .map(RewardConfig::destination_map)
            .unwrap_or_default()
    }

    /// Destination configured for `color`, honouring last-write-wins.
    pub fn destination_for(&self, color: &str) -> Option<String> {
        self.current.as_ref().and_then(|cfg| {
            cfg.rewards
                .iter()
                .rev()
                .find(|m| m.color_name == color)
                .map(|m| m.destination.clone())
        })
    }

    /// Reset to the unset state.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyslot_types::RewardMapping;

    fn mapping(color: &str, dest: &str) -> RewardMapping {
        RewardMapping {
            color_name: color.to_string(),
            destination: dest.to_string(),
        }
    }

    #[test]
    fn unset_store_has_empty_map() {
        let store = RewardStore::new();
        assert!(store.destination_map().is_empty());
        assert!(store.destination_for("red").is_none());
    }

    #[test]
    fn duplicate_color_last_wins() {
        let mut store = RewardStore::new();
        store.set(RewardConfig {
            rewards: vec![mapping("red", "gateA"), mapping("red", "gateB")],
        });
        let map = store.destination_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["red"], "gateB");
        assert_eq!(store.destination_for("red").as_deref(), Some("gateB"));
    }

    #[test]
    fn set_replaces_instead_of_merging() {
        let mut store = RewardStore::new();
        store.set(RewardConfig {
            rewards: vec![mapping("red", "gateA"), mapping("blue", "gateC")],
        });
        store.set(RewardConfig {
            rewards: vec![mapping("green", "gateD")],
        });
        let map = store.destination_map();
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key("red"));
        assert_eq!(map["green"], "gateD");
    }

    #[test]
    fn clear_resets_to_unset() {
        let mut store = RewardStore::new();
        store.set(RewardConfig {
            rewards: vec![mapping("red", "gateA")],
        });
        store.clear();
        assert!(store.current.is_none());
        assert!(store.destination_map().is_empty());
    }
}

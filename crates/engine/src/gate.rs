//! Crossing-based alert deduplication.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks which keys are currently in alert.
///
/// A key alerts when it first crosses its trigger, stays silent while it keeps
/// triggering (until the renotify period elapses) and is cleared once it is
/// evaluated without triggering. A renotify period of zero alerts on every
/// cycle.
///
/// Checking is split in two: [`AlertGate::due`] selects the keys to alert and
/// [`AlertGate::commit`] records them once the alert went out, so a cycle that
/// fails before sending alerts again next time.
#[derive(Debug, Default)]
pub struct AlertGate {
    active: HashMap<String, Instant>,
}

impl AlertGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of `triggered` due to alert, in input order and without repeats.
    ///
    /// `evaluated` lists every key whose data was read this cycle. Those not
    /// triggering are cleared; keys missing from it (failed fetches) keep
    /// their state.
    pub fn due<E, I>(&mut self, evaluated: E, triggered: I, renotify: Duration, now: Instant) -> Vec<String>
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let triggered: Vec<String> = triggered
            .into_iter()
            .map(|key| key.as_ref().to_string())
            .filter(|key| seen.insert(key.clone()))
            .collect();

        for key in evaluated {
            let key = key.as_ref();
            if !seen.contains(key) {
                self.active.remove(key);
            }
        }

        triggered
            .into_iter()
            .filter(|key| match self.active.get(key) {
                None => true,
                Some(_) if renotify.is_zero() => true,
                Some(last) => now.saturating_duration_since(*last) >= renotify,
            })
            .collect()
    }

    /// Record `fired` as alerted at `now`.
    pub fn commit(&mut self, fired: &[String], now: Instant) {
        for key in fired {
            self.active.insert(key.clone(), now);
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// One cycle where every triggered key was sent successfully.
    fn cycle(gate: &mut AlertGate, evaluated: &[&str], triggered: &[&str], renotify: Duration) -> Vec<String> {
        let now = Instant::now();
        let fire = gate.due(evaluated, triggered, renotify, now);
        gate.commit(&fire, now);
        fire
    }

    #[tokio::test(start_paused = true)]
    async fn test_alerts_once_while_active() {
        let mut gate = AlertGate::new();
        let hour = Duration::from_secs(3600);

        assert_eq!(cycle(&mut gate, &["BTC"], &["BTC"], hour), keys(&["BTC"]));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cycle(&mut gate, &["BTC"], &["BTC"], hour).is_empty());
        assert!(gate.is_active("BTC"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clears_when_trigger_stops() {
        let mut gate = AlertGate::new();
        let hour = Duration::from_secs(3600);

        cycle(&mut gate, &["BTC", "ETH"], &["BTC", "ETH"], hour);
        assert!(cycle(&mut gate, &["BTC", "ETH"], &["ETH"], hour).is_empty());
        assert!(!gate.is_active("BTC"));
        assert_eq!(cycle(&mut gate, &["BTC", "ETH"], &["BTC", "ETH"], hour), keys(&["BTC"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unevaluated_key_keeps_state() {
        let mut gate = AlertGate::new();
        let hour = Duration::from_secs(3600);

        cycle(&mut gate, &["BTC", "ETH"], &["BTC", "ETH"], hour);
        // BTC could not be fetched this cycle
        assert!(cycle(&mut gate, &["ETH"], &["ETH"], hour).is_empty());
        assert!(gate.is_active("BTC"));
        assert!(cycle(&mut gate, &["BTC", "ETH"], &["BTC", "ETH"], hour).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncommitted_keys_stay_due() {
        let mut gate = AlertGate::new();
        let hour = Duration::from_secs(3600);

        let now = Instant::now();
        assert_eq!(gate.due(["SOL"], ["SOL"], hour, now), keys(&["SOL"]));
        assert!(!gate.is_active("SOL"));
        assert_eq!(gate.due(["SOL"], ["SOL"], hour, now), keys(&["SOL"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renotify_after_period() {
        let mut gate = AlertGate::new();
        let period = Duration::from_secs(300);

        cycle(&mut gate, &["SOL"], &["SOL"], period);
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cycle(&mut gate, &["SOL"], &["SOL"], period).is_empty());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cycle(&mut gate, &["SOL"], &["SOL"], period), keys(&["SOL"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_alerts_every_cycle() {
        let mut gate = AlertGate::new();
        for _ in 0..3 {
            assert_eq!(cycle(&mut gate, &["OP"], &["OP", "OP"], Duration::ZERO), keys(&["OP"]));
        }
        assert_eq!(gate.active_count(), 1);
    }
}

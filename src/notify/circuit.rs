//! Per-scope failure circuit.
//!
//! A scope is one (tenant, project) pair; one flapping destination must
//! not block alerts for other tenants. Consecutive failures at the
//! threshold open the circuit for a fixed cooldown; any success closes it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct CircuitEntry {
    failures: u32,
    opened_until: Option<Instant>,
}

pub struct CircuitBreakerRegistry {
    states: Mutex<HashMap<String, CircuitEntry>>,
    threshold: u32,
    open_for: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(threshold: u32, open_secs: u64) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            threshold,
            open_for: Duration::from_secs(open_secs),
        }
    }

    pub fn scope_key(tenant_id: &str, project_id: &str) -> String {
        format!("{tenant_id}:{project_id}")
    }

    pub fn is_open(&self, key: &str) -> bool {
        let states = self.states.lock();
        states
            .get(key)
            .and_then(|entry| entry.opened_until)
            .is_some_and(|until| until > Instant::now())
    }

    pub fn record_success(&self, key: &str) {
        let mut states = self.states.lock();
        states.insert(key.to_string(), CircuitEntry::default());
    }

    pub fn record_failure(&self, key: &str) {
        let mut states = self.states.lock();
        let entry = states.entry(key.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= self.threshold {
            entry.opened_until = Some(Instant::now() + self.open_for);
            tracing::warn!(
                scope = key,
                failures = entry.failures,
                "notification circuit opened"
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn force_open_until(&self, key: &str, until: Instant) {
        let mut states = self.states.lock();
        states.entry(key.to_string()).or_default().opened_until = Some(until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_threshold_and_scopes_independently() {
        let circuits = CircuitBreakerRegistry::new(3, 60);
        let key_a = CircuitBreakerRegistry::scope_key("t1", "p1");
        let key_b = CircuitBreakerRegistry::scope_key("t1", "p2");

        circuits.record_failure(&key_a);
        circuits.record_failure(&key_a);
        assert!(!circuits.is_open(&key_a));
        circuits.record_failure(&key_a);
        assert!(circuits.is_open(&key_a));
        // Sibling scope unaffected.
        assert!(!circuits.is_open(&key_b));
    }

    #[test]
    fn success_resets_failure_streak() {
        let circuits = CircuitBreakerRegistry::new(3, 60);
        let key = CircuitBreakerRegistry::scope_key("t1", "p1");

        circuits.record_failure(&key);
        circuits.record_failure(&key);
        circuits.record_success(&key);
        circuits.record_failure(&key);
        circuits.record_failure(&key);
        assert!(!circuits.is_open(&key));
    }

    #[test]
    fn cooldown_expiry_closes_the_circuit() {
        let circuits = CircuitBreakerRegistry::new(3, 60);
        let key = CircuitBreakerRegistry::scope_key("t1", "p1");
        circuits.force_open_until(&key, Instant::now() - Duration::from_secs(1));
        assert!(!circuits.is_open(&key));
    }
}

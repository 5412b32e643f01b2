// Resilience — circuit breaker.
// Full CLOSED / OPEN / HALF_OPEN state machine, one instance per protected
// dependency (the primary LLM, the fallback LLM, the e-commerce API…),
// held in a process-wide `CircuitRegistry` so `/metrics` can enumerate all
// of them without each call site having to know the others exist.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::atoms::constants::{CIRCUIT_HISTORY_MAX_ENTRIES, CIRCUIT_HISTORY_TTL_SECS};
use crate::atoms::error::GatewayError;
use crate::atoms::types::{CircuitBreakerState, CircuitState, CircuitStateChange};

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: u64,
    history: VecDeque<CircuitStateChange>,
}

/// A single named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    half_open_success_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        CircuitBreaker {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            half_open_max_calls: crate::atoms::constants::HALF_OPEN_MAX_CALLS,
            half_open_success_threshold: crate::atoms::constants::HALF_OPEN_SUCCESS_THRESHOLD,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: 0,
                history: VecDeque::new(),
            }),
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        info!(breaker = %self.name, from = ?inner.state, to = ?to, "circuit breaker state change");
        let now = now_epoch_secs();
        inner.history.push_back(CircuitStateChange {
            from: inner.state,
            to,
            at_epoch_secs: now,
        });
        while inner.history.len() > CIRCUIT_HISTORY_MAX_ENTRIES {
            inner.history.pop_front();
        }
        while inner
            .history
            .front()
            .is_some_and(|c| now.saturating_sub(c.at_epoch_secs) > CIRCUIT_HISTORY_TTL_SECS)
        {
            inner.history.pop_front();
        }
        inner.state = to;
    }

    /// Admission check: call before attempting the protected operation.
    /// Transitions OPEN → HALF_OPEN once the recovery timeout has elapsed.
    pub fn check(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let elapsed = now_epoch_secs().saturating_sub(inner.opened_at);
            if elapsed >= self.recovery_timeout.as_secs() {
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.half_open_successes = 0;
            } else {
                return Err(GatewayError::CircuitBreakerOpen(self.name.clone()));
            }
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_success_threshold {
                    inner.consecutive_failures = 0;
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.state == CircuitState::HalfOpen || inner.consecutive_failures >= self.failure_threshold {
            warn!(breaker = %self.name, failures = inner.consecutive_failures, "circuit breaker tripping to OPEN");
            inner.opened_at = now_epoch_secs();
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// How many concurrent calls HALF_OPEN currently admits — used by
    /// callers that want to bound probe traffic rather than letting every
    /// waiting caller race to be the first probe.
    pub fn half_open_max_calls(&self) -> u32 {
        self.half_open_max_calls
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
        }
    }

    pub fn history(&self) -> Vec<CircuitStateChange> {
        self.inner.lock().history.iter().cloned().collect()
    }
}

/// Process-wide collection of named breakers. `ServiceContext` holds one
/// instance; everything that calls an external dependency looks its
/// breaker up (or creates it on first use) by name instead of carrying its
/// own `static` singleton the way a smaller codebase might.
#[derive(Default)]
pub struct CircuitRegistry {
    breakers: RwLock<std::collections::HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        name: &str,
        failure_threshold: u32,
        recovery_timeout: Duration,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }
        let mut write = self.breakers.write();
        write
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, failure_threshold, recovery_timeout)))
            .clone()
    }

    pub fn snapshot_all(&self) -> Vec<CircuitBreakerState> {
        self.breakers.read().values().map(|b| b.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_allows_calls() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        assert!(cb.check().is_ok());
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.check().is_err());
        assert_eq!(cb.snapshot().state, CircuitState::Open);
    }

    #[test]
    fn half_open_after_recovery_timeout_then_closes_on_success() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_secs(0));
        cb.record_failure();
        assert_eq!(cb.snapshot().state, CircuitState::Open);
        // recovery_timeout is 0s so the very next check flips to HALF_OPEN
        assert!(cb.check().is_ok());
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_secs(0));
        cb.record_failure();
        cb.check().ok();
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.snapshot().state, CircuitState::Open);
    }

    #[test]
    fn registry_returns_same_breaker_for_same_name() {
        let reg = CircuitRegistry::new();
        let a = reg.get_or_create("llm", 5, Duration::from_secs(60));
        let b = reg.get_or_create("llm", 5, Duration::from_secs(60));
        a.record_failure();
        assert_eq!(b.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn history_is_bounded() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_secs(0));
        for _ in 0..(CIRCUIT_HISTORY_MAX_ENTRIES + 10) {
            cb.record_failure();
            cb.check().ok();
            cb.record_success();
        }
        assert!(cb.history().len() <= CIRCUIT_HISTORY_MAX_ENTRIES);
    }
}

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — all calls pass through.
    Closed,
    /// Breaker tripped — calls are rejected.
    Open,
    /// Cooldown elapsed — one probe call allowed.
    HalfOpen,
}

/// Result of a governed call, fed back into the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Per-provider failure gate. Consecutive failures up to the threshold trip
/// the circuit open; once the cooldown elapses a single probe call is
/// admitted, and its outcome decides between closing and reopening.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    /// std Mutex: held only for short synchronous updates, never across
    /// await points.
    tally: Mutex<Tally>,
}

struct Tally {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold,
            cooldown,
            tally: Mutex::new(Tally {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed. An open circuit flips to half-open once
    /// its cooldown has elapsed, admitting the probe.
    pub fn can_execute(&self) -> bool {
        let mut tally = self.tally.lock().unwrap();

        if tally.state == CircuitState::Open {
            let cooled = tally
                .opened_at
                .map(|at| at.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if cooled {
                tracing::info!(circuit = %self.name, "Circuit breaker half-open, admitting probe");
                tally.state = CircuitState::HalfOpen;
            }
        }

        tally.state != CircuitState::Open
    }

    /// Feed a call outcome into the tally.
    pub fn record(&self, outcome: CallOutcome) {
        let mut tally = self.tally.lock().unwrap();

        match outcome {
            CallOutcome::Success => {
                tally.consecutive_failures = 0;
                if tally.state != CircuitState::Closed {
                    tracing::info!(circuit = %self.name, "Circuit breaker closed after successful call");
                    metrics::counter!("circuit_breaker.recoveries", "circuit" => self.name.clone())
                        .increment(1);
                    tally.state = CircuitState::Closed;
                    tally.opened_at = None;
                }
            }
            CallOutcome::Failure => {
                tally.consecutive_failures += 1;

                let failed_probe = tally.state == CircuitState::HalfOpen;
                let crossed_threshold = tally.state == CircuitState::Closed
                    && tally.consecutive_failures >= self.failure_threshold;

                if failed_probe {
                    tracing::warn!(circuit = %self.name, "Probe failed, circuit reopening");
                } else if crossed_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = tally.consecutive_failures,
                        threshold = self.failure_threshold,
                        "Failure threshold reached, circuit OPEN"
                    );
                    metrics::counter!("circuit_breaker.trips", "circuit" => self.name.clone())
                        .increment(1);
                }

                if failed_probe || crossed_threshold {
                    tally.state = CircuitState::Open;
                    tally.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Get the current state of the circuit breaker.
    pub fn current_state(&self) -> CircuitState {
        self.tally.lock().unwrap().state
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of circuit breakers, one per provider, process-wide. Breakers are
/// created on first use with the configured defaults.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            cooldown,
        }
    }

    /// Breaker for a provider, created lazily.
    pub fn for_provider(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        std::sync::Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            std::sync::Arc::new(CircuitBreaker::new(
                name,
                self.failure_threshold,
                self.cooldown,
            ))
        }))
    }

    /// Emit gauge metrics for all circuit breaker states.
    pub fn report_metrics(&self) {
        let breakers = self.breakers.lock().unwrap();
        for cb in breakers.values() {
            let state_value = match cb.current_state() {
                CircuitState::Closed => 0.0,
                CircuitState::HalfOpen => 0.5,
                CircuitState::Open => 1.0,
            };
            metrics::gauge!("circuit_breaker.state", "circuit" => cb.name().to_string())
                .set(state_value);
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

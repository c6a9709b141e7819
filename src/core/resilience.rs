// Circuit breaker around the query executor

use failsafe::futures::CircuitBreaker; // async call support
use failsafe::{backoff, failure_policy, Config, Error, StateMachine};
use std::time::Duration;

/// The single breaker shared by all agents.
///
/// Policy: opens when the failure ratio over a rolling window crosses the
/// configured threshold with at least `min_throughput` calls observed;
/// stays open for the cooldown, then admits one half-open probe.
pub type SharedCircuitBreaker =
    StateMachine<failure_policy::SuccessRateOverTimeWindow<backoff::Constant>, ()>;

/// Breaker parameters, all externally configurable.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Failure ratio that opens the circuit (0.3 = 30%)
    pub failure_ratio: f64,
    /// Rolling observation window
    pub window: Duration,
    /// Minimum calls within the window before the ratio applies
    pub min_throughput: u32,
    /// How long the circuit stays open before the half-open probe
    pub open_duration: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_ratio: 0.3,
            window: Duration::from_secs(10),
            min_throughput: 5,
            open_duration: Duration::from_secs(60),
        }
    }
}

/// Build the shared breaker from settings.
pub fn create_circuit_breaker(settings: &BreakerSettings) -> SharedCircuitBreaker {
    let required_success_rate = (1.0 - settings.failure_ratio).clamp(0.0, 1.0);
    Config::new()
        .failure_policy(failure_policy::success_rate_over_time_window(
            required_success_rate,
            settings.min_throughput,
            settings.window,
            backoff::constant(settings.open_duration),
        ))
        .build()
}

/// How a breaker-wrapped call ended.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The operation ran and failed; the failure was counted.
    Inner(E),
    /// The circuit is open; the operation was never attempted.
    Open,
}

/// Run a fallible async operation under the breaker.
///
/// An open circuit rejects without invoking `operation`, so a rejection
/// must be audited distinctly from a genuine execution failure.
pub async fn execute_with_breaker<F, Fut, T, E>(
    cb: &SharedCircuitBreaker,
    operation: F,
) -> Result<T, BreakerError<E>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    match cb.call(operation()).await {
        Ok(val) => Ok(val),
        Err(Error::Inner(e)) => Err(BreakerError::Inner(e)),
        Err(Error::Rejected) => Err(BreakerError::Open),
    }
}

/// Like [`execute_with_breaker`], but only failures matching `counts`
/// feed the failure ratio. Non-matching errors still surface as
/// `Inner` without moving the breaker toward open.
pub async fn execute_with_breaker_if<P, F, Fut, T, E>(
    cb: &SharedCircuitBreaker,
    counts: P,
    operation: F,
) -> Result<T, BreakerError<E>>
where
    P: Fn(&E) -> bool,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    match cb.call_with(counts, operation()).await {
        Ok(val) => Ok(val),
        Err(Error::Inner(e)) => Err(BreakerError::Inner(e)),
        Err(Error::Rejected) => Err(BreakerError::Open),
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::error::InferenceError;

/// Fail-fast guard around the remote product database.
///
/// One failure inside the rolling window opens the circuit; while open,
/// calls are skipped outright so a slow upstream cannot drag every
/// concurrent request down with it. Once the window elapses with no new
/// failures the breaker half-closes and lets one probe call through; a
/// single success fully resets the counter.
///
/// Process-wide, shared across requests, injectable (never a global).
/// State transitions only happen on call completion, so plain atomics are
/// enough.
pub struct CircuitBreaker {
    name: String,
    failure_count: AtomicU32,
    last_failure_ms: AtomicU64,
    is_open: AtomicBool,
    failure_threshold: u32,
    window: Duration,
    call_timeout: Duration,
    started: Instant,
}

impl CircuitBreaker {
    pub fn new(
        name: &str,
        failure_threshold: u32,
        window: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            is_open: AtomicBool::new(false),
            failure_threshold,
            window,
            call_timeout,
            started: Instant::now(),
        }
    }

    pub fn from_config(name: &str, config: &PipelineConfig) -> Self {
        Self::new(
            name,
            config.breaker_failure_threshold,
            config.breaker_window,
            config.remote_timeout,
        )
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Open circuit blocks calls until the window has elapsed with no new
    /// failures; after that one probe call is allowed through.
    pub fn is_call_allowed(&self) -> bool {
        if !self.is_open.load(Ordering::SeqCst) {
            return true;
        }
        let last_failure = self.last_failure_ms.load(Ordering::SeqCst);
        let quiet_ms = self.elapsed_ms().saturating_sub(last_failure);
        if quiet_ms >= self.window.as_millis() as u64 {
            log::info!("🔌 Circuit '{}' half-closed, allowing probe call", self.name);
            return true;
        }
        false
    }

    pub fn record_success(&self) {
        if self.is_open.swap(false, Ordering::SeqCst) {
            log::info!("✅ Circuit '{}' closed after successful probe", self.name);
        }
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_failure_ms.store(self.elapsed_ms(), Ordering::SeqCst);
        if count >= self.failure_threshold {
            self.is_open.store(true, Ordering::SeqCst);
            log::warn!(
                "⛔ Circuit '{}' opened ({} failures, window {:?})",
                self.name,
                count,
                self.window
            );
        }
    }

    /// Run one guarded call: skip immediately while open, otherwise bound
    /// it by the call timeout and record the outcome. No retries here;
    /// this is a guard, not a retry policy.
    pub async fn call<F, T>(&self, operation: F) -> Result<T, InferenceError>
    where
        F: Future<Output = Result<T, InferenceError>>,
    {
        if !self.is_call_allowed() {
            return Err(InferenceError::DependencyUnavailable(format!(
                "circuit '{}' is open",
                self.name
            )));
        }

        match tokio::time::timeout(self.call_timeout, operation).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(e)
            }
            Err(_) => {
                self.record_failure();
                Err(InferenceError::Transport(format!(
                    "'{}' call exceeded {:?}",
                    self.name, self.call_timeout
                )))
            }
        }
    }
}

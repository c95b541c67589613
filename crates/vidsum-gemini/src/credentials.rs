//! Credential pool with per-credential concurrency caps and cooldowns.
//!
//! Work is spread across N API keys for true parallelism. Selection picks
//! the least-loaded available credential, breaking ties by least-recently
//! used, so load stays even under contention. A rate-limited credential is
//! placed in a cooldown window and skipped until it expires.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{GeminiError, GeminiResult};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum in-flight calls per credential
    pub per_cred_cap: usize,
    /// Cooldown applied after a rate-limit signal
    pub cooldown: Duration,
    /// Default deadline for `acquire` inside `run_with_all`
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            per_cred_cap: 3,
            cooldown: Duration::from_millis(60_000),
            acquire_timeout: Duration::from_secs(120),
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            per_cred_cap: std::env::var("PER_CRED_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.per_cred_cap),
            cooldown: Duration::from_millis(
                std::env::var("RATE_LIMIT_COOLDOWN_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60_000),
            ),
            acquire_timeout: defaults.acquire_timeout,
        }
    }
}

/// A leased credential. Hold it for the duration of one API call and hand
/// it back through [`CredentialPool::release`].
#[derive(Clone)]
pub struct PooledCredential {
    /// Stable index of the credential within the pool
    pub id: usize,
    /// The API key
    pub secret: String,
}

impl fmt::Debug for PooledCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret.
        f.debug_struct("PooledCredential")
            .field("id", &self.id)
            .finish()
    }
}

struct CredentialState {
    secret: String,
    in_flight: usize,
    last_used_at: Option<Instant>,
    cooldown_until: Option<Instant>,
    error_count: u64,
}

/// Point-in-time pool summary, published with scheduler progress.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub cooling_down: usize,
    pub in_flight: usize,
}

/// Load-balancing pool over a fixed set of credentials.
pub struct CredentialPool {
    table: Mutex<Vec<CredentialState>>,
    released: Notify,
    config: PoolConfig,
    /// Fixed at construction; the table never grows or shrinks
    count: usize,
}

impl CredentialPool {
    /// Create a pool from a list of API keys.
    pub fn new(secrets: Vec<String>, config: PoolConfig) -> GeminiResult<Self> {
        if secrets.is_empty() {
            return Err(GeminiError::Terminal(
                "No credentials configured".to_string(),
            ));
        }
        let table: Vec<CredentialState> = secrets
            .into_iter()
            .map(|secret| CredentialState {
                secret,
                in_flight: 0,
                last_used_at: None,
                cooldown_until: None,
                error_count: 0,
            })
            .collect();
        let count = table.len();
        Ok(Self {
            table: Mutex::new(table),
            released: Notify::new(),
            config,
            count,
        })
    }

    /// Create from the `CREDENTIALS` environment variable (comma-separated
    /// keys) and pool knobs.
    pub fn from_env() -> GeminiResult<Self> {
        let raw = std::env::var("CREDENTIALS")
            .map_err(|_| GeminiError::Terminal("CREDENTIALS not set".to_string()))?;
        let secrets: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let pool = Self::new(secrets, PoolConfig::from_env())?;
        info!(credentials = pool.len(), "Credential pool initialized");
        Ok(pool)
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Aggregate concurrency ceiling: `N x per_cred_cap`.
    pub fn max_concurrency(&self) -> usize {
        self.count * self.config.per_cred_cap
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// All secrets, for per-credential uploads. Indexes match
    /// [`PooledCredential::id`].
    pub async fn secrets(&self) -> Vec<(usize, String)> {
        let table = self.table.lock().await;
        table
            .iter()
            .enumerate()
            .map(|(id, state)| (id, state.secret.clone()))
            .collect()
    }

    /// Lease the best available credential, waiting up to `timeout`.
    ///
    /// Selection under the table mutex:
    /// 1. skip credentials still cooling down,
    /// 2. skip credentials at their in-flight cap,
    /// 3. pick minimum in-flight, ties broken by oldest `last_used_at`.
    pub async fn acquire(&self, timeout: Duration) -> GeminiResult<PooledCredential> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut table = self.table.lock().await;
                if let Some(cred) = Self::try_select(&mut table, self.config.per_cred_cap) {
                    return Ok(cred);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Credential acquire timed out after {:?}", timeout);
                return Err(GeminiError::NoCapacity);
            }

            // Wake on release, or poll shortly in case a cooldown expires.
            let poll = (deadline - now).min(Duration::from_millis(250));
            tokio::select! {
                _ = self.released.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Return a leased credential.
    ///
    /// `error` is the failure that ended the call, if any; a rate-limit
    /// error starts the cooldown window. Error counts are accounting only.
    pub async fn release(&self, cred: &PooledCredential, error: Option<&GeminiError>) {
        let mut table = self.table.lock().await;
        let Some(state) = table.get_mut(cred.id) else {
            return;
        };

        state.in_flight = state.in_flight.saturating_sub(1);
        if let Some(err) = error {
            state.error_count += 1;
            if err.is_rate_limit() {
                state.cooldown_until = Some(Instant::now() + self.config.cooldown);
                warn!(
                    credential = cred.id,
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    "Credential rate limited, cooling down"
                );
            }
        }
        drop(table);
        self.released.notify_waiters();
    }

    /// Snapshot of pool health.
    pub async fn status(&self) -> PoolStatus {
        let table = self.table.lock().await;
        let now = Instant::now();
        let mut status = PoolStatus {
            total: table.len(),
            ..PoolStatus::default()
        };
        for state in table.iter() {
            let cooling = matches!(state.cooldown_until, Some(until) if until > now);
            if cooling {
                status.cooling_down += 1;
            } else if state.in_flight < self.config.per_cred_cap {
                status.available += 1;
            }
            status.in_flight += state.in_flight;
        }
        status
    }

    /// Drive a batch of work units through the pool.
    ///
    /// Each unit borrows one credential for its duration; at most
    /// `max_concurrency` units (bounded by the pool ceiling) run at once.
    /// Results come back in unit order.
    pub async fn run_with_all<T, F, Fut>(
        self: &Arc<Self>,
        units: Vec<F>,
        max_concurrency: Option<usize>,
    ) -> Vec<GeminiResult<T>>
    where
        F: FnOnce(PooledCredential) -> Fut,
        Fut: Future<Output = GeminiResult<T>>,
    {
        let ceiling = self.max_concurrency().max(1);
        let bound = max_concurrency
            .unwrap_or(ceiling)
            .clamp(1, ceiling);
        let gate = Arc::new(Semaphore::new(bound));

        debug!(units = units.len(), bound, "Dispatching batch through pool");

        let futures: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let pool = Arc::clone(self);
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|_| GeminiError::Cancelled)?;
                    let cred = pool.acquire(pool.config.acquire_timeout).await?;
                    let result = unit(cred.clone()).await;
                    pool.release(&cred, result.as_ref().err()).await;
                    result
                }
            })
            .collect();

        join_all(futures).await
    }

    fn try_select(
        table: &mut [CredentialState],
        per_cred_cap: usize,
    ) -> Option<PooledCredential> {
        let now = Instant::now();

        let chosen = table
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| !matches!(s.cooldown_until, Some(until) if until > now))
            .filter(|(_, s)| s.in_flight < per_cred_cap)
            .min_by_key(|(_, s)| (s.in_flight, s.last_used_at))?;

        let (id, state) = chosen;
        state.in_flight += 1;
        state.last_used_at = Some(now);
        Some(PooledCredential {
            id,
            secret: state.secret.clone(),
        })
    }
}

//! Adaptive per-host rate control: token bucket for RPS, a sliding window
//! for periodic request caps, and a dynamically resized concurrency gate
//! driven by Little's Law.
//!
//! Grounded on `examples/original_source/updater/rate_controller.py`,
//! translated from its asyncio lock/semaphore dance into `tokio::sync`
//! primitives in the shape of
//! `cooprefr-bettersys/rust-backend/src/scrapers/polymarket_api.rs`'s
//! `RateLimiter`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::config::RateControllerDefaults;

const TOKEN_CAPACITY: f64 = 3.0;
const WARMUP_CONCURRENCY: usize = 3;
const MAX_CONCURRENCY: usize = 10;
const RTT_SAMPLE_LIMIT: usize = 100;
const INCREASE_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub host: &'static str,
    pub total_requests: u64,
    pub http_429_count: u64,
    pub http_403_count: u64,
    pub network_errors: u64,
    pub current_concurrency: usize,
    pub window_usage: f64,
    pub ewma_rtt: f64,
    pub base_rtt: Option<f64>,
    pub warmup_completed: bool,
}

struct State {
    sent_times: VecDeque<Instant>,
    success_times: VecDeque<Instant>,
    error_times: VecDeque<Instant>,
    rtt_samples: VecDeque<f64>,
    ewma_rtt: f64,
    base_rtt: Option<f64>,
    total_requests: u64,
    http_429_count: u64,
    http_403_count: u64,
    network_error_count: u64,
    backoff_multiplier: f64,
    last_backoff_time: Option<Instant>,
    current_concurrency: usize,
    last_concurrency_increase: Option<Instant>,
    warmup_completed: bool,
    tokens: f64,
    last_token_update: Instant,
}

impl State {
    fn new(initial_concurrency: usize) -> Self {
        let now = Instant::now();
        State {
            sent_times: VecDeque::new(),
            success_times: VecDeque::new(),
            error_times: VecDeque::new(),
            rtt_samples: VecDeque::new(),
            ewma_rtt: 1.5,
            base_rtt: None,
            total_requests: 0,
            http_429_count: 0,
            http_403_count: 0,
            network_error_count: 0,
            backoff_multiplier: 1.0,
            last_backoff_time: None,
            current_concurrency: initial_concurrency,
            last_concurrency_increase: None,
            warmup_completed: false,
            tokens: 0.0,
            last_token_update: now,
        }
    }
}

/// Outbound per-host rate controller. One instance is shared (via `Arc`)
/// across every task hitting that host.
///
/// Unlike the teacher's inbound `middleware::rate_limit`, which keys a
/// `parking_lot::Mutex<HashMap<IpAddr, _>>` per-caller and never awaits
/// while holding the lock, this controller governs a single outbound host
/// and must sleep between checks, so its state lives behind a
/// `tokio::sync::Mutex` instead.
pub struct RateController {
    host: &'static str,
    target_rps: f64,
    window: Duration,
    window_limit: usize,
    warmup_requests: usize,
    ewma_alpha: f64,
    state: Mutex<State>,
    semaphore: Mutex<Arc<Semaphore>>,
    warmup_semaphore: Arc<Semaphore>,
}

impl RateController {
    pub fn new(host: &'static str, defaults: RateControllerDefaults) -> Self {
        info!(
            host,
            target_rps = defaults.target_rps,
            window_secs = defaults.window.as_secs(),
            window_limit = defaults.window_limit,
            concurrency = defaults.initial_concurrency,
            "rate controller initialized"
        );
        RateController {
            host,
            target_rps: defaults.target_rps,
            window: defaults.window,
            window_limit: defaults.window_limit as usize,
            warmup_requests: defaults.warmup_requests as usize,
            ewma_alpha: defaults.ewma_alpha,
            state: Mutex::new(State::new(defaults.initial_concurrency as usize)),
            semaphore: Mutex::new(Arc::new(Semaphore::new(defaults.initial_concurrency as usize))),
            warmup_semaphore: Arc::new(Semaphore::new(WARMUP_CONCURRENCY)),
        }
    }

    /// Waits until the token bucket and sliding window both allow the next
    /// request, then reserves a slot.
    async fn acquire_slot(&self) {
        loop {
            let wait_time = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                let elapsed = now.duration_since(state.last_token_update).as_secs_f64();
                let effective_rps = self.target_rps / state.backoff_multiplier;
                state.tokens = (state.tokens + elapsed * effective_rps).min(TOKEN_CAPACITY);
                state.last_token_update = now;

                let cutoff = now.checked_sub(self.window).unwrap_or(now);
                while matches!(state.sent_times.front(), Some(t) if *t < cutoff) {
                    state.sent_times.pop_front();
                }

                if state.tokens >= 1.0 && state.sent_times.len() < self.window_limit {
                    state.tokens -= 1.0;
                    state.total_requests += 1;
                    state.sent_times.push_back(now);
                    return;
                }

                let mut wait = Duration::ZERO;
                if state.tokens < 1.0 {
                    wait = wait.max(Duration::from_secs_f64(
                        (1.0 - state.tokens) / effective_rps,
                    ));
                }
                if state.sent_times.len() >= self.window_limit {
                    if let Some(oldest) = state.sent_times.front() {
                        let window_wait = (*oldest + self.window).saturating_duration_since(now);
                        wait = wait.max(window_wait);
                    }
                }
                wait
            };

            if wait_time > Duration::ZERO {
                debug!(host = self.host, wait_ms = wait_time.as_millis() as u64, "throttling");
                tokio::time::sleep(wait_time).await;
            } else {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    /// Runs `f` under the controller's rate and concurrency limits,
    /// recording RTT on success and an error tick on failure.
    pub async fn run<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let warmed_up = self.state.lock().await.warmup_completed;
        let sem = if warmed_up {
            self.semaphore.lock().await.clone()
        } else {
            self.warmup_semaphore.clone()
        };

        let _permit = sem.acquire_owned().await.expect("semaphore never closed");
        self.acquire_slot().await;

        let start = Instant::now();
        match f().await {
            Ok(v) => {
                self.record_success(start.elapsed().as_secs_f64()).await;
                Ok(v)
            }
            Err(e) => {
                self.record_error().await;
                Err(e)
            }
        }
    }

    async fn record_success(&self, rtt: f64) {
        let mut new_concurrency = None;
        {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            state.success_times.push_back(now);
            state.rtt_samples.push_back(rtt);
            state.ewma_rtt = self.ewma_alpha * rtt + (1.0 - self.ewma_alpha) * state.ewma_rtt;

            if !state.warmup_completed && state.rtt_samples.len() >= self.warmup_requests {
                let mut sorted: Vec<f64> = state.rtt_samples.iter().copied().collect();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let median = sorted[sorted.len() / 2];
                let base_rtt = median.clamp(0.5, 3.0);
                state.base_rtt = Some(base_rtt);
                state.warmup_completed = true;
                info!(host = self.host, base_rtt, "warmup completed");
                new_concurrency = Some(state.current_concurrency);
            }

            while state.rtt_samples.len() > RTT_SAMPLE_LIMIT {
                state.rtt_samples.pop_front();
            }
        }

        if let Some(n) = new_concurrency {
            *self.semaphore.lock().await = Arc::new(Semaphore::new(n));
        }

        self.evaluate_concurrency().await;
    }

    async fn record_error(&self) {
        let mut state = self.state.lock().await;
        state.error_times.push_back(Instant::now());
        state.network_error_count += 1;
    }

    /// Reports an HTTP error from the caller's response handling and
    /// applies backoff. For 429s this halves concurrency immediately and
    /// sleeps for `retry_after` (if the upstream gave one) or an
    /// exponential-with-jitter delay.
    ///
    /// `backoff_multiplier` is never reset once raised (matches the
    /// original implementation's behavior, preserved deliberately rather
    /// than "fixed").
    pub async fn report_http_error(&self, status: u16, retry_after: Option<u64>) {
        let sleep_for = {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            if status == 429 {
                state.http_429_count += 1;
                let old = state.current_concurrency;
                state.current_concurrency = (state.current_concurrency / 2).max(1);
                state.last_backoff_time = Some(now);
                state.backoff_multiplier = 2.0;
                *self.semaphore.lock().await = Arc::new(Semaphore::new(state.current_concurrency));
                warn!(
                    host = self.host,
                    from = old,
                    to = state.current_concurrency,
                    "HTTP 429, concurrency reduced"
                );

                Some(match retry_after {
                    Some(secs) => {
                        warn!(host = self.host, secs, "backing off for Retry-After");
                        Duration::from_secs(secs)
                    }
                    None => {
                        let exp = (state.http_429_count - 1).min(3) as u32;
                        let base = (5.0 * 2f64.powi(exp as i32)).min(60.0);
                        let jitter = fastrand_like_jitter(base * 0.1);
                        let total = base + jitter;
                        warn!(host = self.host, secs = total, "no Retry-After, backing off");
                        Duration::from_secs_f64(total)
                    }
                })
            } else if status == 403 {
                state.http_403_count += 1;
                tracing::error!(host = self.host, "HTTP 403 access forbidden");
                None
            } else {
                None
            }
        };

        if let Some(d) = sleep_for {
            tokio::time::sleep(d).await;
        }
    }

    async fn evaluate_concurrency(&self) {
        let mut state = self.state.lock().await;
        let (base_rtt, warmup_completed) = (state.base_rtt, state.warmup_completed);
        let (Some(base_rtt), true) = (base_rtt, warmup_completed) else {
            return;
        };

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or(now);
        while matches!(state.sent_times.front(), Some(t) if *t < cutoff) {
            state.sent_times.pop_front();
        }
        let window_usage_rate = state.sent_times.len() as f64 / self.window_limit as f64;

        let p95_rtt = if state.rtt_samples.len() >= 20 {
            let mut sorted: Vec<f64> = state.rtt_samples.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let idx = ((sorted.len() as f64) * 0.95) as usize;
            sorted[idx.min(sorted.len() - 1)]
        } else {
            state.ewma_rtt
        };

        let safety_margin = if window_usage_rate <= 0.7 && p95_rtt <= base_rtt * 1.2 {
            0.0
        } else if window_usage_rate > 0.9 || p95_rtt > base_rtt * 1.5 {
            1.0
        } else {
            0.5
        };

        let recommended = ((self.target_rps * state.ewma_rtt).ceil() + safety_margin) as i64;
        let recommended = recommended.clamp(1, MAX_CONCURRENCY as i64) as usize;

        let two_min_ago = now.checked_sub(Duration::from_secs(120)).unwrap_or(now);
        let five_min_ago = now.checked_sub(Duration::from_secs(300)).unwrap_or(now);

        let recent_2min_success = state.success_times.iter().filter(|t| **t >= two_min_ago).count();
        let recent_2min_errors = state.error_times.iter().filter(|t| **t >= two_min_ago).count();
        let recent_5min_success = state.success_times.iter().filter(|t| **t >= five_min_ago).count();
        let recent_5min_errors = state.error_times.iter().filter(|t| **t >= five_min_ago).count();

        let can_increase = state
            .last_concurrency_increase
            .map(|t| now.duration_since(t) >= INCREASE_COOLDOWN)
            .unwrap_or(true);

        let recent_2min_429 = match state.last_backoff_time {
            Some(t) if now.duration_since(t) < Duration::from_secs(120) => state.http_429_count,
            _ => 0,
        };

        let increase_1 = can_increase
            && recent_2min_429 == 0
            && recent_2min_success > 0
            && recent_2min_errors == 0
            && window_usage_rate <= 0.8
            && p95_rtt <= base_rtt * 1.1;

        let error_rate_5min =
            recent_5min_errors as f64 / (recent_5min_success + recent_5min_errors).max(1) as f64;

        let increase_2 =
            can_increase && recent_5min_success > 0 && window_usage_rate <= 0.85 && error_rate_5min < 0.005;

        let increase_3 = can_increase && state.current_concurrency < recommended.saturating_sub(1);

        let decrease_1 = window_usage_rate >= 0.95 && p95_rtt >= base_rtt * 1.3;
        let decrease_2 = recent_5min_success > 0 && error_rate_5min >= 0.01;

        let old = state.current_concurrency;
        if increase_1 || increase_2 || increase_3 {
            let next = (state.current_concurrency + 1).min(MAX_CONCURRENCY);
            state.current_concurrency = next;
            state.last_concurrency_increase = Some(now);
            drop(state);
            *self.semaphore.lock().await = Arc::new(Semaphore::new(next));
            info!(host = self.host, from = old, to = next, window_usage_rate, p95_rtt, "concurrency increased");
        } else if decrease_1 || decrease_2 {
            let next = (state.current_concurrency - 1).max(1);
            state.current_concurrency = next;
            drop(state);
            *self.semaphore.lock().await = Arc::new(Semaphore::new(next));
            info!(host = self.host, from = old, to = next, window_usage_rate, error_rate_5min, "concurrency decreased");
        }
    }

    pub async fn stats(&self) -> Stats {
        let state = self.state.lock().await;
        let window_usage = state.sent_times.len() as f64 / self.window_limit.max(1) as f64;
        Stats {
            host: self.host,
            total_requests: state.total_requests,
            http_429_count: state.http_429_count,
            http_403_count: state.http_403_count,
            network_errors: state.network_error_count,
            current_concurrency: state.current_concurrency,
            window_usage,
            ewma_rtt: state.ewma_rtt,
            base_rtt: state.base_rtt,
            warmup_completed: state.warmup_completed,
        }
    }
}

/// Deterministic stand-in for `random.uniform(0, n)`: the original adds
/// jitter purely to avoid thundering-herd retries, so a cheap time-seeded
/// spread is sufficient here and keeps this module free of an extra crate.
fn fastrand_like_jitter(max: f64) -> f64 {
    let nanos = Instant::now().elapsed().subsec_nanos() as f64;
    (nanos % 1000.0) / 1000.0 * max
}

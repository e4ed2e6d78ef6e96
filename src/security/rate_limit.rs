use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Per-client request history.
#[derive(Debug)]
struct ClientLimitState {
    request_timestamps: VecDeque<Instant>,
    last_seen: Instant,
}

impl ClientLimitState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.request_timestamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.request_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter keyed by client id.
///
/// At most `max_requests` requests are admitted in any window of length
/// `window`. Each client's history sits behind its own lock; the outer map
/// lock is only held to find or insert a client.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    clients: RwLock<HashMap<String, Arc<Mutex<ClientLimitState>>>>,
    window: Duration,
    max_requests: usize,
    enabled: bool,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            window,
            max_requests,
            enabled: true,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.window(), config.max_requests)
        }
    }

    /// Admit or reject one request from `client_id` now.
    pub fn check(&self, client_id: &str) -> bool {
        self.check_at(client_id, Instant::now())
    }

    /// Admit or reject one request from `client_id` at `now`.
    pub fn check_at(&self, client_id: &str, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        let state = self.client(client_id, now);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_seen = now;
        state.prune(now, self.window);

        if state.request_timestamps.len() < self.max_requests {
            state.request_timestamps.push_back(now);
            true
        } else {
            tracing::debug!(client_id = %client_id, window_ms = self.window.as_millis(), "Rate limit exceeded");
            false
        }
    }

    /// Forget clients with no admitted request inside the window.
    ///
    /// A client whose state is held by an in-flight check is kept, so its
    /// admission is never recorded into a state that was already dropped.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|_, state| {
            if Arc::strong_count(state) > 1 {
                return true;
            }
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.prune(now, self.window);
            !state.request_timestamps.is_empty()
                || now.saturating_duration_since(state.last_seen) < self.window
        });
        before - clients.len()
    }

    /// Number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn client(&self, client_id: &str, now: Instant) -> Arc<Mutex<ClientLimitState>> {
        if let Some(state) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
        {
            return Arc::clone(state);
        }

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(clients.entry(client_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ClientLimitState {
                request_timestamps: VecDeque::new(),
                last_seen: now,
            }))
        }))
    }
}

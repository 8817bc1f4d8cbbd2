//! Request pacing for remote providers

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Rate limiter shared by every worker talking to one provider.
///
/// Besides the steady requests-per-second quota, a worker that receives a
/// rate-limit response can put the whole provider on cooldown so the other
/// workers stop hammering it too.
#[derive(Clone)]
pub struct ProviderRateLimiter {
    limiter: Arc<DirectLimiter>,
    cooldown_until: Arc<Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for ProviderRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRateLimiter").finish_non_exhaustive()
    }
}

impl ProviderRateLimiter {
    /// Create a limiter allowing `requests_per_second` with no burst
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_second(rps).allow_burst(nonzero!(1u32));

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            cooldown_until: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        loop {
            let until = *self.cooldown_until.lock().await;
            match until {
                Some(deadline) if deadline > Instant::now() => {
                    trace!("Provider cooling down for {:?}", deadline - Instant::now());
                    tokio::time::sleep_until(deadline).await;
                }
                _ => break,
            }
        }
        self.limiter.until_ready().await;
    }

    /// Hold every caller of [`wait`](Self::wait) for at least `duration`
    pub async fn cool_down(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut until = self.cooldown_until.lock().await;
        if until.map_or(true, |current| current < deadline) {
            debug!("Provider cooldown for {:?}", duration);
            *until = Some(deadline);
        }
    }
}

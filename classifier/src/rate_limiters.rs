use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};

use leaky_bucket::RateLimiter;
use tokio::time::Duration;

use crate::config::LlmConfig;

/// Client-side throttle for the LLM provider: a leaky bucket over request
/// starts plus a global backoff flag flipped when the provider reports a rate
/// limit breach.
#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(limit_per_sec: usize, refill_interval_ms: u64, backoff_secs: u64) -> Self {
        let prompt = RateLimiter::builder()
            .initial(1)
            .interval(Duration::from_millis(refill_interval_ms))
            .max(limit_per_sec)
            .refill(1)
            .build();

        Self {
            prompt: Arc::new(prompt),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration: Duration::from_secs(backoff_secs),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.rate_limit_per_sec,
            config.refill_interval_ms,
            config.backoff_secs,
        )
    }

    pub async fn acquire_one(&self) {
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.prompt.acquire_one().await;
    }

    pub fn trigger_backoff(&self) {
        tracing::info!("Triggering backoff...");
        self.backoff.store(true, Relaxed);
        let self_ = self.clone();
        let duration = self.backoff_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn in_backoff(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn get_status(&self) -> String {
        let prompt_bucket = format!("{}/{}", self.prompt.balance(), self.prompt.max());
        if self.backoff.load(Relaxed) {
            format!("prompts: {} (BACKOFF)", prompt_bucket)
        } else {
            format!("prompts: {}", prompt_bucket)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_refills_over_time() {
        let limiter = RateLimiter::builder()
            .initial(1)
            .interval(Duration::from_millis(10))
            .max(10)
            .refill(1)
            .build();

        limiter.acquire_one().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Refilled enough for another acquire without waiting the full max.
        limiter.acquire_one().await;
    }

    #[tokio::test]
    async fn status_reports_backoff() {
        let limiters = RateLimiters::new(5, 250, 60);
        assert!(!limiters.in_backoff());
        limiters.trigger_backoff();
        assert!(limiters.in_backoff());
        assert!(limiters.get_status().contains("BACKOFF"));
    }
}

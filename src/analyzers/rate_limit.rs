//! Per-media-type request rate limiting.

use crate::config::RateSettings;
use crate::store::MediaType;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Mutex-protected token bucket enforcing a requests-per-minute budget.
///
/// `wait` is the single synchronization point: it reserves the next free
/// slot under the lock, then sleeps outside it. Two consecutive callers
/// are never admitted less than `60/rpm` seconds apart; the first request
/// does not block.
pub struct RateLimiter {
    min_delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rpm: u32) -> Self {
        let rpm = rpm.max(1);
        Self {
            min_delay: Duration::from_secs_f64(60.0 / f64::from(rpm)),
            next_slot: Mutex::new(None),
        }
    }

    /// The minimum wall-clock spacing between two admitted requests.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Block until the bucket admits the caller.
    pub async fn wait(&self) {
        let admit_at = {
            let mut slot = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let admit_at = match *slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *slot = Some(admit_at + self.min_delay);
            admit_at
        };

        let now = Instant::now();
        if admit_at > now {
            debug!("Rate limiter sleeping {:?}", admit_at - now);
            tokio::time::sleep_until(tokio::time::Instant::from_std(admit_at)).await;
        }
    }
}

/// One rate limiter per media type.
pub struct RateLimiterSet {
    image: RateLimiter,
    audio: RateLimiter,
    video: RateLimiter,
}

impl RateLimiterSet {
    pub fn new(settings: &RateSettings) -> Self {
        Self {
            image: RateLimiter::new(settings.image_rpm),
            audio: RateLimiter::new(settings.audio_rpm),
            video: RateLimiter::new(settings.video_rpm),
        }
    }

    pub fn for_media(&self, media_type: MediaType) -> &RateLimiter {
        match media_type {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
            // Text never reaches an analyzer; fall through to the image
            // bucket rather than panic.
            MediaType::Image | MediaType::Text => &self.image,
        }
    }

    /// Wait on the bucket for the given media type.
    pub async fn wait(&self, media_type: MediaType) {
        self.for_media(media_type).wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_does_not_block() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_consecutive_requests_are_spaced() {
        // 600 rpm -> 100ms spacing, fast enough for a test.
        let limiter = RateLimiter::new(600);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_min_delay_from_rpm() {
        assert_eq!(RateLimiter::new(60).min_delay(), Duration::from_secs(1));
        assert_eq!(RateLimiter::new(15).min_delay(), Duration::from_secs(4));
    }

    #[test]
    fn test_limiter_set_routing() {
        let set = RateLimiterSet::new(&RateSettings::default());
        assert_eq!(
            set.for_media(MediaType::Image).min_delay(),
            Duration::from_secs(4)
        );
        assert_eq!(
            set.for_media(MediaType::Audio).min_delay(),
            Duration::from_secs(6)
        );
        assert_eq!(
            set.for_media(MediaType::Video).min_delay(),
            Duration::from_secs(12)
        );
    }
}

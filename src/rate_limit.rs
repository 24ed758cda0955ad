use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT: Duration = Duration::from_secs(60);
// entries are kept this long after their lockout ends
const RETENTION: Duration = Duration::from_secs(300);

#[derive(Clone, Default)]
pub struct AuthRateLimiter {
    // client address -> (failed_attempts, lockout_until, last_failure)
    attempts: Arc<RwLock<HashMap<String, (u32, Option<Instant>, Instant)>>>,
}

impl AuthRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lockout for this client, if any.
    pub async fn locked_for(&self, client: &str) -> Option<Duration> {
        let map = self.attempts.read().await;
        let now = Instant::now();
        map.get(client)
            .and_then(|(_, lockout, _)| *lockout)
            .filter(|until| now < *until)
            .map(|until| until.duration_since(now))
    }

    /// Counts a failed sign-in. Returns the lockout once the limit is hit.
    pub async fn record_failure(&self, client: &str) -> Result<(), Duration> {
        let mut map = self.attempts.write().await;
        let now = Instant::now();

        let entry = map.entry(client.to_string()).or_insert((0, None, now));

        if let Some(lockout_until) = entry.1 {
            if now < lockout_until {
                return Err(lockout_until.duration_since(now));
            }
            // lockout expired, start over
            *entry = (0, None, now);
        }

        entry.0 += 1;
        entry.2 = now;

        if entry.0 >= MAX_FAILED_ATTEMPTS {
            entry.1 = Some(now + LOCKOUT);
            return Err(LOCKOUT);
        }

        Ok(())
    }

    pub async fn reset(&self, client: &str) {
        let mut map = self.attempts.write().await;
        map.remove(client);
    }

    // Periodic cleanup to prevent memory growth
    pub async fn cleanup_old_entries(&self) {
        let mut map = self.attempts.write().await;
        let now = Instant::now();
        map.retain(|_, (_, lockout, last_failure)| match lockout {
            Some(until) => now < *until + RETENTION,
            None => now < *last_failure + RETENTION,
        });
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.attempts.read().await.len()
    }
}

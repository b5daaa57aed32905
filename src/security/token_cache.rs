use std::sync::Arc;
use tokio::sync::RwLock;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Refresh this long before the server-side expiry.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Access credential with a known expiry.
pub trait ExpiringToken {
    fn access_token(&self) -> &str;

    fn expires_at(&self) -> DateTime<Utc>;

    /// True when the token is empty or expires within the refresh margin.
    fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token().is_empty() {
            return true;
        }
        now + Duration::seconds(REFRESH_MARGIN_SECS) >= self.expires_at()
    }
}

/// Token cache with atomic swap capability and rotation tracking.
#[derive(Debug)]
pub struct TokenCache<T> {
    token: Arc<RwLock<Option<T>>>,
    last_rotated: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl<T> Clone for TokenCache<T> {
    fn clone(&self) -> Self {
        Self {
            token: Arc::clone(&self.token),
            last_rotated: Arc::clone(&self.last_rotated),
        }
    }
}

impl<T> Default for TokenCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TokenCache<T> {
    /// Create an empty cache; the first request populates it.
    pub fn new() -> Self {
        Self {
            token: Arc::new(RwLock::new(None)),
            last_rotated: Arc::new(RwLock::new(None)),
        }
    }

    /// Drop the held token so the next request obtains a new one.
    pub async fn clear(&self) {
        let mut token = self.token.write().await;
        if token.take().is_some() {
            debug!("Cached token cleared");
        }
    }

    /// Get the time of last rotation.
    pub async fn last_rotated(&self) -> Option<DateTime<Utc>> {
        *self.last_rotated.read().await
    }

    /// Get token age in seconds since last rotation.
    pub async fn age_seconds(&self) -> u64 {
        if let Some(rotated) = self.last_rotated().await {
            let age = Utc::now() - rotated;
            age.num_seconds().max(0) as u64
        } else {
            0
        }
    }
}

impl<T: ExpiringToken + Clone + PartialEq> TokenCache<T> {
    /// Get the current token, if any.
    pub async fn get(&self) -> Option<T> {
        self.token.read().await.clone()
    }

    /// Access token string of the held token, or empty when none is held.
    pub async fn access_token(&self) -> String {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token().to_string())
            .unwrap_or_default()
    }

    /// Atomically swap the token and record rotation time.
    pub async fn swap(&self, new_token: T) {
        let mut token = self.token.write().await;
        if token.as_ref() != Some(&new_token) {
            *token = Some(new_token);
            drop(token);

            let mut last_rotated = self.last_rotated.write().await;
            *last_rotated = Some(Utc::now());
            debug!("Token rotated at {:?}", last_rotated);
        }
    }

    /// True when a non-empty access token is held, expired or not.
    pub async fn is_present(&self) -> bool {
        self.token
            .read()
            .await
            .as_ref()
            .is_some_and(|t| !t.access_token().is_empty())
    }

    /// True when no token is held or the held one is due for refresh.
    pub async fn needs_refresh(&self) -> bool {
        match self.token.read().await.as_ref() {
            Some(t) => t.needs_refresh_at(Utc::now()),
            None => true,
        }
    }
}

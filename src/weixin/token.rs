use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::WeixinApi;
use crate::model::{AccessToken, Credential};

/// A cached token is refreshed once it is this close to expiring.
pub const REFRESH_MARGIN_SECS: i64 = 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Lazily refreshed access token for one credential set.
pub struct TokenCache {
    clock: Arc<dyn Clock>,
    current: Option<AccessToken>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("expires_at", &self.current.as_ref().map(|t| t.expires_at))
            .finish_non_exhaustive()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            current: None,
        }
    }

    /// The cached token if it is still outside the refresh margin.
    pub fn cached(&self) -> Option<&str> {
        let now = self.clock.now();
        self.current
            .as_ref()
            .filter(|t| t.expires_at - now > Duration::seconds(REFRESH_MARGIN_SECS))
            .map(|t| t.token.as_str())
    }

    /// Return a usable token, exchanging credentials when the cached one is
    /// missing or about to expire. Failed exchanges are not cached.
    pub async fn ensure_token(
        &mut self,
        api: &dyn WeixinApi,
        credential: &Credential,
    ) -> Result<String> {
        if let Some(token) = self.cached() {
            return Ok(token.to_string());
        }

        let grant = match api
            .fetch_token(&credential.app_id, &credential.app_secret)
            .await
        {
            Ok(grant) => grant,
            Err(err) => {
                warn!(?err, app_id = %credential.app_id, "access token exchange failed");
                return Err(err).context("failed to obtain WeChat access token");
            }
        };

        let issued_at = self.clock.now();
        let Some(expires_at) = Duration::try_seconds(grant.expires_in)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
        else {
            warn!(
                app_id = %credential.app_id,
                expires_in = grant.expires_in,
                "token lifetime out of range"
            );
            bail!("access token expires_in out of range: {}", grant.expires_in);
        };
        info!(app_id = %credential.app_id, %expires_at, "refreshed access token");
        self.current = Some(AccessToken {
            token: grant.access_token.clone(),
            issued_at,
            expires_at,
        });
        Ok(grant.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Article, MediaHandle};
    use crate::weixin::{ImageUpload, TokenGrant};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, secs: i64) {
            let mut now = self.0.lock().unwrap();
            *now = *now + Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct TokenOnly {
        grants: Mutex<VecDeque<Result<TokenGrant>>>,
        calls: Mutex<usize>,
    }

    impl TokenOnly {
        fn with(grants: Vec<Result<TokenGrant>>) -> Self {
            Self {
                grants: Mutex::new(grants.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl WeixinApi for TokenOnly {
        async fn fetch_token(&self, _app_id: &str, _app_secret: &str) -> Result<TokenGrant> {
            *self.calls.lock().unwrap() += 1;
            self.grants
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted grant")))
        }
        async fn upload_image(&self, _: &str, _: ImageUpload) -> Result<MediaHandle> {
            unimplemented!()
        }
        async fn add_draft(&self, _: &str, _: &Article, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn submit_publish(&self, _: &str, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn publish_status(&self, _: &str, _: &str) -> Result<Option<String>> {
            unimplemented!()
        }
        async fn create_menu(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn upload_news(&self, _: &str, _: &Article, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn mass_send(&self, _: &str, _: &str) -> Result<()> {
            unimplemented!()
        }
    }

    fn grant(token: &str, expires_in: i64) -> Result<TokenGrant> {
        Ok(TokenGrant {
            access_token: token.into(),
            expires_in,
        })
    }

    fn credential() -> Credential {
        Credential {
            app_id: "wx-app".into(),
            app_secret: "secret".into(),
            author: "author".into(),
        }
    }

    fn start() -> Arc<ManualClock> {
        let t0 = DateTime::parse_from_rfc3339("2025-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Arc::new(ManualClock(Mutex::new(t0)))
    }

    #[tokio::test]
    async fn token_is_reused_until_refresh_margin() {
        let clock = start();
        let api = TokenOnly::with(vec![grant("T1", 7200), grant("T2", 7200)]);
        let mut cache = TokenCache::new(clock.clone());

        assert_eq!(cache.ensure_token(&api, &credential()).await.unwrap(), "T1");
        assert_eq!(api.calls(), 1);

        clock.advance(7200 - 120);
        assert_eq!(cache.ensure_token(&api, &credential()).await.unwrap(), "T1");
        assert_eq!(api.calls(), 1);

        clock.advance(90);
        assert_eq!(cache.ensure_token(&api, &credential()).await.unwrap(), "T2");
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn failed_exchange_is_not_cached() {
        let clock = start();
        let api = TokenOnly::with(vec![Err(anyhow!("errcode 40013")), grant("T1", 7200)]);
        let mut cache = TokenCache::new(clock);

        assert!(cache.ensure_token(&api, &credential()).await.is_err());
        assert!(cache.cached().is_none());

        assert_eq!(cache.ensure_token(&api, &credential()).await.unwrap(), "T1");
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn short_lived_token_is_refreshed_every_time() {
        let clock = start();
        let api = TokenOnly::with(vec![grant("T1", 30), grant("T2", 30)]);
        let mut cache = TokenCache::new(clock);

        assert_eq!(cache.ensure_token(&api, &credential()).await.unwrap(), "T1");
        assert_eq!(cache.ensure_token(&api, &credential()).await.unwrap(), "T2");
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn out_of_range_lifetime_is_a_failed_exchange() {
        let clock = start();
        let api = TokenOnly::with(vec![grant("HUGE", i64::MAX), grant("T1", 7200)]);
        let mut cache = TokenCache::new(clock);

        let err = cache.ensure_token(&api, &credential()).await.unwrap_err();
        assert!(err.to_string().contains("expires_in out of range"));
        assert!(cache.cached().is_none());

        assert_eq!(cache.ensure_token(&api, &credential()).await.unwrap(), "T1");
        assert_eq!(api.calls(), 2);
    }
}

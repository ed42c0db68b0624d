//! Cookie jar backend with month-end expiry.

use super::FlagBackend;
use crate::clock::Clock;
use crate::error::BackendError;
use crate::types::{BackendKind, FlagKey, UsageFlag};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use trial_identity::Fingerprint;

/// `expires=` attribute format (RFC 7231 IMF-fixdate).
const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A single cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: DateTime<Utc>,
    pub path: String,
}

impl Cookie {
    /// The usage-flag cookie: `freetrial_used_<fp>=true`, expiring with the flag.
    pub fn for_flag(flag: &UsageFlag) -> Self {
        Self {
            name: flag.key.as_str().to_string(),
            value: "true".into(),
            expires: flag.expires_at,
            path: "/".into(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_set_cookie(&self) -> String {
        format!(
            "{}={}; expires={}; path={}; SameSite=Strict",
            self.name,
            self.value,
            self.expires.format(EXPIRES_FORMAT),
            self.path
        )
    }

    /// Parse a `Set-Cookie` header value. Only `expires` and `path` are kept.
    pub fn parse(header: &str) -> Result<Self, BackendError> {
        let mut parts = header.split(';').map(str::trim);

        let (name, value) = parts
            .next()
            .and_then(|pair| pair.split_once('='))
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| BackendError::Invalid(format!("cookie pair missing: {header}")))?;

        let mut expires = None;
        let mut path = "/".to_string();

        for attr in parts {
            let (attr_name, attr_value) = attr.split_once('=').unwrap_or((attr, ""));
            match attr_name.to_ascii_lowercase().as_str() {
                "expires" => {
                    let parsed = NaiveDateTime::parse_from_str(attr_value, EXPIRES_FORMAT)
                        .map_err(|e| BackendError::Invalid(format!("bad expires: {e}")))?;
                    expires = Some(parsed.and_utc());
                }
                "path" => path = attr_value.to_string(),
                _ => {}
            }
        }

        let expires =
            expires.ok_or_else(|| BackendError::Invalid("session cookies are not supported".into()))?;

        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
            expires,
            path,
        })
    }
}

/// Cookie jar holding usage-flag cookies.
///
/// Expired cookies read as absent, so a flag stored here lapses at the end of
/// the month in which it was written.
#[derive(Debug, Clone)]
pub struct CookieBackend {
    jar: Arc<RwLock<HashMap<String, Cookie>>>,
    clock: Arc<dyn Clock>,
}

impl CookieBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jar: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Live cookies rendered as a `Cookie` request header value.
    pub async fn cookie_header(&self) -> String {
        let now = self.clock.now();
        let jar = self.jar.read().await;

        let mut pairs: Vec<String> = jar
            .values()
            .filter(|c| !c.is_expired(now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        pairs.sort();
        pairs.join("; ")
    }

    pub async fn get(&self, name: &str) -> Option<Cookie> {
        let now = self.clock.now();
        self.jar
            .read()
            .await
            .get(name)
            .filter(|c| !c.is_expired(now))
            .cloned()
    }

    /// Drop every cookie.
    pub async fn clear(&self) {
        self.jar.write().await.clear();
    }
}

#[async_trait]
impl FlagBackend for CookieBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }

    async fn set_flag(&self, flag: &UsageFlag) -> Result<(), BackendError> {
        let cookie = Cookie::for_flag(flag);
        debug!(cookie = %cookie.to_set_cookie(), "Setting usage cookie");
        self.jar.write().await.insert(cookie.name.clone(), cookie);
        Ok(())
    }

    async fn has_flag(&self, fingerprint: &Fingerprint) -> Result<bool, BackendError> {
        let key = FlagKey::for_fingerprint(fingerprint);
        Ok(self.get(key.as_str()).await.is_some())
    }
}

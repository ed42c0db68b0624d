//! Email canonicalization and validation.

use crate::fingerprint::{Digester, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Domain whose local part ignores dots and `+tag` suffixes.
const DOT_INSENSITIVE_DOMAIN: &str = "gmail.com";

/// Built-in throwaway mailbox providers.
pub const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "10minutemail.com",
    "guerrillamail.com",
    "guerrillamail.net",
    "sharklasers.com",
    "tempmail.com",
    "temp-mail.org",
    "throwawaymail.com",
    "yopmail.com",
    "trashmail.com",
    "getnada.com",
    "dispostable.com",
    "maildrop.cc",
    "fakeinbox.com",
    "mailnesia.com",
    "mintemail.com",
    "mohmal.com",
    "emailondeck.com",
];

/// Result of checking an email typed into the trial form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailValidation {
    Valid,
    InvalidFormat,
    DisposableDomain,
}

impl EmailValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, EmailValidation::Valid)
    }

    /// Stable reason code used in blocked outcomes.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailValidation::Valid => "valid",
            EmailValidation::InvalidFormat => "invalid-format",
            EmailValidation::DisposableDomain => "disposable-domain",
        }
    }
}

/// Canonicalize an email address.
///
/// Lowercases the whole address. For `gmail.com` only, all dots are removed
/// from the local part and everything from the first `+` is dropped.
pub fn normalize(email: &str) -> String {
    let lowered = email.trim().to_lowercase();

    let Some((local, domain)) = lowered.rsplit_once('@') else {
        return lowered;
    };

    if domain != DOT_INSENSITIVE_DOMAIN {
        return lowered;
    }

    let local = local.split('+').next().unwrap_or_default().replace('.', "");
    format!("{}@{}", local, domain)
}

/// Format and domain rules applied to submitted emails, plus the digest
/// used to turn an accepted email into its storage fingerprint.
#[derive(Debug, Clone)]
pub struct EmailPolicy {
    disposable: HashSet<String>,
    digester: Digester,
}

impl EmailPolicy {
    /// Policy with the built-in disposable list plus `extra_domains`.
    pub fn new<I, S>(extra_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut disposable: HashSet<String> =
            DISPOSABLE_DOMAINS.iter().map(|d| d.to_string()).collect();
        disposable.extend(
            extra_domains
                .into_iter()
                .map(|d| d.as_ref().trim().to_lowercase())
                .filter(|d| !d.is_empty()),
        );

        Self {
            disposable,
            digester: Digester::default(),
        }
    }

    pub fn with_digester(mut self, digester: Digester) -> Self {
        self.digester = digester;
        self
    }

    pub fn digester(&self) -> Digester {
        self.digester
    }

    /// Canonicalize `email` and fingerprint it with this policy's digester.
    pub fn identify(&self, email: &str) -> Fingerprint {
        self.digester.fingerprint(&normalize(email))
    }

    /// Validate an email: format first, then the disposable-domain list.
    pub fn validate(&self, email: &str) -> EmailValidation {
        let email = email.trim();

        if !is_well_formed(email) {
            debug!("Rejected malformed email");
            return EmailValidation::InvalidFormat;
        }

        let domain = email
            .rsplit_once('@')
            .map(|(_, d)| d.to_lowercase())
            .unwrap_or_default();

        if self.is_disposable(&domain) {
            debug!(domain = %domain, "Rejected disposable domain");
            return EmailValidation::DisposableDomain;
        }

        EmailValidation::Valid
    }

    /// True for a listed domain or any subdomain of one.
    pub fn is_disposable(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        if self.disposable.contains(&domain) {
            return true;
        }
        domain
            .match_indices('.')
            .any(|(i, _)| self.disposable.contains(&domain[i + 1..]))
    }
}

impl Default for EmailPolicy {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

fn is_well_formed(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return false;
    }

    if local
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == ',')
    {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    let tld = labels.last().copied().unwrap_or_default();
    labels_ok && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

//! IP geolocation lookup used by the legacy detector.

use crate::config::GeolocationConfig;
use crate::error::ProbeError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Organisation name fragments of datacenter and VPN hosting providers.
const HOSTING_ORGS: &[&str] = &[
    "amazon",
    "aws",
    "google cloud",
    "microsoft azure",
    "digitalocean",
    "linode",
    "akamai",
    "ovh",
    "hetzner",
    "vultr",
    "choopa",
    "m247",
    "leaseweb",
    "contabo",
    "scaleway",
    "oracle cloud",
    "datacamp",
];

const HOSTING_ASNS: &[&str] = &[
    "AS16509", "AS14618", "AS396982", "AS8075", "AS14061", "AS63949", "AS16276", "AS24940",
    "AS20473", "AS9009", "AS60781", "AS51167", "AS12876", "AS31898", "AS60068",
];

/// Subset of the lookup response the detector reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoInfo {
    pub timezone: Option<String>,
    pub org: Option<String>,
    pub asn: Option<String>,
    pub country_code: Option<String>,
}

impl GeoInfo {
    /// Whether the egress network belongs to a known hosting provider.
    pub fn is_hosting_provider(&self) -> bool {
        let org_hit = self.org.as_deref().is_some_and(|org| {
            let words = padded_words(org);
            HOSTING_ORGS
                .iter()
                .any(|h| words.contains(&format!(" {} ", h)))
        });
        let asn_hit = self
            .asn
            .as_deref()
            .is_some_and(|asn| HOSTING_ASNS.iter().any(|h| h.eq_ignore_ascii_case(asn.trim())));

        org_hit || asn_hit
    }
}

/// Lowercase alphanumeric words joined by single spaces, padded at both ends
/// so fragments only match whole words.
fn padded_words(text: &str) -> String {
    let mut padded = String::from(" ");
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        padded.push_str(word);
        padded.push(' ');
    }
    padded
}

/// JSON geolocation endpoint client.
#[derive(Clone)]
pub struct GeolocationClient {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl GeolocationClient {
    pub fn new(config: &GeolocationConfig) -> Result<Self, ProbeError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            retry: config.retry,
        })
    }

    /// Look up the caller's egress address.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn lookup(&self) -> Result<GeoInfo, ProbeError> {
        let info = retry_with_backoff(&self.retry, || self.fetch()).await?;
        debug!(?info, "Geolocation resolved");
        Ok(info)
    }

    async fn fetch(&self) -> Result<GeoInfo, ProbeError> {
        let info = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<GeoInfo>()
            .await?;
        Ok(info)
    }
}

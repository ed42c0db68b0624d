//! Client-side execution environment heuristics.

use super::Probe;
use crate::error::ProbeError;
use crate::types::{ClientEnvironment, ScreenSize, SignalChannel, SignalReading};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

const VPN_USER_AGENT: u32 = 30;
const AUTOMATION: u32 = 25;
const TIMEZONE_MISMATCH: u32 = 20;
const VM_SCREEN: u32 = 15;

/// Page globals injected by common automation frameworks.
pub const AUTOMATION_GLOBALS: &[&str] = &[
    "_phantom",
    "callPhantom",
    "__nightmare",
    "_selenium",
    "__webdriver_evaluate",
    "__selenium_unwrapped",
    "__driver_evaluate",
    "domAutomation",
    "domAutomationController",
];

const MOBILE_MARKERS: &[&str] = &["mobile", "android", "iphone", "ipad"];

/// Expected IANA zone prefixes per primary language subtag.
const LANGUAGE_ZONES: &[(&str, &[&str])] = &[
    ("en", &["America/", "Europe/London", "Europe/Dublin", "Australia/", "Pacific/Auckland", "Asia/Singapore", "Asia/Kolkata"]),
    ("de", &["Europe/Berlin", "Europe/Vienna", "Europe/Zurich", "Europe/Busingen"]),
    ("fr", &["Europe/Paris", "Europe/Brussels", "Europe/Zurich", "Europe/Luxembourg", "America/Montreal", "America/Toronto", "Africa/"]),
    ("es", &["Europe/Madrid", "America/", "Atlantic/Canary"]),
    ("it", &["Europe/Rome", "Europe/Zurich"]),
    ("pt", &["Europe/Lisbon", "America/Sao_Paulo", "America/", "Africa/"]),
    ("nl", &["Europe/Amsterdam", "Europe/Brussels"]),
    ("ru", &["Europe/Moscow", "Asia/", "Europe/Minsk"]),
    ("ja", &["Asia/Tokyo"]),
    ("ko", &["Asia/Seoul"]),
    ("zh", &["Asia/Shanghai", "Asia/Hong_Kong", "Asia/Taipei", "Asia/Singapore"]),
];

/// Scores what the page can observe about its own environment.
#[derive(Debug, Clone)]
pub struct ClientSignalProbe {
    environment: ClientEnvironment,
}

impl ClientSignalProbe {
    pub fn new(environment: ClientEnvironment) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> &ClientEnvironment {
        &self.environment
    }

    /// Run every check. Synchronous and infallible.
    pub fn evaluate(&self) -> SignalReading {
        let env = &self.environment;
        let mut score = 0;
        let mut reasons = Vec::new();

        if has_vpn_token(&env.user_agent) {
            score += VPN_USER_AGENT;
            reasons.push("vpn_user_agent");
        }
        if is_automated(env) {
            score += AUTOMATION;
            reasons.push("automation");
        }
        if let (Some(language), Some(timezone)) = (&env.language, &env.timezone) {
            if timezone_mismatch(language, timezone) {
                score += TIMEZONE_MISMATCH;
                reasons.push("timezone_mismatch");
            }
        }
        if env.screen.is_some_and(is_vm_screen) {
            score += VM_SCREEN;
            reasons.push("vm_screen");
        }

        let reason = if reasons.is_empty() {
            "normal".to_string()
        } else {
            reasons.join(",")
        };

        SignalReading::new(
            SignalChannel::ClientHeuristics,
            score,
            reason,
            json!({
                "reasons": reasons,
                "timezone": env.timezone,
                "language": env.language,
                "plugin_count": env.plugin_count,
            }),
        )
    }
}

#[async_trait]
impl Probe for ClientSignalProbe {
    fn channel(&self) -> SignalChannel {
        SignalChannel::ClientHeuristics
    }

    async fn probe(&self) -> Result<SignalReading, ProbeError> {
        let reading = self.evaluate();
        debug!(score = reading.score, reason = %reading.reason, "Client signal probe finished");
        Ok(reading)
    }
}

fn has_vpn_token(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    if ua.contains("vpn") || ua.contains("proxy") {
        return true;
    }
    ua.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == "tor")
}

fn is_mobile(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    MOBILE_MARKERS.iter().any(|m| ua.contains(m))
}

fn is_automated(env: &ClientEnvironment) -> bool {
    env.webdriver
        || env.document_webdriver_attribute
        || env
            .globals
            .iter()
            .any(|g| AUTOMATION_GLOBALS.contains(&g.as_str()))
        || (env.plugin_count == 0 && !is_mobile(&env.user_agent))
}

fn timezone_mismatch(language: &str, timezone: &str) -> bool {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match LANGUAGE_ZONES.iter().find(|(code, _)| *code == primary) {
        Some((_, zones)) => !zones.iter().any(|zone| timezone.starts_with(zone)),
        None => false,
    }
}

fn is_vm_screen(screen: ScreenSize) -> bool {
    let ScreenSize { width, height } = screen;
    if (width, height) == (800, 600) || (width, height) == (1024, 768) {
        return true;
    }
    let (width, height) = (u64::from(width), u64::from(height));
    // exact 5:4 and 8:5
    height > 0 && (width * 4 == height * 5 || width * 5 == height * 8)
}

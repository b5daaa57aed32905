use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LANG: &str = "en";
pub const HOBO_ENDPOINT: &str = "https://webservice.hobolink.com";

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

fn default_hobo_endpoint() -> String {
    HOBO_ENDPOINT.to_string()
}

/// Tuya data centres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuyaRegion {
    China,
    America,
    AmericaEast,
    Europe,
    EuropeWest,
    India,
}

impl TuyaRegion {
    pub fn endpoint(self) -> &'static str {
        match self {
            TuyaRegion::China => "https://openapi.tuyacn.com",
            TuyaRegion::America => "https://openapi.tuyaus.com",
            TuyaRegion::AmericaEast => "https://openapi-ueaz.tuyaus.com",
            TuyaRegion::Europe => "https://openapi.tuyaeu.com",
            TuyaRegion::EuropeWest => "https://openapi-weaz.tuyaeu.com",
            TuyaRegion::India => "https://openapi.tuyain.com",
        }
    }
}

impl FromStr for TuyaRegion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cn" | "china" => Ok(TuyaRegion::China),
            "us" | "america" => Ok(TuyaRegion::America),
            "ueaz" | "us-east" | "america_east" => Ok(TuyaRegion::AmericaEast),
            "eu" | "europe" => Ok(TuyaRegion::Europe),
            "weaz" | "eu-west" | "europe_west" => Ok(TuyaRegion::EuropeWest),
            "in" | "india" => Ok(TuyaRegion::India),
            other => bail!("unknown Tuya region: {other}"),
        }
    }
}

/// Credentials and endpoint for the Tuya OpenAPI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuyaConfig {
    pub endpoint: String,
    pub access_id: String,
    pub access_secret: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Send and sign a random `nonce` header with every request.
    #[serde(default)]
    pub sign_nonce: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl TuyaConfig {
    pub fn new(
        endpoint: impl Into<String>,
        access_id: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_id: access_id.into(),
            access_secret: access_secret.into(),
            lang: default_lang(),
            sign_nonce: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn for_region(
        region: TuyaRegion,
        access_id: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        Self::new(region.endpoint(), access_id, access_secret)
    }

    /// Build from environment variables.
    ///
    /// - `TUYA_ENDPOINT` or `TUYA_REGION` (e.g. `us`, `eu`, `cn`)
    /// - `TUYA_ACCESS_ID`, `TUYA_ACCESS_SECRET`
    /// - `TUYA_LANG` (optional)
    ///
    /// Returns `Ok(None)` when the credentials are not set.
    pub fn from_env() -> Result<Option<Self>> {
        let access_id = std::env::var("TUYA_ACCESS_ID").ok();
        let access_secret = std::env::var("TUYA_ACCESS_SECRET").ok();

        let endpoint = match (
            std::env::var("TUYA_ENDPOINT").ok(),
            std::env::var("TUYA_REGION").ok(),
        ) {
            (Some(endpoint), _) => Some(endpoint),
            (None, Some(region)) => Some(region.parse::<TuyaRegion>()?.endpoint().to_string()),
            (None, None) => None,
        };

        match (endpoint, access_id, access_secret) {
            (Some(endpoint), Some(id), Some(secret)) => {
                let mut cfg = Self::new(endpoint, id, secret);
                if let Ok(lang) = std::env::var("TUYA_LANG") {
                    cfg.lang = lang;
                }
                Ok(Some(cfg))
            }
            _ => {
                debug!("Tuya not configured (missing TUYA_ENDPOINT/TUYA_REGION, TUYA_ACCESS_ID, or TUYA_ACCESS_SECRET)");
                Ok(None)
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Credentials for HOBOlink web services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoboConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_id: String,
    #[serde(default = "default_hobo_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HoboConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_id: impl ToString,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_id: user_id.to_string(),
            endpoint: default_hobo_endpoint(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Build from `HOBO_CLIENT_ID`, `HOBO_CLIENT_SECRET`, `HOBO_USER_ID` and
    /// optionally `HOBO_ENDPOINT`. Returns `Ok(None)` when credentials are missing.
    pub fn from_env() -> Result<Option<Self>> {
        let client_id = std::env::var("HOBO_CLIENT_ID").ok();
        let client_secret = std::env::var("HOBO_CLIENT_SECRET").ok();
        let user_id = std::env::var("HOBO_USER_ID").ok();

        match (client_id, client_secret, user_id) {
            (Some(id), Some(secret), Some(user)) => {
                let mut cfg = Self::new(id, secret, user);
                if let Ok(endpoint) = std::env::var("HOBO_ENDPOINT") {
                    cfg.endpoint = endpoint;
                }
                Ok(Some(cfg))
            }
            _ => {
                debug!("HOBO not configured (missing HOBO_CLIENT_ID, HOBO_CLIENT_SECRET, or HOBO_USER_ID)");
                Ok(None)
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// File-level configuration: both services plus named devices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub tuya: Option<TuyaConfig>,
    pub hobo: Option<HoboConfig>,
    /// Friendly device name -> Tuya device id.
    #[serde(default)]
    pub devices: BTreeMap<String, String>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let mut cfg: serde_json::Value = serde_json::from_str(&raw).context("parsing JSON")?;

        // `region` may stand in for an explicit endpoint.
        if let Some(tuya) = cfg.get_mut("tuya").and_then(|v| v.as_object_mut()) {
            if !tuya.contains_key("endpoint") {
                let region = tuya
                    .get("region")
                    .and_then(|v| v.as_str())
                    .context("tuya section needs `endpoint` or `region`")?;
                let endpoint = region.parse::<TuyaRegion>()?.endpoint();
                tuya.insert("endpoint".into(), endpoint.into());
            }
        }

        serde_json::from_value(cfg).context("mapping to Config")
    }
}

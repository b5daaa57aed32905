use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::{debug, error, warn};

use crate::config::HoboConfig;
use crate::error::ResponseError;
use crate::security::token_cache::{ExpiringToken, TokenCache};
use crate::utils::redact::redact;

pub const HOBO_GET_TOKEN_API: &str = "/ws/auth/token";
/// Format required for `start_date_time` / `end_date_time`.
pub const HOBO_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEFAULT_EXPIRES_IN: i64 = 600;

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
}

/// OAuth2 client-credentials token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoboTokenInfo {
    pub access_token: String,
    pub token_type: String,
    pub expire_time: DateTime<Utc>,
}

impl HoboTokenInfo {
    /// Decode a token response; expiry counts from the local clock.
    pub fn from_response(response: &Value) -> Result<Self> {
        let token = TokenResponse::deserialize(response).context("parsing HOBO token response")?;
        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        Ok(Self {
            access_token: token.access_token,
            token_type: token.token_type,
            expire_time: Utc::now() + Duration::seconds(expires_in),
        })
    }
}

impl ExpiringToken for HoboTokenInfo {
    fn access_token(&self) -> &str {
        &self.access_token
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expire_time
    }
}

/// Form-encoded request parameters or body.
pub type Params = BTreeMap<String, String>;

/// HOBOlink web services client.
#[derive(Debug, Clone)]
pub struct HoboApi {
    endpoint: String,
    client_id: String,
    client_secret: String,
    user_id: String,
    tokens: TokenCache<HoboTokenInfo>,
    http_client: Client,
}

impl HoboApi {
    pub fn new(config: HoboConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("creating HTTP client")?;

        debug!("HOBO client initialized with endpoint={}", config.endpoint);

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client_id: config.client_id,
            client_secret: config.client_secret,
            user_id: config.user_id,
            tokens: TokenCache::new(),
            http_client,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn token_info(&self) -> Option<HoboTokenInfo> {
        self.tokens.get().await
    }

    /// Fetch a new token regardless of the cached one.
    pub async fn connect(&self) -> Result<()> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let url = format!("{}{}", self.endpoint, HOBO_GET_TOKEN_API);

        debug!(url = %url, "Getting new HOBO token");

        let response = self
            .http_client
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("sending HOBO token request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status_code = status.as_u16(), body = %body, "Response error");
            return Err(ResponseError::new(status.as_u16(), body).into());
        }

        let value: Value = response.json().await.context("parsing HOBO token response")?;
        self.tokens.swap(HoboTokenInfo::from_response(&value)?).await;
        Ok(())
    }

    async fn connect_if_needed(&self) -> Result<()> {
        if self.tokens.needs_refresh().await {
            self.connect().await?;
        }
        Ok(())
    }

    pub async fn get(&self, path: &str, params: &Params) -> Result<Value> {
        self.request(Method::GET, path, params, &Params::new(), true).await
    }

    pub async fn post(&self, path: &str, body: &Params) -> Result<Value> {
        self.request(Method::POST, path, &Params::new(), body, true).await
    }

    /// Send a request with the bearer token, decoding the JSON body.
    ///
    /// A 401 drops the token and retries once with a new one; any other
    /// non-2xx status is a [`ResponseError`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &Params,
        body: &Params,
        auth_required: bool,
    ) -> Result<Value> {
        if auth_required {
            self.connect_if_needed().await?;
        }

        let (status, text) = self.send_once(&method, path, params, body).await?;
        let (status, text) = if status == StatusCode::UNAUTHORIZED && auth_required {
            warn!(path = %path, "HOBO token rejected, fetching a new one");
            self.tokens.clear().await;
            self.connect().await?;
            self.send_once(&method, path, params, body).await?
        } else {
            (status, text)
        };

        if !status.is_success() {
            error!(status_code = status.as_u16(), body = %text, "Response error");
            return Err(ResponseError::new(status.as_u16(), text).into());
        }

        let result: Value = serde_json::from_str(&text).context("parsing HOBO response")?;
        debug!(response = %redact(&result), "Response");
        Ok(result)
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        params: &Params,
        body: &Params,
    ) -> Result<(StatusCode, String)> {
        let url = format!("{}{}", self.endpoint, path);
        debug!(method = %method, url = %url, params = ?params, "Request");

        let mut builder = self.http_client.request(method.clone(), &url);
        if let Some(token) = self.tokens.get().await {
            builder = builder.bearer_auth(&token.access_token);
        }
        if !params.is_empty() {
            builder = builder.query(params);
        }
        if !body.is_empty() {
            builder = builder.form(body);
        }

        let response = builder.send().await.context("sending HOBO request")?;
        let status = response.status();
        let text = response.text().await.context("reading HOBO response body")?;
        Ok((status, text))
    }

    /// Logger readings between two instants.
    ///
    /// `loggers` are device serial numbers; a single pre-joined
    /// comma-separated string works as well.
    pub async fn get_data<I, S>(
        &self,
        loggers: I,
        start_date_time: NaiveDateTime,
        end_date_time: NaiveDateTime,
        warn_on_empty_data: bool,
    ) -> Result<Value>
    where
        I: IntoIterator<Item = S>,
        S: Display,
    {
        let logger_list = loggers
            .into_iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut params = Params::new();
        params.insert("loggers".into(), logger_list);
        params.insert(
            "start_date_time".into(),
            start_date_time.format(HOBO_DATE_FORMAT).to_string(),
        );
        params.insert(
            "end_date_time".into(),
            end_date_time.format(HOBO_DATE_FORMAT).to_string(),
        );

        let path = format!("/ws/data/file/JSON/user/{}", self.user_id);
        let response = self.get(&path, &params).await?;

        let empty = response
            .get("observation_list")
            .map_or(true, |list| list.is_null() || list.as_array().is_some_and(|a| a.is_empty()));
        if warn_on_empty_data && empty {
            warn!(params = ?params, "The data seems to be empty");
        }

        Ok(response)
    }
}

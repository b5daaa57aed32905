use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TuyaConfig;
use crate::error::ResponseError;
use crate::security::request_signer::{encode_body, string_to_sign, Query, SigningKey, SIGN_METHOD};
use crate::security::token_cache::{ExpiringToken, TokenCache};
use crate::utils::redact::{redact, redact_path, redact_text};

pub const TUYA_ERROR_CODE_TOKEN_INVALID: i64 = 1010;
pub const GET_TOKEN_API: &str = "/v1.0/token";
pub const REFRESH_TOKEN_API: &str = "/v1.0/token/";

#[derive(Debug, Deserialize, Default)]
struct TokenEnvelope {
    #[serde(default)]
    t: i64,
    #[serde(default)]
    result: Option<TokenResult>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenResult {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    uid: String,
    expire: Option<i64>,
    expire_time: Option<i64>,
}

/// Token issued by the Tuya token endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuyaTokenInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub uid: String,
    /// Epoch milliseconds.
    pub expire_time: i64,
}

impl TuyaTokenInfo {
    /// Decode a `/v1.0/token` response: `expire_time = t + expire * 1000`.
    pub fn from_response(response: &Value) -> Result<Self> {
        let envelope = TokenEnvelope::deserialize(response).context("parsing Tuya token response")?;
        let result = envelope.result.unwrap_or_default();
        let expire_secs = result.expire.or(result.expire_time).unwrap_or(0);

        Ok(Self {
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            uid: result.uid,
            expire_time: envelope.t + expire_secs * 1000,
        })
    }
}

impl ExpiringToken for TuyaTokenInfo {
    fn access_token(&self) -> &str {
        &self.access_token
    }

    fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.expire_time).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Token endpoints are signed without an access token and never trigger a refresh.
pub fn is_token_path(path: &str) -> bool {
    path.starts_with(GET_TOKEN_API)
}

struct ApiRequest<'a> {
    method: Method,
    path: &'a str,
    query: &'a Query,
    body: Option<&'a Value>,
}

enum Outcome {
    Success(Value),
    Failure { status: u16, text: String },
}

/// Signed client for the Tuya OpenAPI.
///
/// Cheap to clone; clones share the HTTP connection pool and the token.
/// Token rotation is not single-flight: clones that hit an expired or
/// rejected token at the same time may each reconnect, and the last token
/// swapped in wins.
#[derive(Debug, Clone)]
pub struct TuyaOpenApi {
    endpoint: String,
    access_id: String,
    access_secret: String,
    lang: String,
    sign_nonce: bool,
    tokens: TokenCache<TuyaTokenInfo>,
    http_client: Client,
}

impl TuyaOpenApi {
    /// Build the client. No request is made until the first call; the token
    /// is obtained lazily (or eagerly via [`TuyaOpenApi::connect`]).
    pub fn new(config: TuyaConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("creating HTTP client")?;

        debug!("Tuya client initialized with endpoint={}", config.endpoint);

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_id: config.access_id,
            access_secret: config.access_secret,
            lang: config.lang,
            sign_nonce: config.sign_nonce,
            tokens: TokenCache::new(),
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Obtain a fresh token (`GET /v1.0/token?grant_type=1`) and cache it.
    ///
    /// Returns the raw token response.
    pub async fn connect(&self) -> Result<Value> {
        let mut query = Query::new();
        query.insert("grant_type".into(), "1".into());
        let request = ApiRequest {
            method: Method::GET,
            path: GET_TOKEN_API,
            query: &query,
            body: None,
        };

        let response = self.exchange_token(&request).await?;
        let token = TuyaTokenInfo::from_response(&response)?;
        self.tokens.swap(token).await;
        info!(endpoint = %self.endpoint, "Connected to Tuya cloud");
        Ok(response)
    }

    /// Whether an access token is held. True even when it has expired;
    /// refreshing is handled internally.
    pub async fn is_connected(&self) -> bool {
        self.tokens.is_present().await
    }

    pub async fn token_info(&self) -> Option<TuyaTokenInfo> {
        self.tokens.get().await
    }

    pub async fn get(&self, path: &str, params: &Query) -> Result<Value> {
        self.request(Method::GET, path, params, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request(Method::POST, path, &Query::new(), body).await
    }

    pub async fn put(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request(Method::PUT, path, &Query::new(), body).await
    }

    pub async fn delete(&self, path: &str, params: &Query) -> Result<Value> {
        self.request(Method::DELETE, path, params, None).await
    }

    /// Sign and send a request, returning the decoded JSON body.
    ///
    /// A response fails when the HTTP status is not 2xx, the body is not JSON,
    /// or `success` is not `true`. The first failure drops the token,
    /// reconnects and retries once; a second failure is returned as
    /// [`ResponseError`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &Query,
        body: Option<&Value>,
    ) -> Result<Value> {
        let request = ApiRequest {
            method,
            path,
            query: params,
            body,
        };

        if is_token_path(path) {
            return self.exchange_token(&request).await;
        }

        self.refresh_access_token_if_needed().await?;

        let (status, text) = match self.send_once(&request, true).await? {
            Outcome::Success(value) => return Ok(value),
            Outcome::Failure { status, text } => (status, text),
        };

        let code = failure_code(&text);
        if code == Some(TUYA_ERROR_CODE_TOKEN_INVALID) {
            warn!(path = %path, "Access token rejected, reconnecting");
        } else {
            warn!(
                status_code = status,
                code = ?code,
                body = %redact_text(&text),
                path = %path,
                "Response error, trying to reconnect"
            );
        }
        self.tokens.clear().await;
        self.connect().await?;

        let outcome = self.send_once(&request, true).await?;
        finish(outcome, path)
    }

    async fn refresh_access_token_if_needed(&self) -> Result<()> {
        let Some(current) = self.tokens.get().await else {
            self.connect().await?;
            return Ok(());
        };

        if !current.needs_refresh_at(Utc::now()) {
            return Ok(());
        }

        if current.refresh_token.is_empty() {
            self.connect().await?;
            return Ok(());
        }

        let path = format!("{}{}", REFRESH_TOKEN_API, current.refresh_token);
        let query = Query::new();
        let request = ApiRequest {
            method: Method::GET,
            path: &path,
            query: &query,
            body: None,
        };

        debug!("Refreshing Tuya access token");
        match self.exchange_token(&request).await {
            Ok(response) => {
                let token = TuyaTokenInfo::from_response(&response)?;
                self.tokens.swap(token).await;
                Ok(())
            }
            Err(err) => {
                let reason = redact_path(&err.to_string(), REFRESH_TOKEN_API);
                warn!(error = %reason, "Token refresh failed, reconnecting");
                self.connect().await?;
                Ok(())
            }
        }
    }

    /// Call a token endpoint: signed without an access token, retried once.
    ///
    /// The cached token stays in place until the new one is swapped in.
    async fn exchange_token(&self, request: &ApiRequest<'_>) -> Result<Value> {
        let (status, text) = match self.send_once(request, false).await? {
            Outcome::Success(value) => return Ok(value),
            Outcome::Failure { status, text } => (status, text),
        };

        warn!(
            status_code = status,
            body = %redact_text(&text),
            path = %redact_path(request.path, REFRESH_TOKEN_API),
            "Token request failed, retrying"
        );

        let outcome = self.send_once(request, false).await?;
        finish(outcome, request.path)
    }

    fn build_signed_headers(
        &self,
        access_token: &str,
        sign: &str,
        t: i64,
        nonce: &str,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("client_id", HeaderValue::from_str(&self.access_id)?);
        headers.insert("sign", HeaderValue::from_str(sign)?);
        headers.insert("sign_method", HeaderValue::from_static(SIGN_METHOD));
        headers.insert("access_token", HeaderValue::from_str(access_token)?);
        headers.insert("t", HeaderValue::from_str(&t.to_string())?);
        headers.insert("lang", HeaderValue::from_str(&self.lang)?);
        if !nonce.is_empty() {
            headers.insert("nonce", HeaderValue::from_str(nonce)?);
        }
        Ok(headers)
    }

    /// One signed exchange. Token endpoints pass `authenticated = false` and
    /// are signed with an empty access token.
    async fn send_once(&self, request: &ApiRequest<'_>, authenticated: bool) -> Result<Outcome> {
        let body = encode_body(request.body)?;
        let access_token = if authenticated {
            self.tokens.access_token().await
        } else {
            String::new()
        };
        let t = Utc::now().timestamp_millis();
        let nonce = if self.sign_nonce {
            Uuid::new_v4().simple().to_string()
        } else {
            String::new()
        };

        let key = SigningKey {
            access_id: &self.access_id,
            access_secret: &self.access_secret,
        };
        let canonical = string_to_sign(request.method.as_str(), request.path, request.query, &body);
        let sign = key.sign(&access_token, t, &nonce, &canonical);
        let headers = self.build_signed_headers(&access_token, &sign, t, &nonce)?;

        let url = format!("{}{}", self.endpoint, request.path);
        let logged_body = request.body.map(redact).unwrap_or_default();
        debug!(
            method = %request.method,
            url = %redact_path(&url, REFRESH_TOKEN_API),
            params = ?request.query,
            body = %logged_body,
            t,
            "Request"
        );

        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }
        if !body.is_empty() {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = builder.send().await.context("sending Tuya request")?;
        let status = response.status();
        let text = response.text().await.context("reading Tuya response body")?;

        // Tuya answers 200 OK for most errors and reports them via `success`.
        match serde_json::from_str::<Value>(&text) {
            Ok(value)
                if status.is_success()
                    && value.get("success").and_then(Value::as_bool) == Some(true) =>
            {
                debug!(response = %redact(&value), "Response");
                Ok(Outcome::Success(value))
            }
            _ => Ok(Outcome::Failure {
                status: status.as_u16(),
                text,
            }),
        }
    }
}

/// Tuya's numeric error `code` from a failure body, when present.
fn failure_code(text: &str) -> Option<i64> {
    serde_json::from_str::<Value>(text)
        .ok()?
        .get("code")
        .and_then(Value::as_i64)
}

fn finish(outcome: Outcome, path: &str) -> Result<Value> {
    match outcome {
        Outcome::Success(value) => Ok(value),
        Outcome::Failure { status, text } => {
            error!(
                status_code = status,
                body = %redact_text(&text),
                path = %redact_path(path, REFRESH_TOKEN_API),
                "Response error"
            );
            Err(ResponseError::new(status, text).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn token_body(access: &str, refresh: &str, expire_secs: i64) -> String {
        json!({
            "success": true,
            "t": Utc::now().timestamp_millis(),
            "result": {
                "access_token": access,
                "refresh_token": refresh,
                "uid": "uid-1",
                "expire_time": expire_secs
            }
        })
        .to_string()
    }

    fn client(url: &str) -> TuyaOpenApi {
        TuyaOpenApi::new(TuyaConfig::new(url, "client-id", "client-secret")).unwrap()
    }

    #[test]
    fn token_info_prefers_expire_over_expire_time() {
        let resp = json!({
            "t": 1_000,
            "result": {"access_token": "a", "refresh_token": "r", "uid": "u", "expire": 2, "expire_time": 99}
        });
        let token = TuyaTokenInfo::from_response(&resp).unwrap();
        assert_eq!(token.expire_time, 3_000);
        assert_eq!(token.access_token, "a");

        let token = TuyaTokenInfo::from_response(&json!({"t": 1_000, "result": {"expire_time": 7}})).unwrap();
        assert_eq!(token.expire_time, 8_000);
        assert_eq!(token.access_token, "");
    }

    #[test]
    fn token_info_without_result_is_empty() {
        let token = TuyaTokenInfo::from_response(&json!({"success": false})).unwrap();
        assert_eq!(token.access_token, "");
        assert_eq!(token.expire_time, 0);
        assert!(token.needs_refresh_at(Utc::now()));
    }

    #[test]
    fn token_paths_are_detected() {
        assert!(is_token_path("/v1.0/token"));
        assert!(is_token_path("/v1.0/token/abc"));
        assert!(!is_token_path("/v1.0/devices/abc"));
    }

    #[tokio::test]
    async fn connect_caches_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "1".into()))
            .match_header("client_id", "client-id")
            .match_header("sign_method", "HMAC-SHA256")
            .match_header("lang", "en")
            .match_header("sign", Matcher::Regex("^[0-9A-F]{64}$".into()))
            .match_header("t", Matcher::Regex(r"^\d{13}$".into()))
            .with_status(200)
            .with_body(token_body("tok-1", "ref-1", 7200))
            .create_async()
            .await;

        let api = client(&server.url());
        assert!(!api.is_connected().await);

        let response = api.connect().await.unwrap();
        assert_eq!(response["success"], true);
        assert!(api.is_connected().await);

        let token = api.token_info().await.unwrap();
        assert_eq!(token.access_token, "tok-1");
        assert_eq!(token.refresh_token, "ref-1");
        assert_eq!(token.uid, "uid-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn first_request_connects_lazily() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-1", "ref-1", 7200))
            .expect(1)
            .create_async()
            .await;
        let device = server
            .mock("GET", "/v1.0/devices/dev-1")
            .match_header("access_token", "tok-1")
            .with_body(r#"{"success":true,"result":{"id":"dev-1"}}"#)
            .expect(2)
            .create_async()
            .await;

        let api = client(&server.url());
        let first = api.get("/v1.0/devices/dev-1", &Query::new()).await.unwrap();
        let second = api.get("/v1.0/devices/dev-1", &Query::new()).await.unwrap();
        assert_eq!(first["result"]["id"], "dev-1");
        assert_eq!(first, second);

        token.assert_async().await;
        device.assert_async().await;
    }

    #[tokio::test]
    async fn failure_reconnects_and_retries_once() {
        let mut server = Server::new_async().await;
        let first_token = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-1", "ref-1", 7200))
            .expect(1)
            .create_async()
            .await;
        let second_token = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-2", "ref-2", 7200))
            .expect(1)
            .create_async()
            .await;
        let rejected = server
            .mock("GET", "/v1.0/devices/dev-1")
            .match_header("access_token", "tok-1")
            .with_body(r#"{"success":false,"code":1010,"msg":"token invalid"}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/v1.0/devices/dev-1")
            .match_header("access_token", "tok-2")
            .with_body(r#"{"success":true,"result":{"id":"dev-1"}}"#)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server.url());
        let response = api.get("/v1.0/devices/dev-1", &Query::new()).await.unwrap();
        assert_eq!(response["result"]["id"], "dev-1");
        assert_eq!(api.token_info().await.unwrap().access_token, "tok-2");

        first_token.assert_async().await;
        second_token.assert_async().await;
        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn second_failure_returns_response_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-1", "ref-1", 7200))
            .create_async()
            .await;
        let failing = server
            .mock("POST", "/v1.0/devices/dev-1/commands")
            .with_status(500)
            .with_body("oops")
            .expect(2)
            .create_async()
            .await;

        let api = client(&server.url());
        let body = json!({"commands": [{"code": "switch_1", "value": true}]});
        let err = api
            .post("/v1.0/devices/dev-1/commands", Some(&body))
            .await
            .unwrap_err();

        let response_err = err.downcast_ref::<ResponseError>().unwrap();
        assert_eq!(response_err.status_code, 500);
        assert_eq!(response_err.response_text, "oops");
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_with_refresh_token() {
        let mut server = Server::new_async().await;
        // Expires inside the one-minute margin.
        let login = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-1", "ref-1", 30))
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("GET", "/v1.0/token/ref-1")
            .match_header("sign_method", "HMAC-SHA256")
            .with_body(token_body("tok-2", "ref-2", 7200))
            .expect(1)
            .create_async()
            .await;
        let device = server
            .mock("GET", "/v1.0/devices/dev-1/functions")
            .match_header("access_token", "tok-2")
            .with_body(r#"{"success":true,"result":{"functions":[]}}"#)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server.url());
        api.connect().await.unwrap();
        api.get("/v1.0/devices/dev-1/functions", &Query::new())
            .await
            .unwrap();

        let token = api.token_info().await.unwrap();
        assert_eq!(token.access_token, "tok-2");
        assert_eq!(token.refresh_token, "ref-2");
        login.assert_async().await;
        refresh.assert_async().await;
        device.assert_async().await;
    }

    #[tokio::test]
    async fn nonce_header_sent_when_enabled() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .match_header("nonce", Matcher::Regex("^[0-9a-f]{32}$".into()))
            .with_body(token_body("tok-1", "ref-1", 7200))
            .create_async()
            .await;

        let mut config = TuyaConfig::new(server.url(), "client-id", "client-secret");
        config.sign_nonce = true;
        let api = TuyaOpenApi::new(config).unwrap();
        api.connect().await.unwrap();
        mock.assert_async().await;
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Login hands out an expiring token whose refresh is rejected twice;
    /// the client must then log in again and use the second token.
    async fn mock_rejected_refresh(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
        let first_login = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-1", "SECRET-REFRESH-XYZ", 30))
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("GET", "/v1.0/token/SECRET-REFRESH-XYZ")
            .with_body(r#"{"success":false,"code":1010,"msg":"token invalid"}"#)
            .expect(2)
            .create_async()
            .await;
        let second_login = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-2", "ref-2", 7200))
            .expect(1)
            .create_async()
            .await;
        let device = server
            .mock("GET", "/v1.0/devices/dev-1")
            .match_header("access_token", "tok-2")
            .with_body(r#"{"success":true,"result":{"id":"dev-1"}}"#)
            .expect(1)
            .create_async()
            .await;
        vec![first_login, refresh, second_login, device]
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_connect() {
        let mut server = Server::new_async().await;
        let mocks = mock_rejected_refresh(&mut server).await;

        let api = client(&server.url());
        api.connect().await.unwrap();
        let response = api.get("/v1.0/devices/dev-1", &Query::new()).await.unwrap();
        assert_eq!(response["result"]["id"], "dev-1");
        assert_eq!(api.token_info().await.unwrap().access_token, "tok-2");

        for mock in mocks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn refresh_token_never_reaches_the_logs() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut server = Server::new_async().await;
        let _mocks = mock_rejected_refresh(&mut server).await;

        let api = client(&server.url());
        api.connect().await.unwrap();
        api.get("/v1.0/devices/dev-1", &Query::new()).await.unwrap();

        let output = logs.contents();
        assert!(output.contains("Token refresh failed"));
        assert!(output.contains("/v1.0/token/***"));
        assert!(!output.contains("SECRET-REFRESH-XYZ"), "leaked: {output}");
    }

    #[tokio::test]
    async fn non_json_success_status_is_retried() {
        let mut server = Server::new_async().await;
        let first_login = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-1", "ref-1", 7200))
            .expect(1)
            .create_async()
            .await;
        let second_login = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-2", "ref-2", 7200))
            .expect(1)
            .create_async()
            .await;
        let garbage = server
            .mock("GET", "/v1.0/devices/dev-1")
            .match_header("access_token", "tok-1")
            .with_status(200)
            .with_body("<html>gateway timeout</html>")
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/v1.0/devices/dev-1")
            .match_header("access_token", "tok-2")
            .with_body(r#"{"success":true,"result":{"id":"dev-1"}}"#)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server.url());
        let response = api.get("/v1.0/devices/dev-1", &Query::new()).await.unwrap();
        assert_eq!(response["result"]["id"], "dev-1");

        first_login.assert_async().await;
        second_login.assert_async().await;
        garbage.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn failing_token_endpoint_is_retried_once_without_reconnect() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(r#"{"success":false,"code":1004,"msg":"sign invalid"}"#)
            .expect(2)
            .create_async()
            .await;

        let api = client(&server.url());
        let err = api.connect().await.unwrap_err();
        let response_err = err.downcast_ref::<ResponseError>().unwrap();
        assert_eq!(response_err.status_code, 200);
        assert!(response_err.response_text.contains("1004"));
        assert!(!api.is_connected().await);
        token.assert_async().await;
    }

    #[tokio::test]
    async fn token_request_keeps_cached_token_for_other_callers() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_body(token_body("tok-1", "ref-1", 7200))
            .expect(1)
            .create_async()
            .await;
        let failing = server
            .mock("GET", "/v1.0/token")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let api = client(&server.url());
        api.connect().await.unwrap();
        assert!(api.connect().await.is_err());
        // A failed re-login leaves the previous token usable.
        assert_eq!(api.token_info().await.unwrap().access_token, "tok-1");
        failing.assert_async().await;
    }
}

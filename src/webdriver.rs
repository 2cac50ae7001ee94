use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tokio::time::Duration;

use crate::browser::{Browser, BrowserError, ElementId, Locator};

/// Key under which W3C WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

/// Maps a W3C error code onto the browser error set.
fn classify_error(code: &str, message: &str) -> BrowserError {
    match code {
        "no such element" | "stale element reference" => BrowserError::NotFound,
        "element not interactable" | "element click intercepted" | "invalid element state" => {
            BrowserError::NotInteractable
        }
        "timeout" | "script timeout" => BrowserError::Timeout,
        _ => BrowserError::Session(format!("{code}: {message}")),
    }
}

fn transport_error(err: reqwest::Error) -> BrowserError {
    if err.is_timeout() {
        BrowserError::Timeout
    } else {
        BrowserError::Session(format!("webdriver request failed: {err}"))
    }
}

/// Browser driven over the W3C WebDriver protocol, e.g. a local chromedriver.
/// The remote session is created on first use.
pub struct WebDriver {
    client: reqwest::Client,
    base_url: String,
    headless: bool,
    page_load_timeout: Duration,
    session_id: Option<String>,
}

impl WebDriver {
    pub fn new(base_url: &str, headless: bool, page_load_timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            // navigation may legitimately take the whole page-load budget
            .timeout(page_load_timeout + Duration::from_secs(15))
            .build()
            .map_err(|err| format!("failed to create HTTP client: {err}"))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headless,
            page_load_timeout,
            session_id: None,
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--disable-gpu", "--no-first-run"];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                    "timeouts": {
                        "pageLoad": self.page_load_timeout.as_millis() as u64,
                        "implicit": 0
                    }
                }
            }
        })
    }

    async fn execute(&self, method: Method, url: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let start = Instant::now();
        let mut req = self.client.request(method.clone(), url);
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        let raw_text = response.text().await.map_err(transport_error)?;
        debug!(
            "webdriver {} {} -> {} in {}ms",
            method,
            url,
            status,
            start.elapsed().as_millis()
        );

        let payload: WireResponse = serde_json::from_str(&raw_text).map_err(|err| {
            BrowserError::Session(format!("invalid webdriver response ({status}): {err}"))
        })?;

        if !status.is_success() {
            return Err(match serde_json::from_value::<WireError>(payload.value) {
                Ok(wire) => classify_error(&wire.error, &wire.message),
                Err(_) => BrowserError::Session(format!("webdriver HTTP error: {status}")),
            });
        }

        Ok(payload.value)
    }

    async fn ensure_session(&mut self) -> Result<String, BrowserError> {
        if let Some(id) = &self.session_id {
            return Ok(id.clone());
        }

        info!("starting webdriver session at {}", self.base_url);
        let url = format!("{}/session", self.base_url);
        let value = self.execute(Method::POST, &url, Some(self.capabilities())).await?;
        let session: NewSession = serde_json::from_value(value)
            .map_err(|err| BrowserError::Session(format!("invalid new-session response: {err}")))?;

        info!("webdriver session {} started", session.session_id);
        self.session_id = Some(session.session_id.clone());
        Ok(session.session_id)
    }

    async fn command(&mut self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let session_id = self.ensure_session().await?;
        let url = format!(
            "{}/session/{}{}",
            self.base_url,
            urlencoding::encode(&session_id),
            path
        );
        let result = self.execute(method, &url, body).await;
        if let Err(BrowserError::Session(msg)) = &result {
            // Drop the session so the next command starts a fresh one.
            if msg.starts_with("invalid session id") {
                warn!("webdriver session {session_id} is gone, will reconnect");
                self.session_id = None;
            }
        }
        result
    }

    fn element_path(element: &ElementId, suffix: &str) -> String {
        format!("/element/{}{}", urlencoding::encode(&element.0), suffix)
    }
}

#[async_trait]
impl Browser for WebDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        info!("navigating to {url}");
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn find_element(&mut self, locator: &Locator) -> Result<ElementId, BrowserError> {
        let body = json!({ "using": "css selector", "value": locator.css_selector() });
        let value = self.command(Method::POST, "/element", Some(body)).await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementId(id.to_string()))
            .ok_or_else(|| BrowserError::Session(format!("malformed element reference for {locator}")))
    }

    async fn send_keys(&mut self, element: &ElementId, text: &str) -> Result<(), BrowserError> {
        let path = Self::element_path(element, "/value");
        self.command(Method::POST, &path, Some(json!({ "text": text })))
            .await
            .map(|_| ())
    }

    async fn click(&mut self, element: &ElementId) -> Result<(), BrowserError> {
        let path = Self::element_path(element, "/click");
        self.command(Method::POST, &path, Some(json!({}))).await.map(|_| ())
    }

    async fn text(&mut self, element: &ElementId) -> Result<String, BrowserError> {
        let path = Self::element_path(element, "/text");
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };
        info!("closing webdriver session {session_id}");
        let url = format!("{}/session/{}", self.base_url, urlencoding::encode(&session_id));
        self.execute(Method::DELETE, &url, None).await.map(|_| ())
    }
}

use std::fmt;

use async_trait::async_trait;
use tokio::time::{self, Duration, Instant};

/// How often bounded waits re-check the page.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Id(String),
    Css(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    /// Selector form understood by WebDriver's `css selector` strategy.
    pub fn css_selector(&self) -> String {
        match self {
            Locator::Id(id) => format!("[id=\"{}\"]", id.replace('"', "\\\"")),
            Locator::Css(css) => css.clone(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{id}"),
            Locator::Css(css) => f.write_str(css),
        }
    }
}

/// Opaque reference to an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

/// Every way a browser call can fail, returned by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    Timeout,
    NotFound,
    NotInteractable,
    /// The driver itself is unreachable or refused the command.
    Session(String),
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserError::Timeout => f.write_str("timed out"),
            BrowserError::NotFound => f.write_str("element not found"),
            BrowserError::NotInteractable => f.write_str("element not interactable"),
            BrowserError::Session(e) => write!(f, "browser session error: {e}"),
        }
    }
}

impl std::error::Error for BrowserError {}

/// A remote-controlled browser. Methods take `&mut self`: one session serves
/// one navigation at a time.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    async fn find_element(&mut self, locator: &Locator) -> Result<ElementId, BrowserError>;

    async fn send_keys(&mut self, element: &ElementId, text: &str) -> Result<(), BrowserError>;

    async fn click(&mut self, element: &ElementId) -> Result<(), BrowserError>;

    async fn text(&mut self, element: &ElementId) -> Result<String, BrowserError>;

    /// Polls until the element appears or `timeout` elapses.
    async fn wait_for_element(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementId, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_element(locator).await {
                Err(BrowserError::NotFound) => {}
                other => return other,
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BrowserError::Timeout);
            }
            time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Ends the remote session, if any.
    async fn close(&mut self) -> Result<(), BrowserError> {
        Ok(())
    }
}

/// Waits until any of `locators` is present. All are checked on every poll
/// so none takes precedence over another.
pub async fn wait_for_any(
    browser: &mut dyn Browser,
    locators: &[Locator],
    timeout: Duration,
) -> Result<ElementId, BrowserError> {
    let deadline = Instant::now() + timeout;
    loop {
        for locator in locators {
            match browser.find_element(locator).await {
                Ok(element) => return Ok(element),
                Err(BrowserError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(BrowserError::Timeout);
        }
        time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

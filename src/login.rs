use std::sync::Arc;

use log::{info, warn};
use tokio::time::{self, Duration, Instant};

use crate::browser::{wait_for_any, Browser, BrowserError, Locator, POLL_INTERVAL};
use crate::config::decode_secret;
use crate::file_logger::{error_entry, event_entry, ActivityLog};
use crate::models::{AttemptOutcome, LogoutOutcome, PortalLayout, SessionStatus};
use crate::ports::{ConfigStore, Notifier};
use crate::prober::EndpointProber;
use crate::session::SessionHandle;

/// Bounded waits used while driving the portal page.
#[derive(Debug, Clone, Copy)]
pub struct FlowTimings {
    /// Look for an already-authenticated page right after navigation.
    pub marker_wait: Duration,
    pub form_wait: Duration,
    /// Look for a success marker or a changed title after submitting;
    /// shorter than `marker_wait`.
    pub confirm_wait: Duration,
    pub logoff_wait: Duration,
    pub freshness: Duration,
}

impl Default for FlowTimings {
    fn default() -> Self {
        Self {
            marker_wait: Duration::from_secs(3),
            form_wait: Duration::from_secs(5),
            confirm_wait: Duration::from_secs(2),
            logoff_wait: Duration::from_secs(5),
            freshness: Duration::from_secs(12 * 60 * 60),
        }
    }
}

fn page_failure(err: BrowserError) -> AttemptOutcome {
    match err {
        BrowserError::Timeout => AttemptOutcome::PageTimeout,
        BrowserError::NotFound => AttemptOutcome::ElementMissing,
        BrowserError::NotInteractable => AttemptOutcome::NotInteractable,
        BrowserError::Session(msg) => AttemptOutcome::BrowserUnavailable(msg),
    }
}

/// Drives single login and logout attempts against the portal. Owns the
/// browser, so at most one attempt is ever in flight.
pub struct LoginFlow {
    prober: EndpointProber,
    browser: Box<dyn Browser>,
    config: Arc<dyn ConfigStore>,
    session: SessionHandle,
    notifier: Arc<dyn Notifier>,
    activity: ActivityLog,
    layout: PortalLayout,
    timings: FlowTimings,
}

impl LoginFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prober: EndpointProber,
        browser: Box<dyn Browser>,
        config: Arc<dyn ConfigStore>,
        session: SessionHandle,
        notifier: Arc<dyn Notifier>,
        activity: ActivityLog,
        layout: PortalLayout,
        timings: FlowTimings,
    ) -> Self {
        Self {
            prober,
            browser,
            config,
            session,
            notifier,
            activity,
            layout,
            timings,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn success_markers(&self) -> Vec<Locator> {
        self.layout
            .success_markers
            .iter()
            .map(|id| Locator::id(id.as_str()))
            .collect()
    }

    /// Current text of the title element, if the layout names one and the
    /// page shows it.
    async fn read_title(&mut self) -> Option<String> {
        if self.layout.title_element.is_empty() {
            return None;
        }
        let locator = Locator::id(self.layout.title_element.as_str());
        let element = self.browser.find_element(&locator).await.ok()?;
        self.browser.text(&element).await.ok()
    }

    /// Polls until a success marker appears or the title text differs from
    /// `title_before`.
    async fn confirm_login(&mut self, markers: &[Locator], title_before: Option<&str>) -> Result<(), BrowserError> {
        let deadline = Instant::now() + self.timings.confirm_wait;
        loop {
            match wait_for_any(self.browser.as_mut(), markers, Duration::ZERO).await {
                Ok(_) => return Ok(()),
                Err(BrowserError::Timeout) => {}
                Err(err) => return Err(err),
            }
            if let Some(before) = title_before {
                if let Some(now) = self.read_title().await {
                    if now != before {
                        info!("portal title changed to '{now}'");
                        return Ok(());
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BrowserError::Timeout);
            }
            time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn locate_portal(&self) -> Option<String> {
        let started = Instant::now();
        let url = self.prober.find_portal().await;
        let secs = started.elapsed().as_secs();
        let entry = match &url {
            Some(url) => event_entry("probe", &format!("Login found: '{url}' took {secs}s.")).endpoint(url),
            None => event_entry("probe", &format!("Portal not reachable, time taken: {secs}s.")),
        };
        self.activity
            .record(entry.duration_ms(started.elapsed().as_millis() as u64))
            .await;
        url
    }

    /// One login attempt. Never retries; the caller decides what to do with
    /// the outcome.
    pub async fn login(&mut self) -> AttemptOutcome {
        let Some(endpoint) = self.locate_portal().await else {
            if self.session.mark_waiting_for_network().await {
                self.notifier
                    .info("Waiting", "Portal network not detected, waiting for it to appear.");
            }
            return AttemptOutcome::NoPortalReachable;
        };

        if self.session.is_fresh(&endpoint, self.timings.freshness).await {
            info!("session on {endpoint} is still fresh, skipping login");
            return AttemptOutcome::AlreadyAuthenticated(endpoint);
        }

        self.session.mark_pending().await;
        match self.drive_login(&endpoint).await {
            Ok(()) => {
                self.session.record_success(&endpoint).await;
                self.activity
                    .record(event_entry("login", "Successfully logged into the login page.").endpoint(&endpoint))
                    .await;
                AttemptOutcome::Success(endpoint)
            }
            Err(failure) => {
                self.session.mark_failed().await;
                warn!("login attempt on {endpoint} failed: {failure}");
                self.activity
                    .record(error_entry("login", "Login attempt failed.", &failure.to_string()).endpoint(&endpoint))
                    .await;
                failure
            }
        }
    }

    /// Steps that touch the page. `Err` carries the failure classification.
    async fn drive_login(&mut self, endpoint: &str) -> Result<(), AttemptOutcome> {
        self.browser.navigate(endpoint).await.map_err(page_failure)?;

        let markers = self.success_markers();
        match wait_for_any(self.browser.as_mut(), &markers, self.timings.marker_wait).await {
            Ok(_) => {
                info!("portal page at {endpoint} already shows an authenticated session");
                return Ok(());
            }
            Err(BrowserError::Timeout) => {}
            Err(err) => return Err(page_failure(err)),
        }

        let credentials = self
            .config
            .load()
            .await
            .map_err(|err| AttemptOutcome::ConfigInvalid(err.to_string()))?
            .credentials;

        let username_field = self
            .browser
            .wait_for_element(&Locator::id(self.layout.username_field.as_str()), self.timings.form_wait)
            .await
            .map_err(page_failure)?;
        let password_field = self
            .browser
            .find_element(&Locator::id(self.layout.password_field.as_str()))
            .await
            .map_err(page_failure)?;
        let submit = self
            .browser
            .find_element(&Locator::id(self.layout.submit_button.as_str()))
            .await
            .map_err(page_failure)?;

        let secret = match decode_secret(&credentials.password) {
            Ok(secret) => secret,
            Err(err) => {
                warn!("stored password is unusable: {err}");
                return Err(AttemptOutcome::SecretUndecodable);
            }
        };

        self.browser
            .send_keys(&username_field, &credentials.username)
            .await
            .map_err(page_failure)?;
        self.browser
            .send_keys(&password_field, &secret)
            .await
            .map_err(page_failure)?;
        let title_before = self.read_title().await;
        self.browser.click(&submit).await.map_err(page_failure)?;

        match self.confirm_login(&markers, title_before.as_deref()).await {
            Ok(_) => Ok(()),
            Err(BrowserError::Timeout) => Err(AttemptOutcome::InvalidCredentials),
            Err(err) => Err(page_failure(err)),
        }
    }

    /// Logs out of the portal if the session is believed to be logged in.
    pub async fn logout(&mut self) -> LogoutOutcome {
        let Some(endpoint) = self.locate_portal().await else {
            self.notifier
                .info("Logout", "Portal not reachable, nothing to log out of.");
            return LogoutOutcome::NoPortalReachable;
        };

        if self.session.status().await != SessionStatus::Success {
            self.session.mark_logged_out().await;
            self.notifier.info("Logout", "Not logged in, skipping logout.");
            self.activity
                .record(event_entry("logout", "Already logged out, skipping logout."))
                .await;
            return LogoutOutcome::NothingToDo;
        }

        let result = self.drive_logout(&endpoint).await;
        // Whatever happened, never keep claiming a session we cannot vouch for.
        self.session.mark_logged_out().await;

        match result {
            Ok(()) => {
                self.activity
                    .record(event_entry("logout", "Successfully logged out.").endpoint(&endpoint))
                    .await;
                LogoutOutcome::LoggedOut
            }
            Err(err) => {
                self.notifier
                    .alert("Error!", "Error occurred while trying to logout, try again later.");
                self.activity
                    .record(
                        error_entry(
                            "logout",
                            "Logout control not usable while status was Success.",
                            &err.to_string(),
                        )
                        .endpoint(&endpoint),
                    )
                    .await;
                LogoutOutcome::Indeterminate(err.to_string())
            }
        }
    }

    async fn drive_logout(&mut self, endpoint: &str) -> Result<(), BrowserError> {
        self.browser.navigate(endpoint).await?;
        let logoff = self
            .browser
            .wait_for_element(&Locator::id(self.layout.logoff_button.as_str()), self.timings.logoff_wait)
            .await?;
        self.browser.click(&logoff).await
    }

    /// Releases the browser session on shutdown.
    pub async fn shutdown(&mut self) {
        if let Err(err) = self.browser.close().await {
            warn!("failed to close browser session: {err}");
        }
    }
}

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::time::{self, Duration, Instant};

use crate::config::encode_secret;
use crate::file_logger::{error_entry, event_entry, ActivityLog};
use crate::login::LoginFlow;
use crate::models::{AttemptOutcome, CycleResult, LogoutOutcome, MAX_ATTEMPTS};
use crate::ports::{ConfigStore, CredentialPrompt, Notifier};
use crate::session::SessionHandle;

pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);
pub const FAILURE_COOLDOWN: Duration = Duration::from_secs(2 * 60);

/// Runs login attempts in a bounded loop and decides, per outcome, whether to
/// retry, ask the user for credentials, give up, or stop the process.
pub struct RetryPolicy {
    flow: LoginFlow,
    config: Arc<dyn ConfigStore>,
    prompt: Arc<dyn CredentialPrompt>,
    notifier: Arc<dyn Notifier>,
    activity: ActivityLog,
    max_attempts: u32,
    backoff: Duration,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
}

impl RetryPolicy {
    pub fn new(
        flow: LoginFlow,
        config: Arc<dyn ConfigStore>,
        prompt: Arc<dyn CredentialPrompt>,
        notifier: Arc<dyn Notifier>,
        activity: ActivityLog,
    ) -> Self {
        Self {
            flow,
            config,
            prompt,
            notifier,
            activity,
            max_attempts: MAX_ATTEMPTS,
            backoff: RETRY_BACKOFF,
            cooldown: FAILURE_COOLDOWN,
            cooldown_until: None,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        self.flow.session()
    }

    /// Remaining cooldown after a failed cycle, if any.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    /// Scheduled cycle; skipped while cooling down.
    pub async fn run_cycle(&mut self) -> CycleResult {
        if let Some(left) = self.cooldown_remaining() {
            debug!("login cooling down for another {}s", left.as_secs());
            return CycleResult::CoolingDown;
        }
        self.run_attempts().await
    }

    /// User-requested cycle; ignores the cooldown.
    pub async fn run_forced(&mut self) -> CycleResult {
        self.run_attempts().await
    }

    pub async fn logout(&mut self) -> LogoutOutcome {
        self.flow.logout().await
    }

    pub async fn shutdown(&mut self) {
        self.flow.shutdown().await;
    }

    async fn run_attempts(&mut self) -> CycleResult {
        self.cooldown_until = None;
        let mut attempt: u32 = 1;

        loop {
            let outcome = self.flow.login().await;
            match outcome {
                AttemptOutcome::Success(url) => {
                    if attempt > 1 {
                        info!("login recovered on attempt {attempt}");
                    }
                    return CycleResult::LoggedIn(url);
                }
                AttemptOutcome::AlreadyAuthenticated(url) => return CycleResult::AlreadyAuthenticated(url),
                AttemptOutcome::NoPortalReachable => return CycleResult::NoPortal,
                AttemptOutcome::ConfigInvalid(reason) => {
                    error!("settings unusable, stopping: {reason}");
                    self.notifier.alert(
                        "Error!",
                        "Invalid settings (must contain username and password), exiting...",
                    );
                    self.activity
                        .record(error_entry("config", "Invalid settings, exiting.", &reason))
                        .await;
                    return CycleResult::Fatal(reason);
                }
                failure @ (AttemptOutcome::PageTimeout
                | AttemptOutcome::ElementMissing
                | AttemptOutcome::NotInteractable
                | AttemptOutcome::BrowserUnavailable(_)) => {
                    if attempt >= self.max_attempts {
                        return self.give_up(&failure).await;
                    }
                    self.activity
                        .record(
                            error_entry("retry", "Retrying login.", &failure.to_string()).attempt(attempt),
                        )
                        .await;
                    time::sleep(self.backoff).await;
                }
                failure @ (AttemptOutcome::InvalidCredentials | AttemptOutcome::SecretUndecodable) => {
                    // the same credentials cannot succeed
                    let message = if failure == AttemptOutcome::SecretUndecodable {
                        "Stored password could not be decoded, unsuccessful login!"
                    } else {
                        "Invalid login credentials, unsuccessful login!"
                    };
                    self.notifier.alert("Warning!", message);

                    let Some((username, password)) = self.prompt.ask_for_credentials().await else {
                        info!("user declined to enter new credentials");
                        return self.fail(&failure, "Credentials rejected and none supplied.").await;
                    };
                    if let Err(err) = self
                        .config
                        .save_credentials(&username, &encode_secret(&password))
                        .await
                    {
                        self.notifier
                            .alert("Error", &format!("Failed to save credentials: {err}"));
                        return self.fail(&failure, "Could not persist new credentials.").await;
                    }
                    self.activity
                        .record(event_entry("credentials", "Saved new credentials.").attempt(attempt))
                        .await;
                    if attempt >= self.max_attempts {
                        return self.give_up(&failure).await;
                    }
                }
            }
            attempt += 1;
        }
    }

    async fn give_up(&mut self, last: &AttemptOutcome) -> CycleResult {
        error!("retry count exceeded after {} attempts: {last}", self.max_attempts);
        self.notifier.alert(
            "Login failed",
            &format!("Giving up after {} attempts: {last}", self.max_attempts),
        );
        self.fail(last, "Retry counts exceeded.").await
    }

    async fn fail(&mut self, last: &AttemptOutcome, message: &str) -> CycleResult {
        self.flow.session().mark_failed().await;
        self.cooldown_until = Some(Instant::now() + self.cooldown);
        warn!(
            "login failed, next automatic attempt in {}s",
            self.cooldown.as_secs()
        );
        self.activity
            .record(error_entry("login", message, &last.to_string()))
            .await;
        CycleResult::Failed(last.to_string())
    }
}

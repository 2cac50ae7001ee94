mod browser;
mod config;
mod console;
mod file_logger;
mod login;
mod models;
mod ports;
mod prober;
mod retry;
mod scheduler;
mod session;
mod webdriver;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Duration;

use browser::Browser;
use config::{encode_secret, FileConfigStore};
use console::{ConsoleExit, ConsoleNotifier, ConsolePrompt, InputRouter, PROMPT_TIMEOUT};
use file_logger::{event_entry, ActivityLog};
use login::{FlowTimings, LoginFlow};
use models::{AppConfig, Command, CycleResult};
use ports::{ConfigError, ConfigStore, CredentialPrompt, Notifier};
use prober::{EndpointProber, HttpProbe, Probe};
use retry::RetryPolicy;
use scheduler::{RefreshSignal, Scheduler};
use session::{SessionHandle, SessionSnapshot};
use webdriver::WebDriver;

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_QUEUE: usize = 8;

/// Command-line overrides applied on top of the settings file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub webdriver_url: Option<String>,
    pub no_headless: bool,
    pub once: bool,
}

/// What `CoreHandle::dispatch` did with a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Queued,
    Status(SessionSnapshot),
}

/// Cheap, cloneable command surface for the presentation layer.
#[derive(Clone)]
pub struct CoreHandle {
    commands: mpsc::Sender<Command>,
    refresh: RefreshSignal,
    session: SessionHandle,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl CoreHandle {
    pub async fn dispatch(&self, command: Command) -> Result<Dispatched, String> {
        match command {
            Command::RequestRefresh => {
                self.refresh.set();
                Ok(Dispatched::Queued)
            }
            Command::QueryStatus => Ok(Dispatched::Status(self.status().await)),
            Command::TriggerLogin | Command::TriggerLogout => self
                .commands
                .send(command)
                .await
                .map(|_| Dispatched::Queued)
                .map_err(|_| "login service has stopped".to_string()),
        }
    }

    pub async fn status(&self) -> SessionSnapshot {
        self.session.snapshot().await
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Implementations of every collaborator the core talks to.
pub struct Collaborators {
    pub browser: Box<dyn Browser>,
    pub probe: Arc<dyn Probe>,
    pub config: Arc<dyn ConfigStore>,
    pub prompt: Arc<dyn CredentialPrompt>,
    pub notifier: Arc<dyn Notifier>,
}

/// The wired login core, ready to run once or as a background task.
pub struct Core {
    policy: RetryPolicy,
    interval: Duration,
}

impl Core {
    pub fn new(cfg: &AppConfig, parts: Collaborators, activity: ActivityLog) -> Self {
        let prober = EndpointProber::new(
            cfg.endpoints.clone(),
            parts.probe,
            Duration::from_secs(cfg.probe_timeout_secs),
        );
        let timings = FlowTimings {
            freshness: Duration::from_secs(cfg.freshness_hours * 60 * 60),
            ..FlowTimings::default()
        };
        let flow = LoginFlow::new(
            prober,
            parts.browser,
            parts.config.clone(),
            SessionHandle::new(),
            parts.notifier.clone(),
            activity.clone(),
            cfg.portal.clone(),
            timings,
        );
        let policy = RetryPolicy::new(flow, parts.config, parts.prompt, parts.notifier, activity);

        Self {
            policy,
            interval: Duration::from_secs_f64(cfg.interval_minutes * 60.0),
        }
    }

    pub async fn run_once(mut self) -> CycleResult {
        let result = self.policy.run_cycle().await;
        self.policy.shutdown().await;
        result
    }

    pub fn spawn(self) -> (CoreHandle, JoinHandle<Result<(), String>>) {
        let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (stop_tx, stop_rx) = watch::channel(false);
        let refresh = RefreshSignal::new();
        let session = self.policy.session().clone();

        let scheduler = Scheduler::new(self.policy, self.interval, refresh.clone(), commands_rx, stop_rx);
        let task = tokio::spawn(scheduler.run());

        let handle = CoreHandle {
            commands,
            refresh,
            session,
            stop_tx: Arc::new(stop_tx),
        };
        (handle, task)
    }
}

/// Loads the settings, asking for credentials when there are none yet.
/// Values the settings had to correct are shown as warnings.
async fn load_or_ask(
    store: &dyn ConfigStore,
    prompt: &dyn CredentialPrompt,
    notifier: &dyn Notifier,
) -> Result<AppConfig, String> {
    let cfg = match store.load().await {
        Ok(cfg) => cfg,
        Err(err) => ask_for_credentials(store, prompt, notifier, err).await?,
    };
    for warning in &cfg.warnings {
        notifier.alert("Warning!", warning);
    }
    Ok(cfg)
}

async fn ask_for_credentials(
    store: &dyn ConfigStore,
    prompt: &dyn CredentialPrompt,
    notifier: &dyn Notifier,
    load_error: ConfigError,
) -> Result<AppConfig, String> {
    match load_error {
        ConfigError::NotFound(path) => {
            info!("no settings at {}, asking for credentials", path.display());
        }
        ConfigError::Incomplete(reason) => {
            warn!("settings incomplete: {reason}");
            notifier.alert("Warning!", "Settings incomplete, please enter your portal credentials.");
        }
        ConfigError::Malformed(reason) => {
            error!("settings unreadable: {reason}");
            notifier.alert(
                "Error!",
                &format!("Settings file could not be read ({reason}), fix or remove it. Exiting..."),
            );
            return Err(format!("unreadable settings: {reason}"));
        }
        err @ ConfigError::Io(_) => return Err(err.to_string()),
    }

    let Some((username, password)) = prompt.ask_for_credentials().await else {
        notifier.alert("Error!", "No credentials entered, exiting...");
        return Err("no credentials entered".to_string());
    };
    store
        .save_credentials(&username, &encode_secret(&password))
        .await
        .map_err(|err| err.to_string())?;
    store.load().await.map_err(|err| err.to_string())
}

fn joined(result: Result<Result<(), String>, JoinError>) -> Result<(), String> {
    result.map_err(|err| format!("scheduler task failed: {err}"))?
}

pub async fn run(options: RunOptions) -> Result<(), String> {
    let config_path = match options.config_path {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    info!("using settings at {}", config_path.display());
    let store = Arc::new(FileConfigStore::new(config_path));

    let router = InputRouter::new();
    let lines = console::spawn_line_reader(tokio::io::stdin(), router.clone());
    let prompt = Arc::new(ConsolePrompt::new(router, PROMPT_TIMEOUT));
    let notifier = Arc::new(ConsoleNotifier::stderr());

    let mut cfg = load_or_ask(store.as_ref(), prompt.as_ref(), notifier.as_ref()).await?;
    if let Some(url) = options.webdriver_url {
        cfg.webdriver_url = url;
    }
    if options.no_headless {
        cfg.headless = false;
    }

    let log_dir = cfg
        .log_directory
        .as_ref()
        .map(PathBuf::from)
        .or_else(config::default_log_dir);
    let activity = match log_dir {
        Some(dir) if cfg.logging => {
            file_logger::cleanup_old_logs(&dir, cfg.max_log_days as i64).await;
            ActivityLog::with_dir(dir)
        }
        _ => ActivityLog::in_memory(),
    };
    activity.record(event_entry("startup", "Auto-login started.")).await;

    let browser = WebDriver::new(&cfg.webdriver_url, cfg.headless, PAGE_LOAD_TIMEOUT)?;
    let probe = HttpProbe::new(Duration::from_secs(cfg.probe_timeout_secs))?;
    let core = Core::new(
        &cfg,
        Collaborators {
            browser: Box::new(browser),
            probe: Arc::new(probe),
            config: store,
            prompt,
            notifier,
        },
        activity.clone(),
    );

    if options.once {
        return match core.run_once().await {
            CycleResult::Fatal(reason) | CycleResult::Failed(reason) => Err(reason),
            other => {
                info!("single cycle finished: {other:?}");
                Ok(())
            }
        };
    }

    let (handle, mut scheduler) = core.spawn();
    let mut console = tokio::spawn(console::run_commands(lines, handle.clone(), activity));
    let mut input_open = true;

    loop {
        tokio::select! {
            result = &mut scheduler => {
                console.abort();
                return joined(result);
            }
            _ = signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            exit = &mut console, if input_open => match exit {
                Ok(ConsoleExit::Quit) => break,
                Ok(ConsoleExit::InputClosed) => {
                    info!("stdin closed, running until interrupted");
                    input_open = false;
                }
                Err(err) => {
                    error!("console task failed: {err}");
                    input_open = false;
                }
            },
        }
    }

    console.abort();
    handle.stop();
    joined(scheduler.await)
}

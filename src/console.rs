//! Terminal front end: notifications on stderr, credential prompts and
//! commands read line by line from stdin.

use std::io::{self, Write};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{self, Duration};

use crate::file_logger::ActivityLog;
use crate::models::Command;
use crate::ports::{CredentialPrompt, Notifier};
use crate::{CoreHandle, Dispatched};

pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const HELP: &str = "commands: login, logout, refresh, status, logs, quit";

/// Prints each notice as one line. Callers log the underlying event
/// themselves.
pub struct ConsoleNotifier<W = io::Stderr> {
    out: StdMutex<W>,
}

impl ConsoleNotifier {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> ConsoleNotifier<W> {
    pub fn new(out: W) -> Self {
        Self { out: StdMutex::new(out) }
    }

    fn print(&self, title: &str, message: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(err) = writeln!(out, "[{title}] {message}") {
            debug!("failed to print notice: {err}");
        }
    }
}

impl<W: Write + Send> Notifier for ConsoleNotifier<W> {
    fn alert(&self, title: &str, message: &str) {
        self.print(title, message);
    }

    fn info(&self, title: &str, message: &str) {
        self.print(title, message);
    }
}

/// Hands stdin lines to a waiting prompt before they are read as commands.
#[derive(Clone, Default)]
pub struct InputRouter {
    waiting: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next input line, or `None` if nothing arrives within `timeout`.
    pub async fn next_line(&self, timeout: Duration) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        *self.waiting.lock().await = Some(tx);
        match time::timeout(timeout, rx).await {
            Ok(Ok(line)) => Some(line),
            _ => {
                self.waiting.lock().await.take();
                None
            }
        }
    }

    /// Gives `line` to a waiting prompt. Returns it when nobody is waiting.
    pub async fn route(&self, line: String) -> Option<String> {
        match self.waiting.lock().await.take() {
            Some(tx) => tx.send(line).err(),
            None => Some(line),
        }
    }
}

/// Reads `input` line by line on a background task. Lines not claimed by a
/// prompt are forwarded on the returned channel, which closes on EOF.
pub fn spawn_line_reader<R>(input: R, router: InputRouter) -> mpsc::Receiver<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(input).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(line) = router.route(line).await else {
                        continue;
                    };
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(err) => {
                    warn!("failed to read stdin: {err}");
                    break;
                }
            }
        }
    });
    rx
}

/// Asks for credentials on the terminal. An empty username declines.
pub struct ConsolePrompt {
    router: InputRouter,
    timeout: Duration,
}

impl ConsolePrompt {
    pub fn new(router: InputRouter, timeout: Duration) -> Self {
        Self { router, timeout }
    }
}

#[async_trait]
impl CredentialPrompt for ConsolePrompt {
    async fn ask_for_credentials(&self) -> Option<(String, String)> {
        eprintln!("Portal username (empty to cancel):");
        let username = self.router.next_line(self.timeout).await?.trim().to_string();
        if username.is_empty() {
            return None;
        }
        eprintln!("Portal password:");
        let password = self.router.next_line(self.timeout).await?.trim().to_string();
        if password.is_empty() {
            return None;
        }
        Some((username, password))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Core(Command),
    Logs,
    Quit,
    Help,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let command = match line.trim().to_ascii_lowercase().as_str() {
        "" => return None,
        "login" => ConsoleCommand::Core(Command::TriggerLogin),
        "logout" => ConsoleCommand::Core(Command::TriggerLogout),
        "refresh" => ConsoleCommand::Core(Command::RequestRefresh),
        "status" => ConsoleCommand::Core(Command::QueryStatus),
        "logs" => ConsoleCommand::Logs,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Help,
    };
    Some(command)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    InputClosed,
}

/// Dispatches typed commands until `quit` or end of input.
pub async fn run_commands(
    mut lines: mpsc::Receiver<String>,
    handle: CoreHandle,
    activity: ActivityLog,
) -> ConsoleExit {
    eprintln!("{HELP}");
    while let Some(line) = lines.recv().await {
        match parse_command(&line) {
            None => {}
            Some(ConsoleCommand::Quit) => return ConsoleExit::Quit,
            Some(ConsoleCommand::Help) => eprintln!("{HELP}"),
            Some(ConsoleCommand::Logs) => {
                for line in activity.lines().await {
                    println!("{}", line.render());
                }
            }
            Some(ConsoleCommand::Core(command)) => match handle.dispatch(command).await {
                Ok(Dispatched::Status(snapshot)) => {
                    println!("{}", snapshot.status);
                    if let (Some(endpoint), Some(at)) = (&snapshot.last_endpoint, snapshot.last_success_at) {
                        println!("last login: {} at {}", endpoint, at.format("%Y-%m-%d %H:%M:%S"));
                    }
                }
                Ok(Dispatched::Queued) => debug!("{command:?} queued"),
                Err(err) => {
                    eprintln!("{err}");
                    return ConsoleExit::Quit;
                }
            },
        }
    }
    ConsoleExit::InputClosed
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{self, Duration, Instant};

use crate::models::{Command, CycleResult};
use crate::retry::RetryPolicy;

pub const MIN_SLEEP: Duration = Duration::from_secs(1);

/// Single-slot wake-up flag. Any number of `set` calls before the scheduler
/// consumes it collapse into one wake-up.
#[derive(Debug, Clone, Default)]
pub struct RefreshSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl RefreshSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    /// Waits for the flag and clears it.
    pub async fn wait(&self) {
        loop {
            if self.flag.swap(false, Ordering::SeqCst) {
                return;
            }
            // may be a stale permit from an already consumed set
            self.notify.notified().await;
        }
    }
}

/// Sleep before the next cycle so that cycles start roughly `interval` apart.
pub fn next_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_SLEEP)
}

enum Wake {
    Deadline,
    Refresh,
    Stop,
}

/// The periodic login loop. Owns the retry policy, so cycles never overlap.
pub struct Scheduler {
    policy: RetryPolicy,
    interval: Duration,
    refresh: RefreshSignal,
    commands: mpsc::Receiver<Command>,
    stop_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        policy: RetryPolicy,
        interval: Duration,
        refresh: RefreshSignal,
        commands: mpsc::Receiver<Command>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            policy,
            interval,
            refresh,
            commands,
            stop_rx,
        }
    }

    /// Runs until stopped, until every command sender is gone, or until a
    /// cycle reports unusable settings (`Err`). Closes the browser on the way
    /// out in every case.
    pub async fn run(mut self) -> Result<(), String> {
        info!("scheduler started, interval {:?}", self.interval);
        let result = self.run_loop().await;
        self.policy.shutdown().await;
        info!("scheduler stopped");
        result
    }

    async fn run_loop(&mut self) -> Result<(), String> {
        loop {
            if *self.stop_rx.borrow() {
                return Ok(());
            }

            let started = Instant::now();
            let result = self.policy.run_cycle().await;
            check_cycle(&result)?;

            let sleep = next_sleep(self.interval, started.elapsed());
            debug!("cycle finished ({result:?}), next in {sleep:?}");

            match self.wait_until(Instant::now() + sleep).await? {
                Wake::Deadline => {}
                Wake::Refresh => info!("refresh requested, running cycle early"),
                Wake::Stop => return Ok(()),
            }
        }
    }

    /// Handles commands while waiting; returns when the next cycle is due.
    async fn wait_until(&mut self, deadline: Instant) -> Result<Wake, String> {
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return Ok(Wake::Deadline),
                _ = self.refresh.wait() => return Ok(Wake::Refresh),
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        return Ok(Wake::Stop);
                    }
                }
                command = self.commands.recv() => match command {
                    None => {
                        info!("command channel closed");
                        return Ok(Wake::Stop);
                    }
                    Some(Command::TriggerLogin) => {
                        info!("login requested");
                        let result = self.policy.run_forced().await;
                        check_cycle(&result)?;
                    }
                    Some(Command::TriggerLogout) => {
                        info!("logout requested");
                        let outcome = self.policy.logout().await;
                        info!("logout finished: {outcome:?}");
                    }
                    Some(other) => debug!("scheduler ignoring {other:?}"),
                },
            }
        }
    }
}

fn check_cycle(result: &CycleResult) -> Result<(), String> {
    match result {
        CycleResult::Fatal(reason) => {
            error!("stopping: {reason}");
            Err(reason.clone())
        }
        CycleResult::Failed(reason) => {
            warn!("login cycle failed: {reason}");
            Ok(())
        }
        _ => Ok(()),
    }
}

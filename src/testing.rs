//! In-crate fakes for the collaborator traits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{self, Duration};

use crate::browser::{Browser, BrowserError, ElementId, Locator};
use crate::config::{encode_secret, require_credentials};
use crate::models::AppConfig;
use crate::ports::{ConfigError, ConfigStore, CredentialPrompt, Notifier};
use crate::prober::{Probe, ProbeVerdict};

fn key(locator: &Locator) -> String {
    match locator {
        Locator::Id(id) => id.clone(),
        Locator::Css(css) => css.clone(),
    }
}

#[derive(Default)]
struct PageState {
    navigations: Vec<String>,
    elements: HashSet<String>,
    misses_left: HashMap<String, u32>,
    reveal_on_click: HashMap<String, Vec<String>>,
    texts: HashMap<String, String>,
    retitle_on_click: HashMap<String, (String, String)>,
    remove_on_navigate: bool,
    not_interactable: HashSet<String>,
    navigate_error: Option<BrowserError>,
    /// `None` fails every navigation once `navigate_error` is set.
    navigate_failures_left: Option<u32>,
    typed: Vec<(String, String)>,
    clicks: Vec<String>,
    closed: bool,
}

/// Scriptable page. Clones share state so a test can keep one handle while
/// the flow owns another.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<PageState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_element(&self, id: &str) {
        self.state.lock().unwrap().elements.insert(id.to_string());
    }

    /// Element is reported missing for the first `misses` lookups.
    pub fn appear_after(&self, id: &str, misses: u32) {
        let mut state = self.state.lock().unwrap();
        state.elements.insert(id.to_string());
        state.misses_left.insert(id.to_string(), misses);
    }

    pub fn reveal_on_click(&self, button: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .reveal_on_click
            .entry(button.to_string())
            .or_default()
            .push(id.to_string());
    }

    pub fn not_interactable(&self, id: &str) {
        self.state.lock().unwrap().not_interactable.insert(id.to_string());
    }

    pub fn fail_navigation(&self, err: BrowserError) {
        let mut state = self.state.lock().unwrap();
        state.navigate_error = Some(err);
        state.navigate_failures_left = None;
    }

    /// Only the next `times` navigations fail.
    pub fn fail_navigations(&self, err: BrowserError, times: u32) {
        let mut state = self.state.lock().unwrap();
        state.navigate_error = Some(err);
        state.navigate_failures_left = Some(times);
    }

    /// Adds `id` showing `text`.
    pub fn set_text(&self, id: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        state.elements.insert(id.to_string());
        state.texts.insert(id.to_string(), text.to_string());
    }

    /// Clicking `button` changes the text of `id`.
    pub fn retitle_on_click(&self, button: &str, id: &str, text: &str) {
        self.state
            .lock()
            .unwrap()
            .retitle_on_click
            .insert(button.to_string(), (id.to_string(), text.to_string()));
    }

    /// Elements revealed by clicks vanish again on the next navigation.
    pub fn reset_revealed_on_navigate(&self) {
        self.state.lock().unwrap().remove_on_navigate = true;
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().typed.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        if state.remove_on_navigate {
            let revealed: Vec<String> = state.reveal_on_click.values().flatten().cloned().collect();
            for id in revealed {
                state.elements.remove(&id);
            }
        }
        let Some(err) = state.navigate_error.clone() else {
            return Ok(());
        };
        match &mut state.navigate_failures_left {
            None => Err(err),
            Some(0) => Ok(()),
            Some(left) => {
                *left -= 1;
                Err(err)
            }
        }
    }

    async fn find_element(&mut self, locator: &Locator) -> Result<ElementId, BrowserError> {
        let id = key(locator);
        let mut state = self.state.lock().unwrap();
        if let Some(misses) = state.misses_left.get_mut(&id) {
            if *misses > 0 {
                *misses -= 1;
                return Err(BrowserError::NotFound);
            }
        }
        if state.elements.contains(&id) {
            Ok(ElementId(id))
        } else {
            Err(BrowserError::NotFound)
        }
    }

    async fn send_keys(&mut self, element: &ElementId, text: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        if state.not_interactable.contains(&element.0) {
            return Err(BrowserError::NotInteractable);
        }
        state.typed.push((element.0.clone(), text.to_string()));
        Ok(())
    }

    async fn click(&mut self, element: &ElementId) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        if state.not_interactable.contains(&element.0) {
            return Err(BrowserError::NotInteractable);
        }
        state.clicks.push(element.0.clone());
        if let Some(revealed) = state.reveal_on_click.get(&element.0).cloned() {
            state.elements.extend(revealed);
        }
        if let Some((id, text)) = state.retitle_on_click.get(&element.0).cloned() {
            state.texts.insert(id, text);
        }
        Ok(())
    }

    async fn text(&mut self, element: &ElementId) -> Result<String, BrowserError> {
        let state = self.state.lock().unwrap();
        if !state.elements.contains(&element.0) {
            return Err(BrowserError::NotFound);
        }
        Ok(state.texts.get(&element.0).cloned().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Probe answering each URL with a fixed verdict after a fixed delay.
#[derive(Default)]
pub struct FakeProbe {
    answers: HashMap<String, (Duration, ProbeVerdict)>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, url: &str, after: Duration, verdict: ProbeVerdict) -> Self {
        self.answers.insert(url.to_string(), (after, verdict));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn probe(&self, url: &str) -> ProbeVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answers.get(url) {
            Some((after, verdict)) => {
                time::sleep(*after).await;
                *verdict
            }
            None => ProbeVerdict::Inconclusive,
        }
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    config: Mutex<Option<AppConfig>>,
    saves: Mutex<Vec<(String, String)>>,
}

impl MemoryConfigStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_credentials(username: &str, password: &str) -> Self {
        let mut cfg = AppConfig::default();
        cfg.credentials.username = username.to_string();
        cfg.credentials.password = encode_secret(password);
        Self::with_config(cfg)
    }

    pub fn with_config(cfg: AppConfig) -> Self {
        Self {
            config: Mutex::new(Some(cfg)),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn saves(&self) -> Vec<(String, String)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<AppConfig, ConfigError> {
        let cfg = self
            .config
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ConfigError::NotFound("memory".into()))?;
        require_credentials(&cfg)?;
        Ok(cfg)
    }

    async fn save_credentials(&self, username: &str, encoded_secret: &str) -> Result<(), ConfigError> {
        self.saves
            .lock()
            .unwrap()
            .push((username.to_string(), encoded_secret.to_string()));
        let mut guard = self.config.lock().unwrap();
        let cfg = guard.get_or_insert_with(AppConfig::default);
        cfg.credentials.username = username.to_string();
        cfg.credentials.password = encoded_secret.to_string();
        Ok(())
    }
}

/// Answers prompts from a queue; an empty queue declines.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<Option<(String, String)>>>,
    asked: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn declining() -> Self {
        Self::default()
    }

    pub fn answering(username: &str, password: &str) -> Self {
        let prompt = Self::default();
        prompt
            .answers
            .lock()
            .unwrap()
            .push_back(Some((username.to_string(), password.to_string())));
        prompt
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialPrompt for ScriptedPrompt {
    async fn ask_for_credentials(&self) -> Option<(String, String)> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answers.lock().unwrap().pop_front().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Alert(String, String),
    Info(String, String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> usize {
        self.notices()
            .iter()
            .filter(|n| matches!(n, Notice::Alert(..)))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, title: &str, message: &str) {
        self.notices
            .lock()
            .unwrap()
            .push(Notice::Alert(title.to_string(), message.to_string()));
    }

    fn info(&self, title: &str, message: &str) {
        self.notices
            .lock()
            .unwrap()
            .push(Notice::Info(title.to_string(), message.to_string()));
    }
}

//! Test doubles for exercising the pipeline without a real browser.
//!
//! [`ScriptedFactory`] and [`ScriptedSession`] let tests script session
//! opens and navigations to succeed or fail in a fixed order, and count
//! opens and closes to assert on session lifecycle.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::errors::{HarvestError, SessionStartError};
use crate::session::{BrowserSession, SessionFactory};

/// Shared queue of scripted navigation results.
///
/// Each navigation pops the front entry; an empty queue means success.
pub type NavScript = Arc<Mutex<VecDeque<Result<(), HarvestError>>>>;

/// Builds a navigation script from a list of results.
#[must_use]
pub fn nav_script(results: Vec<Result<(), HarvestError>>) -> NavScript {
    Arc::new(Mutex::new(results.into_iter().collect()))
}

/// A fake browser session that replays a scripted sequence of navigation
/// results and always serves the same markup.
pub struct ScriptedSession {
    content: String,
    script: NavScript,
    visited: Mutex<Vec<String>>,
    redirect_to: Option<String>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl ScriptedSession {
    /// Creates a session serving `content` with every navigation
    /// succeeding.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            script: nav_script(Vec::new()),
            visited: Mutex::new(Vec::new()),
            redirect_to: None,
            closes: Arc::new(AtomicUsize::new(0)),
            closed: false,
        }
    }

    /// Replaces the navigation script.
    #[must_use]
    pub fn with_script(mut self, script: NavScript) -> Self {
        self.script = script;
        self
    }

    /// Makes every navigation land on `url`, simulating a redirect.
    #[must_use]
    pub fn with_redirect_to(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }

    /// URLs navigated to so far.
    #[must_use]
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), HarvestError> {
        self.visited.lock().push(url.to_string());
        match self.script.lock().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn current_content(&self) -> String {
        self.content.clone()
    }

    async fn current_url(&self) -> Option<String> {
        match &self.redirect_to {
            Some(url) => Some(url.clone()),
            None => self.visited.lock().last().cloned(),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A factory producing [`ScriptedSession`]s, with configurable open
/// failures and shared open/close counters.
pub struct ScriptedFactory {
    content: String,
    script: NavScript,
    fail_first_opens: usize,
    always_fail: bool,
    opened: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    /// Creates a factory whose sessions serve `content`.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            script: nav_script(Vec::new()),
            fail_first_opens: 0,
            always_fail: false,
            opened: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sessions share this navigation script; results are consumed across
    /// sessions in order.
    #[must_use]
    pub fn with_nav_script(mut self, script: NavScript) -> Self {
        self.script = script;
        self
    }

    /// Makes the first `count` opens fail before succeeding.
    #[must_use]
    pub fn fail_first_opens(mut self, count: usize) -> Self {
        self.fail_first_opens = count;
        self
    }

    /// Makes every open fail.
    #[must_use]
    pub fn always_fail(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Number of open attempts so far, including failed ones.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of sessions closed so far.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(
        &self,
        _config: &SessionConfig,
    ) -> Result<Box<dyn BrowserSession>, SessionStartError> {
        let attempt = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail || attempt <= self.fail_first_opens {
            return Err(SessionStartError::new(format!(
                "scripted open failure on attempt {attempt}"
            )));
        }
        Ok(Box::new(ScriptedSession {
            content: self.content.clone(),
            script: Arc::clone(&self.script),
            visited: Mutex::new(Vec::new()),
            redirect_to: None,
            closes: Arc::clone(&self.closes),
            closed: false,
        }))
    }
}

/// Installs a test-friendly tracing subscriber, once per process.
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

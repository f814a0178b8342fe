//! Browser session abstraction.
//!
//! Workers fetch JavaScript-rendered pages through a [`BrowserSession`],
//! opened on demand from a [`SessionFactory`]. The trait seam keeps the
//! pipeline testable without a real browser; a Chromium-backed
//! implementation lives behind the `browser` feature.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::errors::{HarvestError, SessionStartError};

#[cfg(feature = "browser")]
pub mod chromium;

#[cfg(feature = "browser")]
pub use chromium::ChromiumFactory;

/// A live browser session capable of rendering pages.
///
/// A session may serve many navigations; the worker that opened it owns it
/// exclusively, so methods take `&mut self`. Implementations must make
/// [`close`](BrowserSession::close) idempotent.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigates to `url` and waits for the page to render.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::NavigationTimeout`] when rendering exceeds
    /// `timeout`, or [`HarvestError::Navigation`] for other failures. After
    /// an error the session may be in an unusable state; callers decide
    /// whether to retry or replace it.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), HarvestError>;

    /// Returns the current rendered page markup.
    ///
    /// Returns an empty string if no page has been loaded.
    async fn current_content(&self) -> String;

    /// Returns the current page URL after any redirects.
    ///
    /// Returns `None` if no page has been loaded.
    async fn current_url(&self) -> Option<String>;

    /// Releases the underlying browser resources.
    async fn close(&mut self);
}

/// Opens browser sessions for workers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Opens a fresh session configured per `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStartError`] if the browser fails to start within
    /// the configured startup timeout.
    async fn open(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>, SessionStartError>;
}

/// Factory for jobs that only fetch static pages.
///
/// Any attempt to open a session fails, which surfaces misconfigured
/// browser-mode targets instead of hanging on a missing browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowserFactory;

#[async_trait]
impl SessionFactory for NoBrowserFactory {
    async fn open(
        &self,
        _config: &SessionConfig,
    ) -> Result<Box<dyn BrowserSession>, SessionStartError> {
        Err(SessionStartError::new(
            "browser support not enabled; use static targets or a browser-backed factory",
        ))
    }
}

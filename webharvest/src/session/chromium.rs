//! Chromium-backed [`BrowserSession`] via `chromiumoxide`.
//!
//! Each session owns a dedicated browser process with an isolated,
//! temporary user-data directory that is removed when the session closes.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::SessionConfig;
use crate::errors::{HarvestError, SessionStartError};
use crate::session::{BrowserSession, SessionFactory};

/// Opens Chromium sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumFactory;

#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn open(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>, SessionStartError> {
        let profile_dir = TempDir::new()
            .map_err(|e| SessionStartError::new(format!("failed to create profile dir: {e}")))?;

        let mut builder = BrowserConfig::builder()
            .window_size(config.window_width, config.window_height)
            .user_data_dir(profile_dir.path())
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.arg(format!("--user-agent={agent}"));
        }
        let browser_config = builder
            .build()
            .map_err(SessionStartError::new)?;

        let (browser, mut handler) = timeout(config.startup_timeout(), Browser::launch(browser_config))
            .await
            .map_err(|_| SessionStartError::new("browser did not start within startup timeout"))?
            .map_err(|e| SessionStartError::new(format!("browser launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(ChromiumSession {
            browser,
            page: None,
            handler_task,
            profile_dir: Some(profile_dir),
            settle_delay: config.settle_delay(),
            closed: false,
        }))
    }
}

/// A live Chromium browser with a single reusable tab.
pub struct ChromiumSession {
    browser: Browser,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
    profile_dir: Option<TempDir>,
    settle_delay: Duration,
    closed: bool,
}

impl ChromiumSession {
    async fn ensure_page(&mut self) -> Result<&Page, HarvestError> {
        if self.page.is_none() {
            let page = self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| HarvestError::Navigation {
                    url: "about:blank".to_string(),
                    message: format!("failed to open tab: {e}"),
                })?;
            self.page = Some(page);
        }
        // Just populated above when absent.
        self.page.as_ref().ok_or_else(|| HarvestError::Navigation {
            url: "about:blank".to_string(),
            message: "tab vanished after open".to_string(),
        })
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, nav_timeout: Duration) -> Result<(), HarvestError> {
        let settle = self.settle_delay;
        let page = self.ensure_page().await?;

        let load = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        };
        match timeout(nav_timeout, load).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(HarvestError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(HarvestError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_ms: u64::try_from(nav_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        // Give late-running scripts a chance to populate the DOM.
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    async fn current_content(&self) -> String {
        match &self.page {
            Some(page) => page.content().await.unwrap_or_default(),
            None => String::new(),
        }
    }

    async fn current_url(&self) -> Option<String> {
        match &self.page {
            Some(page) => page.url().await.ok().flatten(),
            None => None,
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.page = None;
        if self.browser.close().await.is_ok() {
            let _ = self.browser.wait().await;
        }
        self.handler_task.abort();
        if let Some(dir) = self.profile_dir.take() {
            let _ = dir.close();
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if !self.closed {
            self.handler_task.abort();
        }
    }
}

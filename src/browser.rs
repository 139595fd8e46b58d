//! Browser collaborator seams and the shared browser supervisor
//!
//! The orchestrator only talks to [`PageSource`] and [`PageHandle`]. The
//! CDP backend implements them over `headless_chrome`; tests implement them
//! with in-memory fakes.
//!
//! [`BrowserSupervisor`] owns the single process-wide browser. It launches it
//! lazily, retries failed launches after a delay, lets only one launch be in
//! flight, keeps relaunching in the background once a launch has given up,
//! and replaces a cached browser that stops handing out pages.

use crate::scene::SceneAssets;
use crate::{Error, Result, Viewport};
use futures::future::BoxFuture;
use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Screenshot clip rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ClipRect {
    /// The central `ratio`×`ratio` region of a `width`×`height` viewport.
    ///
    /// `ratio` is clamped into `[0, 1]`; a non-finite ratio keeps the whole viewport.
    pub fn centered(width: u32, height: u32, ratio: f64) -> Self {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 1.0 };
        let clip_width = (width as f64 * ratio).floor() as u32;
        let clip_height = (height as f64 * ratio).floor() as u32;
        Self {
            x: width.saturating_sub(clip_width) / 2,
            y: height.saturating_sub(clip_height) / 2,
            width: clip_width,
            height: clip_height,
        }
    }
}

/// One page (tab) owned by a single render request.
pub trait PageHandle: Send + Sync {
    /// Size the output surface at a device scale factor of 1.
    fn set_viewport(&self, viewport: Viewport) -> BoxFuture<'_, Result<()>>;

    /// Serve `assets` for requests the page makes to the scene origin.
    fn mount(&self, assets: SceneAssets) -> BoxFuture<'_, Result<()>>;

    /// Register for the scene's ready signal. Must happen before navigation;
    /// the receiver yields the raw payload the scene reported.
    fn subscribe_ready(&self) -> BoxFuture<'_, Result<oneshot::Receiver<String>>>;

    /// Navigate and, if `wait_until_idle`, wait for the document to finish loading.
    ///
    /// Backends may only wait for the load event rather than network idle.
    /// Requests started after load are covered by the scene's ready signal.
    fn navigate(&self, url: String, wait_until_idle: bool) -> BoxFuture<'_, Result<()>>;

    /// Run a script in the page for its side effects.
    fn evaluate(&self, script: String) -> BoxFuture<'_, Result<()>>;

    /// Capture a PNG of `clip`, optionally without the page background.
    fn screenshot(&self, clip: ClipRect, transparent_background: bool) -> BoxFuture<'_, Result<Vec<u8>>>;

    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Hands out fresh pages.
pub trait PageSource: Send + Sync {
    type Page: PageHandle + 'static;

    fn acquire_page(&self) -> BoxFuture<'_, Result<Self::Page>>;
}

/// A running browser process.
pub trait BrowserHandle: Send + Sync + 'static {
    type Page: PageHandle + 'static;

    fn new_page(&self) -> BoxFuture<'_, Result<Self::Page>>;

    /// Whether the process still answers protocol calls.
    fn is_alive(&self) -> BoxFuture<'_, bool>;

    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Starts browser processes.
pub trait BrowserLauncher: Send + Sync + 'static {
    type Browser: BrowserHandle;

    fn launch(&self) -> BoxFuture<'_, Result<Self::Browser>>;
}

/// Health of the shared browser, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserStatus {
    Initializing,
    Ready,
    Error,
    Closed,
}

/// Relaunch policy for the shared browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between launch attempts.
    pub backoff: Duration,
    /// Launch attempts per (re)initialization before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(5000),
            max_attempts: 3,
        }
    }
}

struct Inner<L: BrowserLauncher> {
    launcher: L,
    policy: RetryPolicy,
    // Held across a launch so at most one (re)initialization is in flight.
    slot: Mutex<Option<Arc<L::Browser>>>,
    status: RwLock<BrowserStatus>,
    relaunch_pending: AtomicBool,
}

/// Owner of the shared browser process. Cheap to clone.
pub struct BrowserSupervisor<L: BrowserLauncher> {
    inner: Arc<Inner<L>>,
}

impl<L: BrowserLauncher> Clone for BrowserSupervisor<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: BrowserLauncher> BrowserSupervisor<L> {
    pub fn new(launcher: L, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                policy,
                slot: Mutex::new(None),
                status: RwLock::new(BrowserStatus::Initializing),
                relaunch_pending: AtomicBool::new(false),
            }),
        }
    }

    pub fn status(&self) -> BrowserStatus {
        self.inner
            .status
            .read()
            .map(|s| *s)
            .unwrap_or(BrowserStatus::Error)
    }

    fn set_status(&self, status: BrowserStatus) {
        if let Ok(mut s) = self.inner.status.write() {
            *s = status;
        }
    }

    /// The shared browser, launching it if needed.
    ///
    /// Launches are retried `max_attempts` times with `backoff` in between.
    /// If every attempt fails a background task keeps relaunching so later
    /// requests find a browser again.
    pub async fn browser(&self) -> Result<Arc<L::Browser>> {
        let attempts = self.inner.policy.max_attempts.max(1);
        let mut last_err = String::new();

        for attempt in 1..=attempts {
            match self.launch_once().await {
                Ok(browser) => return Ok(browser),
                Err(e @ Error::BrowserUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!("browser launch failed (attempt {}/{}): {}", attempt, attempts, e);
                    last_err = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.inner.policy.backoff).await;
                    }
                }
            }
        }

        self.schedule_relaunch();
        Err(Error::BrowserUnavailable(last_err))
    }

    // Return the cached browser or make a single launch attempt.
    async fn launch_once(&self) -> Result<Arc<L::Browser>> {
        let mut slot = self.inner.slot.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }
        if self.status() == BrowserStatus::Closed {
            return Err(Error::BrowserUnavailable("browser has been shut down".into()));
        }

        match self.inner.launcher.launch().await {
            Ok(browser) => {
                info!("browser launched");
                let browser = Arc::new(browser);
                *slot = Some(browser.clone());
                self.set_status(BrowserStatus::Ready);
                Ok(browser)
            }
            Err(e) => {
                self.set_status(BrowserStatus::Error);
                Err(e)
            }
        }
    }

    fn schedule_relaunch(&self) {
        if self.inner.relaunch_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let supervisor = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(supervisor.inner.policy.backoff).await;
                if supervisor.status() == BrowserStatus::Closed {
                    break;
                }
                match supervisor.launch_once().await {
                    Ok(_) => break,
                    Err(e) => warn!("background browser relaunch failed: {}", e),
                }
            }
            supervisor.inner.relaunch_pending.store(false, Ordering::SeqCst);
        });
    }

    /// Drop `browser` if it is still the cached one. Returns whether it was.
    pub async fn invalidate(&self, browser: &Arc<L::Browser>) -> bool {
        let stale = {
            let mut slot = self.inner.slot.lock().await;
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, browser) => slot.take(),
                _ => None,
            }
        };
        let Some(stale) = stale else {
            return false;
        };

        warn!("dropping unresponsive shared browser");
        self.set_status(BrowserStatus::Error);
        if let Err(e) = stale.close().await {
            warn!("failed to close stale browser: {}", e);
        }
        true
    }

    /// Close the browser and refuse further launches.
    pub async fn shutdown(&self) -> Result<()> {
        let browser = {
            let mut slot = self.inner.slot.lock().await;
            self.set_status(BrowserStatus::Closed);
            slot.take()
        };
        if let Some(browser) = browser {
            info!("closing shared browser");
            browser.close().await?;
        }
        Ok(())
    }
}

impl<L: BrowserLauncher> PageSource for BrowserSupervisor<L> {
    type Page = <L::Browser as BrowserHandle>::Page;

    fn acquire_page(&self) -> BoxFuture<'_, Result<Self::Page>> {
        Box::pin(async move {
            let browser = self.browser().await?;
            match browser.new_page().await {
                Ok(page) => Ok(page),
                Err(first) => {
                    // A live browser keeps serving the other renders.
                    if browser.is_alive().await {
                        warn!("failed to open page on a live browser: {}", first);
                        return Err(first);
                    }
                    // The cached browser died; relaunch and retry once.
                    warn!("failed to open page, browser is gone: {}", first);
                    self.invalidate(&browser).await;
                    let browser = self.browser().await?;
                    browser
                        .new_page()
                        .await
                        .map_err(|e| Error::BrowserUnavailable(format!("failed to open page: {}", e)))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_is_central_half_of_viewport() {
        assert_eq!(
            ClipRect::centered(1024, 1024, 0.5),
            ClipRect { x: 256, y: 256, width: 512, height: 512 }
        );
        assert_eq!(
            ClipRect::centered(64, 128, 0.5),
            ClipRect { x: 16, y: 32, width: 32, height: 64 }
        );
    }

    #[test]
    fn clip_ratio_out_of_range_is_clamped() {
        assert_eq!(
            ClipRect::centered(512, 512, 1.5),
            ClipRect { x: 0, y: 0, width: 512, height: 512 }
        );
        assert_eq!(ClipRect::centered(512, 512, f64::NAN), ClipRect::centered(512, 512, 1.0));
        assert_eq!(ClipRect::centered(512, 512, -0.5).width, 0);
    }

    #[test]
    fn clip_floors_odd_sizes() {
        assert_eq!(
            ClipRect::centered(101, 99, 0.5),
            ClipRect { x: 25, y: 25, width: 50, height: 49 }
        );
    }
}

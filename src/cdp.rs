//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)
//!
//! `headless_chrome` is synchronous, so every protocol call runs on tokio's
//! blocking pool. Each page serves the mounted [`SceneAssets`] through Fetch
//! interception and forwards the scene's ready report from the page binding
//! into a oneshot channel.

use crate::browser::{BrowserHandle, BrowserLauncher, ClipRect, PageHandle};
use crate::scene::{SceneAssets, READY_BINDING, SCENE_ORIGIN};
use crate::{BrowserConfig, Error, Result, Viewport};
use base64::Engine as Base64Engine;
use futures::future::BoxFuture;
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision, Tab};
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FulfillRequest, HeaderEntry};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use serde_json::json;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

type ReadySlot = Arc<Mutex<Option<oneshot::Sender<String>>>>;
type AssetSlot = Arc<Mutex<Option<SceneAssets>>>;

/// Run a synchronous protocol call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::CdpError(format!("Blocking task failed: {}", e)))?
}

/// Extra command-line switches for the browser process.
pub fn chrome_args(config: &BrowserConfig) -> Vec<String> {
    let mut args = Vec::new();
    if !config.sandbox {
        args.push("--disable-setuid-sandbox".to_string());
    }
    args.push("--disable-dev-shm-usage".to_string());
    args.extend(config.extra_args.iter().cloned());
    args
}

/// Launches headless Chrome processes.
#[derive(Debug, Clone)]
pub struct CdpLauncher {
    config: BrowserConfig,
}

impl CdpLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn launch_blocking(config: &BrowserConfig) -> Result<CdpBrowser> {
        let args = chrome_args(config);
        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(config.sandbox)
            .path(config.chrome_path.clone())
            .args(args.iter().map(OsStr::new).collect())
            // The supervisor keeps the process alive between requests.
            .idle_browser_timeout(Duration::from_millis(config.idle_timeout_ms))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;

        Ok(CdpBrowser {
            browser: Mutex::new(Some(Arc::new(browser))),
            page_timeout: Duration::from_millis(config.page_timeout_ms),
        })
    }
}

impl BrowserLauncher for CdpLauncher {
    type Browser = CdpBrowser;

    fn launch(&self) -> BoxFuture<'_, Result<CdpBrowser>> {
        let config = self.config.clone();
        Box::pin(async move {
            info!("launching headless browser");
            blocking(move || Self::launch_blocking(&config)).await
        })
    }
}

/// A running Chrome process.
pub struct CdpBrowser {
    // Taken on close; dropping the last handle kills the process.
    browser: Mutex<Option<Arc<Browser>>>,
    page_timeout: Duration,
}

impl CdpBrowser {
    fn handle(&self) -> Result<Arc<Browser>> {
        self.browser
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or_else(|| Error::CdpError("browser is closed".into()))
    }
}

impl BrowserHandle for CdpBrowser {
    type Page = CdpPage;

    fn new_page(&self) -> BoxFuture<'_, Result<CdpPage>> {
        Box::pin(async move {
            let browser = self.handle()?;
            let timeout = self.page_timeout;
            blocking(move || CdpPage::open(&browser, timeout)).await
        })
    }

    fn is_alive(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Ok(browser) = self.handle() else {
                return false;
            };
            blocking(move || Ok(browser.get_version().is_ok()))
                .await
                .unwrap_or(false)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let browser = self.browser.lock().ok().and_then(|mut slot| slot.take());
            if let Some(browser) = browser {
                // Dropping waits for the child process to exit.
                blocking(move || {
                    drop(browser);
                    Ok(())
                })
                .await?;
            }
            Ok(())
        })
    }
}

/// One tab hosting one render. Dropping an unclosed page closes its tab.
pub struct CdpPage {
    tab: Arc<Tab>,
    assets: AssetSlot,
    ready: ReadySlot,
    closed: Arc<AtomicBool>,
}

impl CdpPage {
    fn open(browser: &Browser, timeout: Duration) -> Result<Self> {
        let tab = browser
            .new_tab()
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(timeout);

        let assets: AssetSlot = Arc::new(Mutex::new(None));
        let ready: ReadySlot = Arc::new(Mutex::new(None));

        Self::install_ready_binding(&tab, ready.clone())?;
        Self::install_asset_server(&tab, assets.clone())?;

        Ok(Self {
            tab,
            assets,
            ready,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    // The scene calls the binding once with a JSON report.
    fn install_ready_binding(tab: &Arc<Tab>, ready: ReadySlot) -> Result<()> {
        tab.expose_function(
            READY_BINDING,
            Arc::new(move |payload: serde_json::Value| {
                let report = match payload.as_str() {
                    Some(s) => s.to_string(),
                    None => payload.to_string(),
                };
                debug!("scene reported: {}", report);
                let sender = ready.lock().ok().and_then(|mut slot| slot.take());
                match sender {
                    Some(tx) => {
                        let _ = tx.send(report);
                    }
                    None => warn!("ready report with no subscriber: {}", report),
                }
            }),
        )
        .map_err(|e| Error::CdpError(format!("Failed to expose ready binding: {}", e)))
    }

    // Requests to the scene origin are answered from the mounted assets.
    fn install_asset_server(tab: &Arc<Tab>, assets: AssetSlot) -> Result<()> {
        tab.enable_fetch(None, Some(false))
            .map_err(|e| Error::CdpError(format!("Failed to enable fetch domain: {}", e)))?;

        let interceptor: Arc<dyn RequestInterceptor + Send + Sync> =
            Arc::new(move |_transport, _session_id, event: RequestPausedEvent| {
                let url = event.params.request.url.clone();
                if !url.starts_with(SCENE_ORIGIN) {
                    return RequestPausedDecision::Continue(None);
                }

                let served = assets
                    .lock()
                    .ok()
                    .and_then(|slot| slot.as_ref().and_then(|a| a.resolve(&url)).cloned());
                let (status, content_type, body) = match served {
                    Some(asset) => (200, asset.content_type, asset.body),
                    None => {
                        debug!("no scene asset for {}", url);
                        (404, "text/plain", b"not found".to_vec())
                    }
                };

                RequestPausedDecision::Fulfill(FulfillRequest {
                    request_id: event.params.request_id.clone(),
                    response_code: status,
                    response_headers: Some(vec![
                        HeaderEntry {
                            name: "Content-Type".to_string(),
                            value: content_type.to_string(),
                        },
                        HeaderEntry {
                            name: "Cache-Control".to_string(),
                            value: "no-store".to_string(),
                        },
                    ]),
                    binary_response_headers: None,
                    body: Some(base64::engine::general_purpose::STANDARD.encode(&body)),
                    response_phrase: None,
                })
            });

        tab.enable_request_interception(interceptor)
            .map_err(|e| Error::CdpError(format!("Failed to enable request interception: {}", e)))
    }

    fn set_background_transparent(tab: &Tab, transparent: bool) -> Result<()> {
        let params = if transparent {
            json!({ "color": { "r": 0, "g": 0, "b": 0, "a": 0.0 } })
        } else {
            json!({})
        };
        let method: Emulation::SetDefaultBackgroundColorOverride = serde_json::from_value(params)
            .map_err(|e| Error::CdpError(format!("Invalid background override: {}", e)))?;
        tab.call_method(method)
            .map_err(|e| Error::CdpError(format!("Failed to override background: {}", e)))?;
        Ok(())
    }
}

impl PageHandle for CdpPage {
    fn set_viewport(&self, viewport: Viewport) -> BoxFuture<'_, Result<()>> {
        let tab = self.tab.clone();
        Box::pin(blocking(move || {
            let method: Emulation::SetDeviceMetricsOverride = serde_json::from_value(json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            }))
            .map_err(|e| Error::CdpError(format!("Invalid device metrics: {}", e)))?;
            tab.call_method(method)
                .map_err(|e| Error::CdpError(format!("Failed to set viewport: {}", e)))?;
            Ok(())
        }))
    }

    fn mount(&self, assets: SceneAssets) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut slot = self
                .assets
                .lock()
                .map_err(|_| Error::CdpError("asset slot poisoned".into()))?;
            *slot = Some(assets);
            Ok(())
        })
    }

    fn subscribe_ready(&self) -> BoxFuture<'_, Result<oneshot::Receiver<String>>> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            let mut slot = self
                .ready
                .lock()
                .map_err(|_| Error::CdpError("ready slot poisoned".into()))?;
            *slot = Some(tx);
            Ok(rx)
        })
    }

    fn navigate(&self, url: String, wait_until_idle: bool) -> BoxFuture<'_, Result<()>> {
        let tab = self.tab.clone();
        Box::pin(blocking(move || {
            tab.navigate_to(&url)
                .map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))?;
            if wait_until_idle {
                tab.wait_until_navigated()
                    .map_err(|e| Error::CdpError(format!("Wait for navigation failed: {}", e)))?;
            }
            Ok(())
        }))
    }

    fn evaluate(&self, script: String) -> BoxFuture<'_, Result<()>> {
        let tab = self.tab.clone();
        Box::pin(blocking(move || {
            tab.evaluate(&script, false)
                .map_err(|e| Error::CdpError(format!("Evaluation failed: {}", e)))?;
            Ok(())
        }))
    }

    fn screenshot(&self, clip: ClipRect, transparent_background: bool) -> BoxFuture<'_, Result<Vec<u8>>> {
        let tab = self.tab.clone();
        Box::pin(blocking(move || {
            if transparent_background {
                Self::set_background_transparent(&tab, true)?;
            }
            let shot = tab
                .capture_screenshot(
                    Page::CaptureScreenshotFormatOption::Png,
                    None,
                    Some(Page::Viewport {
                        x: clip.x as f64,
                        y: clip.y as f64,
                        width: clip.width as f64,
                        height: clip.height as f64,
                        scale: 1.0,
                    }),
                    true,
                )
                .map_err(|e| Error::CdpError(format!("Screenshot failed: {}", e)));
            if transparent_background {
                if let Err(e) = Self::set_background_transparent(&tab, false) {
                    warn!("failed to restore page background: {}", e);
                }
            }
            shot
        }))
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        let tab = self.tab.clone();
        let assets = self.assets.clone();
        let closed = self.closed.clone();
        Box::pin(blocking(move || {
            if let Ok(mut slot) = assets.lock() {
                slot.take();
            }
            if closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            tab.close(false)
                .map_err(|e| Error::CdpError(format!("Failed to close tab: {}", e)))?;
            Ok(())
        }))
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The tab outlives its Rust handle unless the target is closed.
        let tab = self.tab.clone();
        let close = move || {
            if let Err(e) = tab.close(false) {
                warn!("failed to close dropped tab: {}", e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(close);
            }
            Err(_) => close(),
        }
    }
}

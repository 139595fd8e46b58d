//! Minecraft skin renderer
//!
//! Turns a 64×64 skin atlas into two products:
//!
//! - a flat 16×16 **face icon** (base face cell with the hat cell composited
//!   on top), computed in-process with the `image` crate
//! - a **3D head portrait**, drawn by a WebGL scene in a shared headless
//!   Chrome instance and captured as a transparent PNG
//!
//! # Features
//!
//! - **cdp** (default): headless Chrome backend via the DevTools Protocol
//! - **fetch** (default): client for the public skin texture host
//!
//! # Example
//!
//! ```no_run
//! use mcskin_render::RenderConfig;
//!
//! # async fn run() -> mcskin_render::Result<()> {
//! let renderer = mcskin_render::cdp_renderer(RenderConfig::default())?;
//!
//! let skin = std::fs::read("steve.png")?;
//! let head = renderer.render_head(&skin, 512, 512).await?;
//! std::fs::write("head.png", head.as_bytes())?;
//!
//! let face = mcskin_render::render_face(&skin)?;
//! std::fs::write("face.png", face)?;
//!
//! renderer.pages().shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod atlas;
pub mod browser;
pub mod face;
pub mod model;
pub mod orchestrator;
pub mod scene;
pub mod validate;

#[cfg(feature = "cdp")]
pub mod cdp;

#[cfg(feature = "fetch")]
pub mod texture_host;

pub use atlas::SkinImage;
pub use browser::{BrowserStatus, BrowserSupervisor, ClipRect, PageHandle, PageSource, RetryPolicy};
pub use face::render_face;
pub use model::{LayeredHeadModel, ShellConfig};
pub use orchestrator::{HeadRenderer, RenderRequest, RenderStage, RenderedImage};

#[cfg(feature = "cdp")]
pub use cdp::CdpLauncher;

#[cfg(feature = "fetch")]
pub use texture_host::TextureHost;

/// Output surface dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

/// Configuration for the shared browser process
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run Chrome without a window
    pub headless: bool,
    /// Keep Chrome's sandbox on. Containers usually need it off.
    pub sandbox: bool,
    /// Chrome executable; `None` lets the backend locate one
    pub chrome_path: Option<PathBuf>,
    /// Additional command-line switches
    pub extra_args: Vec<String>,
    /// How long the browser may sit without pages before the backend gives up on it
    pub idle_timeout_ms: u64,
    /// Default timeout for individual protocol calls on a page
    pub page_timeout_ms: u64,
    /// Launch retry policy
    pub retry: RetryPolicy,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: false,
            chrome_path: None,
            extra_args: Vec::new(),
            // One day; the supervisor owns the process lifetime.
            idle_timeout_ms: 24 * 60 * 60 * 1000,
            page_timeout_ms: 30000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Configuration for head rendering
///
/// The defaults reproduce the production renderer: 30 s navigation budget,
/// two 100 ms settle delays, the central half of the viewport captured.
///
/// # Examples
///
/// ```
/// let cfg = mcskin_render::RenderConfig::default();
/// assert_eq!(cfg.clip_ratio, 0.5);
/// assert_eq!(cfg.shells.outer_alpha_test, 0.15);
/// ```
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Budget for navigating to the scene document
    pub navigation_timeout_ms: u64,
    /// Budget for the scene's ready signal after navigation
    pub ready_timeout_ms: u64,
    /// Pause after the ready signal before touching the page
    pub settle_delay_ms: u64,
    /// Pause after re-centering the canvas before capturing
    pub relayout_delay_ms: u64,
    /// Budget for the screenshot itself
    pub capture_timeout_ms: u64,
    /// Fraction of each viewport edge kept by the capture clip
    pub clip_ratio: f64,
    /// Hat shell tunables
    pub shells: ShellConfig,
    /// Browser process settings
    pub browser: BrowserConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30000,
            ready_timeout_ms: 10000,
            settle_delay_ms: 100,
            relayout_delay_ms: 100,
            capture_timeout_ms: 10000,
            clip_ratio: 0.5,
            shells: ShellConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Defaults overridden by `MCSKIN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `MCSKIN_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        set_parsed(&get, "MCSKIN_NAV_TIMEOUT_MS", &mut cfg.navigation_timeout_ms)?;
        set_parsed(&get, "MCSKIN_READY_TIMEOUT_MS", &mut cfg.ready_timeout_ms)?;
        set_parsed(&get, "MCSKIN_SETTLE_DELAY_MS", &mut cfg.settle_delay_ms)?;
        set_parsed(&get, "MCSKIN_RELAYOUT_DELAY_MS", &mut cfg.relayout_delay_ms)?;
        set_parsed(&get, "MCSKIN_CAPTURE_TIMEOUT_MS", &mut cfg.capture_timeout_ms)?;
        set_parsed(&get, "MCSKIN_CLIP_RATIO", &mut cfg.clip_ratio)?;
        set_parsed(&get, "MCSKIN_OUTER_ALPHA_TEST", &mut cfg.shells.outer_alpha_test)?;
        set_parsed(&get, "MCSKIN_INNER_ALPHA_TEST", &mut cfg.shells.inner_alpha_test)?;

        let browser = &mut cfg.browser;
        set_parsed(&get, "MCSKIN_HEADLESS", &mut browser.headless)?;
        set_parsed(&get, "MCSKIN_SANDBOX", &mut browser.sandbox)?;
        set_parsed(&get, "MCSKIN_BROWSER_IDLE_TIMEOUT_MS", &mut browser.idle_timeout_ms)?;
        set_parsed(&get, "MCSKIN_PAGE_TIMEOUT_MS", &mut browser.page_timeout_ms)?;
        set_parsed(&get, "MCSKIN_BROWSER_MAX_ATTEMPTS", &mut browser.retry.max_attempts)?;
        if let Some(path) = get("MCSKIN_CHROME_PATH") {
            browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(args) = get("MCSKIN_CHROME_ARGS") {
            browser.extra_args = args.split_whitespace().map(str::to_string).collect();
        }
        let mut backoff_ms = browser.retry.backoff.as_millis() as u64;
        set_parsed(&get, "MCSKIN_BROWSER_RETRY_MS", &mut backoff_ms)?;
        browser.retry.backoff = Duration::from_millis(backoff_ms);

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the renderer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.clip_ratio > 0.0 && self.clip_ratio <= 1.0) {
            return Err(Error::ConfigError(format!(
                "clip_ratio must be in (0, 1], got {}",
                self.clip_ratio
            )));
        }
        for (name, value) in [
            ("outer_alpha_test", self.shells.outer_alpha_test),
            ("inner_alpha_test", self.shells.inner_alpha_test),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::ConfigError(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }
        if self.navigation_timeout_ms == 0 || self.ready_timeout_ms == 0 || self.capture_timeout_ms == 0 {
            return Err(Error::ConfigError("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

fn set_parsed<T, G>(get: &G, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| Error::ConfigError(format!("{}={:?}: {}", name, raw, e)))?;
    }
    Ok(())
}

/// Head renderer backed by a lazily launched headless Chrome
///
/// No browser is started here; the first render launches it.
#[cfg(feature = "cdp")]
pub fn cdp_renderer(config: RenderConfig) -> Result<HeadRenderer<BrowserSupervisor<CdpLauncher>>> {
    let supervisor = BrowserSupervisor::new(CdpLauncher::new(config.browser.clone()), config.browser.retry);
    HeadRenderer::new(supervisor, config)
}

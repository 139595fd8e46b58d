//! Off-screen render of the 3D head
//!
//! One request walks `Idle → PageOpened → Navigated → TextureReady →
//! Rendered → Captured → Closed`. Any failure ends in `Failed` and is
//! reported as [`Error::RenderFailed`] carrying the last stage reached. The
//! page is closed on every path.

use crate::atlas::SkinImage;
use crate::browser::{ClipRect, PageHandle, PageSource};
use crate::model::LayeredHeadModel;
use crate::scene::{self, ReadySignal, SceneAssets};
use crate::{Error, RenderConfig, Result, Viewport};
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Smallest accepted output edge.
pub const MIN_DIMENSION: u32 = 64;
/// Largest accepted output edge.
pub const MAX_DIMENSION: u32 = 1024;
/// Output edge used when a request does not name one.
pub const DEFAULT_DIMENSION: u32 = 1024;

// Center the canvas in the viewport and drop page backgrounds before capture.
const CENTER_CANVAS_SCRIPT: &str = r#"(function () {
    document.body.style.backgroundColor = 'transparent';
    document.documentElement.style.backgroundColor = 'transparent';
    var canvas = document.querySelector('#container canvas');
    if (!canvas) return false;
    canvas.style.position = 'absolute';
    canvas.style.left = '50%';
    canvas.style.top = '50%';
    canvas.style.transform = 'translate(-50%, -50%)';
    var container = document.getElementById('container');
    container.style.width = '100%';
    container.style.height = '100%';
    container.style.display = 'flex';
    container.style.justifyContent = 'center';
    container.style.alignItems = 'center';
    return true;
})()"#;

/// Stages of one render request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStage {
    Idle,
    PageOpened,
    Navigated,
    TextureReady,
    Rendered,
    Captured,
    Closed,
    Failed,
}

impl RenderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderStage::Idle => "idle",
            RenderStage::PageOpened => "page_opened",
            RenderStage::Navigated => "navigated",
            RenderStage::TextureReady => "texture_ready",
            RenderStage::Rendered => "rendered",
            RenderStage::Captured => "captured",
            RenderStage::Closed => "closed",
            RenderStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a requested edge length into `[MIN_DIMENSION, MAX_DIMENSION]`.
pub fn clamp_dimension(value: i64) -> u32 {
    value.clamp(MIN_DIMENSION as i64, MAX_DIMENSION as i64) as u32
}

/// A validated head render request. Consumed by [`HeadRenderer::render`].
#[derive(Debug, Clone)]
pub struct RenderRequest {
    skin: SkinImage,
    viewport: Viewport,
}

impl RenderRequest {
    /// Decode the skin and clamp the requested size.
    pub fn new(skin_bytes: &[u8], width: i64, height: i64) -> Result<Self> {
        let skin = SkinImage::from_bytes(skin_bytes)?;
        Ok(Self::from_skin(skin, width, height))
    }

    pub fn from_skin(skin: SkinImage, width: i64, height: i64) -> Self {
        Self {
            skin,
            viewport: Viewport {
                width: clamp_dimension(width),
                height: clamp_dimension(height),
            },
        }
    }

    pub fn skin(&self) -> &SkinImage {
        &self.skin
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

/// A captured head render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    png: Vec<u8>,
    clip: ClipRect,
}

impl RenderedImage {
    /// PNG bytes (RGBA, alpha preserved).
    pub fn as_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.png
    }

    /// Viewport region the image was captured from.
    pub fn clip(&self) -> ClipRect {
        self.clip
    }
}

/// Renders heads on pages from a [`PageSource`].
pub struct HeadRenderer<S: PageSource> {
    pages: S,
    config: RenderConfig,
}

impl<S: PageSource> HeadRenderer<S> {
    /// Fails with `ConfigError` if `config` does not validate.
    pub fn new(pages: S, config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { pages, config })
    }

    pub fn pages(&self) -> &S {
        &self.pages
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render a head portrait for an encoded skin.
    pub async fn render_head(&self, skin_bytes: &[u8], width: i64, height: i64) -> Result<RenderedImage> {
        let request = RenderRequest::new(skin_bytes, width, height)?;
        self.render(request).await
    }

    /// Run one request through the state machine.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderedImage> {
        let viewport = request.viewport();

        // Everything that can fail on bad input happens before a page is opened.
        let model = LayeredHeadModel::build(request.skin(), &self.config.shells);
        let assets = SceneAssets::build(request.skin(), &model, viewport.width, viewport.height)?;
        let url = scene::scene_url(viewport.width, viewport.height, request.skin().digest())?;

        let page = self.pages.acquire_page().await.map_err(|e| match e {
            Error::BrowserUnavailable(_) => e,
            other => Error::render_failed(RenderStage::Idle, other),
        })?;
        let page = PageGuard::new(page);

        let mut stage = RenderStage::Idle;
        advance(&mut stage, RenderStage::PageOpened);
        let outcome = self.drive(page.page(), viewport, assets, url, &mut stage).await;

        page.close().await;

        match outcome {
            Ok(image) => {
                advance(&mut stage, RenderStage::Closed);
                info!(
                    "rendered head {}x{} for skin {}",
                    viewport.width,
                    viewport.height,
                    request.skin().digest()
                );
                Ok(image)
            }
            Err(e) => {
                let reached = stage;
                advance(&mut stage, RenderStage::Failed);
                warn!("render failed at {}: {}", reached, e);
                Err(Error::render_failed(reached, e))
            }
        }
    }

    async fn drive(
        &self,
        page: &S::Page,
        viewport: Viewport,
        assets: SceneAssets,
        url: String,
        stage: &mut RenderStage,
    ) -> Result<RenderedImage> {
        let cfg = &self.config;

        page.set_viewport(viewport).await?;
        page.mount(assets).await?;
        // Subscribe first: the scene may report before navigation returns.
        let ready = page.subscribe_ready().await?;
        with_timeout(cfg.navigation_timeout_ms, page.navigate(url, true)).await?;
        advance(stage, RenderStage::Navigated);

        let payload = tokio::time::timeout(Duration::from_millis(cfg.ready_timeout_ms), ready)
            .await
            .map_err(|_| Error::Timeout(cfg.ready_timeout_ms))?
            .map_err(|_| Error::Other("page went away before the scene reported".into()))?;
        if let ReadySignal::Error { message } = ReadySignal::parse(&payload) {
            return Err(Error::Other(format!("scene reported failure: {}", message)));
        }
        // The signal can beat the compositor's frame flush.
        tokio::time::sleep(Duration::from_millis(cfg.settle_delay_ms)).await;
        advance(stage, RenderStage::TextureReady);
        advance(stage, RenderStage::Rendered);

        page.evaluate(CENTER_CANVAS_SCRIPT.to_string()).await?;
        tokio::time::sleep(Duration::from_millis(cfg.relayout_delay_ms)).await;

        let clip = ClipRect::centered(viewport.width, viewport.height, cfg.clip_ratio);
        let png = with_timeout(cfg.capture_timeout_ms, page.screenshot(clip, true)).await?;
        advance(stage, RenderStage::Captured);

        Ok(RenderedImage { png, clip })
    }
}

/// Owns a request's page and closes it however the request ends.
///
/// If the render future is dropped before [`PageGuard::close`] completes, the
/// close is finished on a spawned task.
struct PageGuard<P: PageHandle + 'static> {
    page: Arc<P>,
    closed: bool,
}

impl<P: PageHandle + 'static> PageGuard<P> {
    fn new(page: P) -> Self {
        Self {
            page: Arc::new(page),
            closed: false,
        }
    }

    fn page(&self) -> &P {
        &self.page
    }

    async fn close(mut self) {
        if let Err(e) = self.page.close().await {
            warn!("failed to close page: {}", e);
        }
        self.closed = true;
    }
}

impl<P: PageHandle + 'static> Drop for PageGuard<P> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = self.page.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("render abandoned, closing its page in the background");
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!("failed to close abandoned page: {}", e);
                    }
                });
            }
            Err(_) => warn!("render abandoned outside a runtime, page left open"),
        }
    }
}

fn advance(stage: &mut RenderStage, next: RenderStage) {
    debug!("render stage {} -> {}", stage, next);
    *stage = next;
}

async fn with_timeout<T>(timeout_ms: u64, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
        .await
        .map_err(|_| Error::Timeout(timeout_ms))?
}

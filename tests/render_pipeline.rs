//! Head render state machine against an in-memory page backend

use futures::future::BoxFuture;
use image::{Rgba, RgbaImage};
use mcskin_render::browser::{ClipRect, PageHandle, PageSource};
use mcskin_render::scene::SceneAssets;
use mcskin_render::{Error, HeadRenderer, RenderConfig, RenderStage, Result, SkinImage, Viewport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Viewport(u32, u32),
    Mount,
    Subscribe,
    Navigate(String),
    Evaluate,
    Screenshot(ClipRect, bool),
    Close,
}

#[derive(Clone)]
enum Ready {
    Ok,
    Report(String),
    Silent,
}

#[derive(Clone)]
struct Behavior {
    ready: Ready,
    navigation_delay: Duration,
    fail_screenshot: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ready: Ready::Ok,
            navigation_delay: Duration::ZERO,
            fail_screenshot: false,
        }
    }
}

struct MockPage {
    behavior: Behavior,
    events: Arc<Mutex<Vec<Event>>>,
    assets: Mutex<Option<SceneAssets>>,
    ready: Mutex<Option<oneshot::Sender<String>>>,
}

impl MockPage {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl PageHandle for MockPage {
    fn set_viewport(&self, viewport: Viewport) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.record(Event::Viewport(viewport.width, viewport.height));
            Ok(())
        })
    }

    fn mount(&self, assets: SceneAssets) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.record(Event::Mount);
            *self.assets.lock().unwrap() = Some(assets);
            Ok(())
        })
    }

    fn subscribe_ready(&self) -> BoxFuture<'_, Result<oneshot::Receiver<String>>> {
        Box::pin(async move {
            self.record(Event::Subscribe);
            let (tx, rx) = oneshot::channel();
            *self.ready.lock().unwrap() = Some(tx);
            Ok(rx)
        })
    }

    fn navigate(&self, url: String, _wait_until_idle: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.record(Event::Navigate(url.clone()));
            tokio::time::sleep(self.behavior.navigation_delay).await;

            let served = self
                .assets
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|a| a.resolve(&url))
                .is_some();
            if !served {
                return Err(Error::Other(format!("nothing served at {}", url)));
            }

            let tx = self.ready.lock().unwrap().take();
            match &self.behavior.ready {
                Ready::Ok => {
                    if let Some(tx) = tx {
                        let _ = tx.send(r#"{"status":"ok"}"#.to_string());
                    }
                }
                Ready::Report(message) => {
                    if let Some(tx) = tx {
                        let report = serde_json::json!({ "status": "error", "message": message });
                        let _ = tx.send(report.to_string());
                    }
                }
                // Keep the sender alive so the receiver waits for the timeout.
                Ready::Silent => *self.ready.lock().unwrap() = tx,
            }
            Ok(())
        })
    }

    fn evaluate(&self, _script: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.record(Event::Evaluate);
            Ok(())
        })
    }

    fn screenshot(&self, clip: ClipRect, transparent_background: bool) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            self.record(Event::Screenshot(clip, transparent_background));
            if self.behavior.fail_screenshot {
                return Err(Error::Other("capture refused".into()));
            }
            Ok(b"\x89PNG fake".to_vec())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.record(Event::Close);
            Ok(())
        })
    }
}

#[derive(Clone, Default)]
struct MockSource {
    behavior: Behavior,
    events: Arc<Mutex<Vec<Event>>>,
    acquired: Arc<AtomicUsize>,
    unavailable: bool,
}

impl MockSource {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }
}

impl PageSource for MockSource {
    type Page = MockPage;

    fn acquire_page(&self) -> BoxFuture<'_, Result<MockPage>> {
        Box::pin(async move {
            if self.unavailable {
                return Err(Error::BrowserUnavailable("no browser".into()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(MockPage {
                behavior: self.behavior.clone(),
                events: self.events.clone(),
                assets: Mutex::new(None),
                ready: Mutex::new(None),
            })
        })
    }
}

fn fast_config() -> RenderConfig {
    RenderConfig {
        navigation_timeout_ms: 200,
        ready_timeout_ms: 100,
        settle_delay_ms: 0,
        relayout_delay_ms: 0,
        capture_timeout_ms: 200,
        ..Default::default()
    }
}

fn skin_png() -> Vec<u8> {
    SkinImage::from_rgba(RgbaImage::from_pixel(64, 64, Rgba([120, 80, 40, 255])))
        .unwrap()
        .to_png()
        .unwrap()
}

#[tokio::test]
async fn successful_render_walks_every_stage_in_order() {
    let source = MockSource::default();
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let image = renderer.render_head(&skin_png(), 2000, 1024).await.unwrap();
    assert_eq!(image.as_bytes(), b"\x89PNG fake");

    let events = source.events();
    assert_eq!(events[0], Event::Viewport(1024, 1024));
    assert_eq!(events[1], Event::Mount);
    assert_eq!(events[2], Event::Subscribe);
    match &events[3] {
        Event::Navigate(url) => assert!(url.contains("width=1024&height=1024&skin=")),
        other => panic!("expected navigation, got {:?}", other),
    }
    assert_eq!(events[4], Event::Evaluate);
    assert_eq!(
        events[5],
        Event::Screenshot(
            ClipRect {
                x: 256,
                y: 256,
                width: 512,
                height: 512
            },
            true
        )
    );
    assert_eq!(events[6], Event::Close);
    assert_eq!(events.len(), 7);
}

#[tokio::test]
async fn small_requests_clamp_up_and_clip_scales() {
    let source = MockSource::default();
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let image = renderer.render_head(&skin_png(), 10, 300).await.unwrap();
    assert_eq!(
        image.clip(),
        ClipRect {
            x: 16,
            y: 75,
            width: 32,
            height: 150
        }
    );
    assert_eq!(source.events()[0], Event::Viewport(64, 300));
}

#[tokio::test]
async fn undecodable_skin_never_touches_the_browser() {
    let source = MockSource::default();
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let err = renderer.render_head(b"definitely not a png", 512, 512).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(source.acquired.load(Ordering::SeqCst), 0);
    assert!(source.events().is_empty());
}

#[tokio::test]
async fn non_square_skin_is_rejected_before_the_browser() {
    let source = MockSource::default();
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let mut encoded = Vec::new();
    image::DynamicImage::ImageRgba8(RgbaImage::new(64, 32))
        .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
        .unwrap();

    let err = renderer.render_head(&encoded, 512, 512).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSkinDimensions { width: 64, height: 32 }));
    assert_eq!(source.acquired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_ready_signal_fails_and_still_closes_the_page() {
    let source = MockSource::with(Behavior {
        ready: Ready::Silent,
        ..Default::default()
    });
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let err = renderer.render_head(&skin_png(), 512, 512).await.unwrap_err();
    match err {
        Error::RenderFailed { stage, cause } => {
            assert_eq!(stage, RenderStage::Navigated);
            assert!(cause.contains("100ms"), "cause: {}", cause);
        }
        other => panic!("expected RenderFailed, got {:?}", other),
    }
    assert_eq!(source.count(&Event::Close), 1);
    assert_eq!(source.count(&Event::Evaluate), 0);
}

#[tokio::test]
async fn texture_failure_report_fails_the_render() {
    let source = MockSource::with(Behavior {
        ready: Ready::Report("failed to load skin texture abc".into()),
        ..Default::default()
    });
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let err = renderer.render_head(&skin_png(), 512, 512).await.unwrap_err();
    match err {
        Error::RenderFailed { stage, cause } => {
            assert_eq!(stage, RenderStage::Navigated);
            assert!(cause.contains("failed to load skin texture abc"));
        }
        other => panic!("expected RenderFailed, got {:?}", other),
    }
    assert_eq!(source.count(&Event::Close), 1);
}

#[tokio::test]
async fn navigation_timeout_fails_at_page_opened() {
    let source = MockSource::with(Behavior {
        navigation_delay: Duration::from_secs(5),
        ..Default::default()
    });
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let err = renderer.render_head(&skin_png(), 512, 512).await.unwrap_err();
    assert!(matches!(
        err,
        Error::RenderFailed {
            stage: RenderStage::PageOpened,
            ..
        }
    ));
    assert_eq!(source.count(&Event::Close), 1);
}

#[tokio::test]
async fn capture_failure_fails_at_rendered() {
    let source = MockSource::with(Behavior {
        fail_screenshot: true,
        ..Default::default()
    });
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let err = renderer.render_head(&skin_png(), 512, 512).await.unwrap_err();
    match err {
        Error::RenderFailed { stage, cause } => {
            assert_eq!(stage, RenderStage::Rendered);
            assert!(cause.contains("capture refused"));
        }
        other => panic!("expected RenderFailed, got {:?}", other),
    }
    assert_eq!(source.count(&Event::Close), 1);
}

#[tokio::test]
async fn unavailable_browser_passes_through() {
    let source = MockSource {
        unavailable: true,
        ..Default::default()
    };
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    let err = renderer.render_head(&skin_png(), 512, 512).await.unwrap_err();
    assert!(matches!(err, Error::BrowserUnavailable(_)));
    assert_eq!(err.status_code(), 503);
    assert!(source.events().is_empty());
}

#[tokio::test]
async fn concurrent_renders_use_their_own_pages() {
    let source = MockSource::default();
    let renderer = Arc::new(HeadRenderer::new(source.clone(), fast_config()).unwrap());
    let skin = skin_png();

    let renders = (0..4).map(|i| {
        let renderer = renderer.clone();
        let skin = skin.clone();
        async move { renderer.render_head(&skin, 128 + i * 64, 256).await }
    });
    let results = futures::future::join_all(renders).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(source.acquired.load(Ordering::SeqCst), 4);
    assert_eq!(source.count(&Event::Close), 4);
}

#[tokio::test]
async fn abandoned_render_still_closes_its_page() {
    let source = MockSource::with(Behavior {
        ready: Ready::Silent,
        ..Default::default()
    });
    let config = RenderConfig {
        ready_timeout_ms: 10_000,
        ..fast_config()
    };
    let renderer = HeadRenderer::new(source.clone(), config).unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        renderer.render_head(&skin_png(), 512, 512),
    )
    .await;
    assert!(abandoned.is_err(), "render should still be waiting for the scene");
    assert_eq!(source.acquired.load(Ordering::SeqCst), 1);

    for _ in 0..50 {
        if source.count(&Event::Close) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(source.count(&Event::Close), 1);
}

#[tokio::test]
async fn completed_render_closes_its_page_once() {
    let source = MockSource::default();
    let renderer = HeadRenderer::new(source.clone(), fast_config()).unwrap();

    renderer.render_head(&skin_png(), 256, 256).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.count(&Event::Close), 1);
}

#[test]
fn out_of_range_clip_ratio_is_rejected_up_front() {
    for clip_ratio in [1.5, 0.0, f64::NAN] {
        let config = RenderConfig {
            clip_ratio,
            ..fast_config()
        };
        let err = HeadRenderer::new(MockSource::default(), config).err().unwrap();
        assert!(matches!(err, Error::ConfigError(_)), "clip_ratio {}", clip_ratio);
    }
}

//! Hosted scene document served to the headless browser
//!
//! The document is a static HTML/WebGL page parameterized by the query
//! string (`width`, `height`, `skin`). The layered head model, camera and
//! head transform are built here and embedded as JSON; the page fetches the
//! skin image, draws the shells in the given order once, and reports back
//! through the `__skinRenderComplete` binding.

use crate::atlas::SkinImage;
use crate::model::{LayeredHeadModel, Shell};
use crate::{Error, Result};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Origin the scene is served from. Requests to it never reach the network;
/// the browser backend answers them from the mounted [`SceneAssets`].
pub const SCENE_ORIGIN: &str = "http://scene.mcskin-render.internal";

/// Path of the scene document.
pub const RENDERER_PATH: &str = "/renderer";

/// Path prefix of skin images; the locator and `.png` follow.
pub const SKIN_PATH_PREFIX: &str = "/skins/";

/// Name of the page binding the scene calls once its render returned.
pub const READY_BINDING: &str = "__skinRenderComplete";

/// Vertical field of view of the fixed camera.
pub const CAMERA_FOV_DEGREES: f32 = 75.0;
/// Distance from the camera to the head center.
pub const CAMERA_DISTANCE: f32 = 3.0;
const CAMERA_NEAR: f32 = 0.1;
const CAMERA_FAR: f32 = 1000.0;

/// Head turned towards the viewer's right.
pub const HEAD_YAW: f32 = PI / 5.0;
/// Head tilted towards the viewer.
pub const HEAD_PITCH: f32 = PI / 10.0;

const TEMPLATE: &str = include_str!("scene/renderer.html");

/// Perspective projection times view for a `width`×`height` surface.
pub fn view_projection(width: u32, height: u32) -> Mat4 {
    let aspect = width as f32 / height.max(1) as f32;
    let projection = Mat4::perspective_rh_gl(CAMERA_FOV_DEGREES.to_radians(), aspect, CAMERA_NEAR, CAMERA_FAR);
    let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -CAMERA_DISTANCE));
    projection * view
}

/// Transform of the head; hat shells are children and inherit it.
pub fn head_transform() -> Mat4 {
    Mat4::from_rotation_x(HEAD_PITCH) * Mat4::from_rotation_y(HEAD_YAW)
}

/// Everything the page needs to draw one frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDescriptor<'a> {
    pub view_projection: [f32; 16],
    pub model: [f32; 16],
    /// Transparent, so the capture keeps its alpha channel.
    pub clear_color: [f32; 4],
    pub draw_order: Vec<&'a Shell>,
}

impl<'a> SceneDescriptor<'a> {
    pub fn new(model: &'a LayeredHeadModel, width: u32, height: u32) -> Self {
        Self {
            view_projection: view_projection(width, height).to_cols_array(),
            model: head_transform().to_cols_array(),
            clear_color: [0.0, 0.0, 0.0, 0.0],
            draw_order: model.draw_order(),
        }
    }
}

/// Render the scene document for a descriptor.
pub fn render_document(descriptor: &SceneDescriptor<'_>) -> Result<String> {
    let json = serde_json::to_string(descriptor)
        .map_err(|e| Error::Other(format!("Failed to serialize scene: {}", e)))?;
    // Keep the JSON from terminating its <script> element.
    let json = json.replace("</", "<\\/");

    Ok(TEMPLATE
        .replace("{{READY_BINDING}}", READY_BINDING)
        .replace("{{SKIN_PATH_PREFIX}}", SKIN_PATH_PREFIX)
        .replace("{{SCENE_JSON}}", &json))
}

/// URL of the scene document for a request.
pub fn scene_url(width: u32, height: u32, skin_locator: &str) -> Result<String> {
    let base = format!("{}{}", SCENE_ORIGIN, RENDERER_PATH);
    let url = url::Url::parse_with_params(
        &base,
        &[
            ("width", width.to_string()),
            ("height", height.to_string()),
            ("skin", skin_locator.to_string()),
        ],
    )
    .map_err(|e| Error::InvalidInput(format!("Invalid scene URL: {}", e)))?;
    Ok(url.into())
}

/// A response the browser backend serves in place of a network fetch.
#[derive(Debug, Clone)]
pub struct Asset {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// The documents a page needs to host one render.
#[derive(Debug, Clone)]
pub struct SceneAssets {
    pub document: Asset,
    pub skin_path: String,
    pub skin: Asset,
}

impl SceneAssets {
    /// Build the scene document and skin image for a request.
    pub fn build(skin: &SkinImage, model: &LayeredHeadModel, width: u32, height: u32) -> Result<Self> {
        let descriptor = SceneDescriptor::new(model, width, height);
        let document = render_document(&descriptor)?;
        Ok(Self {
            document: Asset {
                content_type: "text/html; charset=utf-8",
                body: document.into_bytes(),
            },
            skin_path: format!("{}{}.png", SKIN_PATH_PREFIX, skin.digest()),
            skin: Asset {
                content_type: "image/png",
                body: skin.to_png()?,
            },
        })
    }

    /// Resolve a request URL against the mounted assets (query ignored).
    pub fn resolve(&self, request_url: &str) -> Option<&Asset> {
        let parsed = url::Url::parse(request_url).ok()?;
        if parsed.origin().ascii_serialization() != SCENE_ORIGIN {
            return None;
        }
        match parsed.path() {
            RENDERER_PATH => Some(&self.document),
            path if path == self.skin_path => Some(&self.skin),
            _ => None,
        }
    }
}

/// The single report the scene sends through [`READY_BINDING`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReadySignal {
    /// The frame was drawn.
    Ok,
    /// The scene could not draw (texture load, WebGL setup, shader).
    Error { message: String },
}

impl ReadySignal {
    /// Parse a binding payload. Anything unparseable counts as an error report.
    pub fn parse(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or_else(|e| ReadySignal::Error {
            message: format!("malformed ready signal {:?}: {}", payload, e),
        })
    }
}

//! Texture atlas layout of the Minecraft skin format
//!
//! A skin is a 64×64 RGBA image. The head occupies the top-left 32×16 block
//! (base layer) and the 32×16 block to its right (overlay or "hat" layer),
//! each split into 8×8 cells. This module owns the single table describing
//! those cells and derives sampling parameters for each of them.
//!
//! Offsets are expressed in normalized texture coordinates with `v` measured
//! from the bottom edge, which is how WebGL sees the image once it is
//! uploaded with `UNPACK_FLIP_Y_WEBGL`.

use crate::{Error, Result};
use image::{ImageFormat, RgbaImage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// Canonical skin edge length in pixels.
pub const ATLAS_SIZE: u32 = 64;

/// Edge length of one head cell in pixels (at scale 1).
pub const CELL_PIXELS: u32 = 8;

/// Edge length of one head cell in normalized texture units.
pub const CELL_SIZE: f32 = 0.125;

/// Inset applied to every cell edge so nearest sampling never reaches the
/// neighbouring cell.
pub const CELL_PADDING: f32 = 0.0005;

/// One face of the head cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CubeFace {
    /// +x
    Right,
    /// -x
    Left,
    /// +y
    Top,
    /// -y
    Bottom,
    /// +z, facing the camera
    Front,
    /// -z
    Back,
}

impl CubeFace {
    /// Faces in box-geometry material order (+x, -x, +y, -y, +z, -z).
    pub const ALL: [CubeFace; 6] = [
        CubeFace::Right,
        CubeFace::Left,
        CubeFace::Top,
        CubeFace::Bottom,
        CubeFace::Front,
        CubeFace::Back,
    ];

    /// Material slot of this face on a box geometry.
    pub fn index(self) -> usize {
        match self {
            CubeFace::Right => 0,
            CubeFace::Left => 1,
            CubeFace::Top => 2,
            CubeFace::Bottom => 3,
            CubeFace::Front => 4,
            CubeFace::Back => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CubeFace::Right => "right",
            CubeFace::Left => "left",
            CubeFace::Top => "top",
            CubeFace::Bottom => "bottom",
            CubeFace::Front => "front",
            CubeFace::Back => "back",
        }
    }
}

impl std::fmt::Display for CubeFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Skin layer a cell belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// The head itself.
    Base,
    /// The hat layer drawn slightly outside the head.
    Overlay,
}

impl Layer {
    fn index(self) -> usize {
        match self {
            Layer::Base => 0,
            Layer::Overlay => 1,
        }
    }
}

/// A named 8×8 cell of the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AtlasRegion {
    pub face: CubeFace,
    pub layer: Layer,
    /// Normalized left edge.
    pub u: f32,
    /// Normalized bottom edge (flipped-y texture space).
    pub v: f32,
}

const fn cell(layer: Layer, face: CubeFace, u: f32, v: f32) -> AtlasRegion {
    AtlasRegion { face, layer, u, v }
}

/// The head cells of the skin format, layer-major, faces in [`CubeFace::ALL`] order.
pub const ATLAS: [AtlasRegion; 12] = [
    cell(Layer::Base, CubeFace::Right, 0.25, 0.75),
    cell(Layer::Base, CubeFace::Left, 0.0, 0.75),
    cell(Layer::Base, CubeFace::Top, 0.125, 0.875),
    cell(Layer::Base, CubeFace::Bottom, 0.25, 0.875),
    cell(Layer::Base, CubeFace::Front, 0.125, 0.75),
    cell(Layer::Base, CubeFace::Back, 0.375, 0.75),
    cell(Layer::Overlay, CubeFace::Right, 0.75, 0.75),
    cell(Layer::Overlay, CubeFace::Left, 0.5, 0.75),
    cell(Layer::Overlay, CubeFace::Top, 0.625, 0.875),
    cell(Layer::Overlay, CubeFace::Bottom, 0.75, 0.875),
    cell(Layer::Overlay, CubeFace::Front, 0.625, 0.75),
    cell(Layer::Overlay, CubeFace::Back, 0.875, 0.75),
];

/// Look up the cell for a layer and face.
pub fn region(layer: Layer, face: CubeFace) -> AtlasRegion {
    ATLAS[layer.index() * CubeFace::ALL.len() + face.index()]
}

/// Pixel rectangle in image space (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether the two rectangles share any pixel.
    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Texture wrapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Wrap {
    ClampToEdge,
    Repeat,
}

/// Texture sampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Nearest,
    Linear,
}

/// Sampling parameters of a derived sub-texture.
///
/// `repeat` scales the face UVs (0..1) down to one cell and `offset` moves
/// them onto it: `uv' = uv * repeat + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureParams {
    pub repeat: [f32; 2],
    pub offset: [f32; 2],
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub generate_mipmaps: bool,
    pub premultiply_alpha: bool,
}

impl AtlasRegion {
    /// Sampling parameters restricting a texture to this cell.
    pub fn texture_params(&self) -> TextureParams {
        let size = CELL_SIZE - 2.0 * CELL_PADDING;
        TextureParams {
            repeat: [size, size],
            offset: [self.u + CELL_PADDING, self.v + CELL_PADDING],
            wrap_s: Wrap::ClampToEdge,
            wrap_t: Wrap::ClampToEdge,
            min_filter: Filter::Nearest,
            mag_filter: Filter::Nearest,
            generate_mipmaps: false,
            premultiply_alpha: true,
        }
    }

    /// Image-space rectangle of this cell for a skin `scale` times the canonical size.
    pub fn pixel_rect(&self, scale: u32) -> PixelRect {
        let atlas = ATLAS_SIZE as f32;
        let left = (self.u * atlas).round() as u32;
        let bottom = (self.v * atlas).round() as u32;
        PixelRect {
            x: left * scale,
            y: (ATLAS_SIZE - bottom - CELL_PIXELS) * scale,
            width: CELL_PIXELS * scale,
            height: CELL_PIXELS * scale,
        }
    }
}

/// A derived texture: one atlas cell of a specific skin plus its sampling setup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTexture {
    /// Digest of the skin pixels this texture samples.
    pub source: String,
    pub region: AtlasRegion,
    pub params: TextureParams,
}

/// Validate skin dimensions, returning the scale relative to 64×64.
pub fn check_dimensions(width: u32, height: u32) -> Result<u32> {
    if width == 0 || width != height || width % ATLAS_SIZE != 0 {
        return Err(Error::InvalidSkinDimensions { width, height });
    }
    Ok(width / ATLAS_SIZE)
}

/// A decoded, validated skin. The pixel buffer cannot be mutated once loaded.
#[derive(Debug, Clone)]
pub struct SkinImage {
    pixels: RgbaImage,
    digest: String,
}

impl SkinImage {
    /// Decode an encoded skin (format detected by the `image` crate).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("empty skin buffer".into()));
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| Error::InvalidInput(format!("Failed to decode skin: {}", e)))?;
        Self::from_rgba(decoded.to_rgba8())
    }

    /// Wrap an already decoded bitmap.
    pub fn from_rgba(pixels: RgbaImage) -> Result<Self> {
        check_dimensions(pixels.width(), pixels.height())?;

        let mut hasher = Sha256::new();
        hasher.update(pixels.width().to_le_bytes());
        hasher.update(pixels.height().to_le_bytes());
        hasher.update(pixels.as_raw());
        let digest = hex::encode(hasher.finalize());

        Ok(Self { pixels, digest })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Integer scale relative to the canonical 64×64 layout.
    pub fn scale(&self) -> u32 {
        self.pixels.width() / ATLAS_SIZE
    }

    /// Hex SHA-256 of the pixel data; used as the skin locator.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copy out one atlas cell.
    pub fn cell_pixels(&self, layer: Layer, face: CubeFace) -> Result<RgbaImage> {
        crop_cell(&self.pixels, layer, face, self.scale())
    }

    /// Derive the sub-texture for one cell of this skin.
    pub fn sub_texture(&self, layer: Layer, face: CubeFace) -> SubTexture {
        let region = region(layer, face);
        SubTexture {
            source: self.digest.clone(),
            region,
            params: region.texture_params(),
        }
    }

    /// Re-encode the validated pixels as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.pixels)
    }
}

/// Copy one atlas cell out of a bitmap laid out at `scale`.
///
/// Fails with `InvalidSkinDimensions` when the cell does not fit, which is
/// how undersized bitmaps are caught on paths that skip `check_dimensions`.
pub fn crop_cell(pixels: &RgbaImage, layer: Layer, face: CubeFace, scale: u32) -> Result<RgbaImage> {
    let rect = region(layer, face).pixel_rect(scale);
    if rect.right() > pixels.width() || rect.bottom() > pixels.height() {
        return Err(Error::InvalidSkinDimensions {
            width: pixels.width(),
            height: pixels.height(),
        });
    }
    Ok(image::imageops::crop_imm(pixels, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Encode an RGBA bitmap as PNG.
pub(crate) fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

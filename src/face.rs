//! Flat face icon: base face cell with the hat face cell composited on top

use crate::atlas::{self, CubeFace, Layer, ATLAS_SIZE};
use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Edge length of the face icon in pixels.
pub const FACE_ICON_SIZE: u32 = 16;

/// Render the 16×16 face icon for an encoded skin.
///
/// Unlike the 3D path this accepts any bitmap that contains the head cells,
/// including legacy 64×32 skins.
pub fn render_face(skin_bytes: &[u8]) -> Result<Vec<u8>> {
    if skin_bytes.is_empty() {
        return Err(Error::InvalidInput("empty skin buffer".into()));
    }
    let skin = image::load_from_memory(skin_bytes)
        .map_err(|e| Error::InvalidInput(format!("Failed to decode skin: {}", e)))?
        .to_rgba8();

    let icon = compose_face(&skin)?;
    atlas::encode_png(&icon)
}

/// Build the face icon from a decoded skin bitmap.
pub fn compose_face(skin: &RgbaImage) -> Result<RgbaImage> {
    let scale = (skin.width() / ATLAS_SIZE).max(1);

    let base = atlas::crop_cell(skin, Layer::Base, CubeFace::Front, scale)?;
    let overlay = atlas::crop_cell(skin, Layer::Overlay, CubeFace::Front, scale)?;

    let mut icon = upscale_nearest(&base, FACE_ICON_SIZE);
    let overlay = upscale_nearest(&overlay, FACE_ICON_SIZE);
    composite_over(&mut icon, &overlay);
    Ok(icon)
}

/// Resize to `size`×`size` copying the nearest source pixel.
pub fn upscale_nearest(img: &RgbaImage, size: u32) -> RgbaImage {
    imageops::resize(img, size, size, FilterType::Nearest)
}

/// Composite `src` over `dest` in place (source-over, straight alpha).
pub fn composite_over(dest: &mut RgbaImage, src: &RgbaImage) {
    for (x, y, src_pixel) in src.enumerate_pixels() {
        if x >= dest.width() || y >= dest.height() {
            continue;
        }
        let blended = alpha_blend(*src_pixel, *dest.get_pixel(x, y));
        dest.put_pixel(x, y, blended);
    }
}

/// Alpha blends two RGBA pixels (source over destination).
fn alpha_blend(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);

    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let blend = |s: u8, d: u8| -> u8 {
        let sf = s as f32 / 255.0;
        let df = d as f32 / 255.0;
        let out = (sf * sa + df * da * (1.0 - sa)) / out_a;
        (out * 255.0).round() as u8
    };

    Rgba([
        blend(src[0], dst[0]),
        blend(src[1], dst[1]),
        blend(src[2], dst[2]),
        (out_a * 255.0).round() as u8,
    ])
}

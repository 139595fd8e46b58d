//! Face icon end to end: encoded skin in, encoded 16x16 icon out

use image::{Rgba, RgbaImage};
use mcskin_render::{render_face, Error};
use sha2::{Digest, Sha256};

fn encode(img: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn decode(png: &[u8]) -> RgbaImage {
    image::load_from_memory(png).unwrap().to_rgba8()
}

fn fill(img: &mut RgbaImage, x0: u32, y0: u32, size: u32, color: Rgba<u8>) {
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            img.put_pixel(x, y, color);
        }
    }
}

#[test]
fn half_transparent_hat_blends_over_face() {
    let mut skin = RgbaImage::new(64, 64);
    fill(&mut skin, 8, 8, 8, Rgba([255, 0, 0, 255]));
    fill(&mut skin, 40, 8, 8, Rgba([0, 0, 255, 128]));

    let icon = decode(&render_face(&encode(&skin)).unwrap());
    assert_eq!(icon.dimensions(), (16, 16));
    for p in icon.pixels() {
        assert_eq!(p.0, [127, 0, 128, 255]);
    }
}

#[test]
fn each_texel_becomes_a_two_by_two_block() {
    let mut skin = RgbaImage::new(64, 64);
    for y in 0..8 {
        for x in 0..8 {
            skin.put_pixel(8 + x, 8 + y, Rgba([(x * 30) as u8, (y * 30) as u8, 7, 255]));
        }
    }

    let icon = decode(&render_face(&encode(&skin)).unwrap());
    for y in 0..16 {
        for x in 0..16 {
            assert_eq!(
                icon.get_pixel(x, y).0,
                [((x / 2) * 30) as u8, ((y / 2) * 30) as u8, 7, 255],
                "pixel ({}, {})",
                x,
                y
            );
        }
    }
}

#[test]
fn cells_outside_the_face_do_not_leak_in() {
    let mut skin = RgbaImage::from_pixel(64, 64, Rgba([0, 255, 0, 255]));
    fill(&mut skin, 8, 8, 8, Rgba([10, 20, 30, 255]));
    fill(&mut skin, 40, 8, 8, Rgba([0, 0, 0, 0]));

    let icon = decode(&render_face(&encode(&skin)).unwrap());
    assert!(icon.pixels().all(|p| p.0 == [10, 20, 30, 255]));
}

#[test]
fn output_is_deterministic() {
    let mut skin = RgbaImage::new(64, 64);
    fill(&mut skin, 8, 8, 8, Rgba([200, 150, 100, 255]));
    fill(&mut skin, 42, 10, 3, Rgba([20, 40, 60, 200]));
    let encoded = encode(&skin);

    let first = Sha256::digest(render_face(&encoded).unwrap());
    let second = Sha256::digest(render_face(&encoded).unwrap());
    assert_eq!(hex::encode(first), hex::encode(second));
}

#[test]
fn undersized_bitmap_is_rejected() {
    let err = render_face(&encode(&RgbaImage::new(32, 32))).unwrap_err();
    assert!(matches!(err, Error::InvalidSkinDimensions { width: 32, height: 32 }));
    assert_eq!(err.status_code(), 400);
}

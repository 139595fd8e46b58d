//! Layered head model: a base cube wrapped by two hat shells
//!
//! The overlay ("hat") layer is drawn twice. The outer shell renders the
//! front faces of a slightly larger cube, the inner shell renders the back
//! faces of a cube just inside it using clones of the same materials. With
//! depth writes disabled on both, a hat texel is visible from every angle
//! without fighting the base layer for depth.

use crate::atlas::{CubeFace, Layer, SkinImage, SubTexture};
use serde::Serialize;

/// Tunables for the hat shells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShellConfig {
    /// Edge length of the outer hat cube relative to the head.
    pub outer_scale: f32,
    /// Edge length of the inner hat cube relative to the head.
    pub inner_scale: f32,
    /// Texels with alpha below this are discarded on the outer shell.
    pub outer_alpha_test: f32,
    /// Texels with alpha below this are discarded on the inner shell.
    pub inner_alpha_test: f32,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            outer_scale: 1.10,
            inner_scale: 1.09,
            outer_alpha_test: 0.15,
            inner_alpha_test: 0.001,
        }
    }
}

/// Which triangle faces a material renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Front,
    Back,
}

/// How fragments combine with the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Blending {
    /// Replace the destination.
    None,
    /// Source-over with premultiplied alpha.
    Normal,
}

/// An unlit, textured material for one cube face.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub map: SubTexture,
    pub transparent: bool,
    pub alpha_test: f32,
    pub side: Side,
    pub depth_test: bool,
    pub depth_write: bool,
    pub blending: Blending,
    pub opacity: f32,
}

impl Material {
    /// Opaque, front-facing material for the base head.
    pub fn opaque(map: SubTexture) -> Self {
        Self {
            map,
            transparent: false,
            alpha_test: 0.0,
            side: Side::Front,
            depth_test: true,
            depth_write: true,
            blending: Blending::None,
            opacity: 1.0,
        }
    }

    /// Front-facing hat material: alpha tested, blended, no depth writes.
    pub fn overlay(map: SubTexture, alpha_test: f32) -> Self {
        Self {
            map,
            transparent: true,
            alpha_test,
            side: Side::Front,
            depth_test: true,
            depth_write: false,
            blending: Blending::Normal,
            opacity: 1.0,
        }
    }

    /// Clone this material for the inside of a shell. Only the face side,
    /// alpha threshold and depth/blend state change; the texture is shared.
    pub fn back_face_clone(&self, alpha_test: f32) -> Self {
        Self {
            side: Side::Back,
            alpha_test,
            depth_test: true,
            depth_write: false,
            blending: Blending::Normal,
            opacity: 1.0,
            transparent: true,
            ..self.clone()
        }
    }
}

/// Geometry of one square face: four corners and two triangles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceGeometry {
    pub positions: [[f32; 3]; 4],
    pub uvs: [[f32; 2]; 4],
    pub indices: [u16; 6],
}

/// An axis-aligned cube centered on the origin, one [`FaceGeometry`] per
/// material slot in [`CubeFace::ALL`] order.
///
/// Corner order, UVs and winding follow three.js `BoxGeometry`, so a
/// front-facing triangle is counter-clockwise when seen from outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxGeometry {
    pub size: f32,
    pub faces: Vec<FaceGeometry>,
}

impl BoxGeometry {
    pub fn cube(size: f32) -> Self {
        let faces = CubeFace::ALL
            .iter()
            .map(|face| match face {
                CubeFace::Right => plane([2, 1, 0], -1.0, -1.0, size, size, size),
                CubeFace::Left => plane([2, 1, 0], 1.0, -1.0, size, size, -size),
                CubeFace::Top => plane([0, 2, 1], 1.0, 1.0, size, size, size),
                CubeFace::Bottom => plane([0, 2, 1], 1.0, -1.0, size, size, -size),
                CubeFace::Front => plane([0, 1, 2], 1.0, -1.0, size, size, size),
                CubeFace::Back => plane([0, 1, 2], -1.0, -1.0, size, size, -size),
            })
            .collect();
        Self { size, faces }
    }
}

// `axes` names the components receiving the plane's (u, v, w) coordinates.
fn plane(axes: [usize; 3], udir: f32, vdir: f32, width: f32, height: f32, depth: f32) -> FaceGeometry {
    let [u, v, w] = axes;
    let mut positions = [[0.0; 3]; 4];
    let mut uvs = [[0.0; 2]; 4];

    for iy in 0..2 {
        let y = iy as f32 * height - height / 2.0;
        for ix in 0..2 {
            let x = ix as f32 * width - width / 2.0;
            let corner = iy * 2 + ix;
            positions[corner][u] = x * udir;
            positions[corner][v] = y * vdir;
            positions[corner][w] = depth / 2.0;
            uvs[corner] = [ix as f32, 1.0 - iy as f32];
        }
    }

    FaceGeometry {
        positions,
        uvs,
        indices: [0, 2, 1, 2, 3, 1],
    }
}

/// Role of a shell in the layered head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ShellKind {
    Base,
    HatInner,
    HatOuter,
}

/// One cube mesh of the head with a material per face.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shell {
    pub kind: ShellKind,
    pub render_order: i32,
    pub geometry: BoxGeometry,
    pub materials: Vec<Material>,
}

impl Shell {
    pub fn material(&self, face: CubeFace) -> &Material {
        &self.materials[face.index()]
    }

    /// Shells with any transparent material are drawn after the opaque pass.
    pub fn is_transparent(&self) -> bool {
        self.materials.iter().any(|m| m.transparent)
    }
}

/// The head: a base shell with the hat shells attached as children.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayeredHeadModel {
    pub head: Shell,
    pub children: Vec<Shell>,
}

impl LayeredHeadModel {
    /// Assemble the layered head for a skin.
    pub fn build(skin: &SkinImage, config: &ShellConfig) -> Self {
        let base_materials = CubeFace::ALL
            .iter()
            .map(|&face| Material::opaque(skin.sub_texture(Layer::Base, face)))
            .collect();

        // Hat shells are always present, even for a blank overlay; the alpha
        // test decides per texel what is drawn.
        let outer_materials: Vec<Material> = CubeFace::ALL
            .iter()
            .map(|&face| Material::overlay(skin.sub_texture(Layer::Overlay, face), config.outer_alpha_test))
            .collect();

        let inner_materials = outer_materials
            .iter()
            .map(|m| m.back_face_clone(config.inner_alpha_test))
            .collect();

        let head = Shell {
            kind: ShellKind::Base,
            render_order: 0,
            geometry: BoxGeometry::cube(1.0),
            materials: base_materials,
        };
        let hat_inner = Shell {
            kind: ShellKind::HatInner,
            render_order: 1,
            geometry: BoxGeometry::cube(config.inner_scale),
            materials: inner_materials,
        };
        let hat_outer = Shell {
            kind: ShellKind::HatOuter,
            render_order: 2,
            geometry: BoxGeometry::cube(config.outer_scale),
            materials: outer_materials,
        };

        log::debug!("built layered head model for skin {}", skin.digest());

        Self {
            head,
            children: vec![hat_outer, hat_inner],
        }
    }

    pub fn shell(&self, kind: ShellKind) -> Option<&Shell> {
        std::iter::once(&self.head)
            .chain(self.children.iter())
            .find(|s| s.kind == kind)
    }

    /// Shells in the order they must be drawn: opaque shells first, then
    /// transparent ones by ascending render order.
    pub fn draw_order(&self) -> Vec<&Shell> {
        let mut shells: Vec<&Shell> = std::iter::once(&self.head).chain(self.children.iter()).collect();
        shells.sort_by_key(|s| (s.is_transparent(), s.render_order));
        shells
    }
}

// =============================================================================
// SCENE - Sample meshes, vertex layouts and the fixed camera
// =============================================================================
//
// Three samples share one renderer:
//   triangle  4 colored vertices, identity transform
//   uniform   8-vertex colored cube spinning about +Y
//   texture   24-vertex cube with per-face UVs, one sampled texture
//
// The uniform block is a single column-major mat4 (64 bytes).

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::backend::pipeline::{ShaderNames, VertexLayout};
use crate::config::SampleKind;

/// Position + color, 6 floats
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Position + texture coordinate, 5 floats
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TexVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Uniform block at binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Transform {
    pub mvp: Mat4,
}

const fn cv(position: [f32; 3], color: [f32; 3]) -> ColorVertex {
    ColorVertex { position, color }
}

const TRIANGLE_VERTICES: [ColorVertex; 4] = [
    cv([-0.8, 0.8, 0.0], [1.0, 0.0, 0.0]),
    cv([0.8, 0.8, 0.0], [0.0, 1.0, 0.0]),
    cv([-0.8, -0.8, 0.0], [0.0, 0.0, 1.0]),
    cv([0.8, -0.8, 0.0], [0.5, 0.5, 0.5]),
];

/// Counter-clockwise in Vulkan framebuffer space (+Y down)
const TRIANGLE_INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];

const CUBE_VERTICES: [ColorVertex; 8] = [
    cv([-1.0, 1.0, -1.0], [1.0, 0.0, 0.0]),
    cv([1.0, 1.0, -1.0], [0.0, 1.0, 0.0]),
    cv([-1.0, -1.0, -1.0], [1.0, 0.0, 0.0]),
    cv([1.0, -1.0, -1.0], [0.0, 0.0, 1.0]),
    cv([-1.0, 1.0, 1.0], [1.0, 0.0, 0.0]),
    cv([1.0, 1.0, 1.0], [0.0, 1.0, 0.0]),
    cv([-1.0, -1.0, 1.0], [0.0, 0.0, 1.0]),
    cv([1.0, -1.0, 1.0], [0.0, 1.0, 0.0]),
];

const CUBE_INDICES: [u16; 36] = [
    0, 2, 4, 4, 2, 6, //
    2, 0, 3, 3, 0, 1, //
    2, 7, 6, 2, 3, 7, //
    0, 4, 5, 1, 0, 5, //
    7, 3, 1, 7, 1, 5, //
    4, 6, 7, 5, 4, 7,
];

/// Corners of each face, counter-clockwise seen from outside
const CUBE_FACES: [[[f32; 3]; 4]; 6] = [
    [[-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0]],
    [[1.0, -1.0, -1.0], [-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [1.0, 1.0, -1.0]],
    [[1.0, -1.0, 1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0]],
    [[-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [-1.0, 1.0, -1.0]],
    [[-1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0]],
    [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [-1.0, -1.0, 1.0]],
];

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

fn textured_cube() -> (Vec<TexVertex>, Vec<u16>) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for face in &CUBE_FACES {
        let base = vertices.len() as u16;
        for (&position, &uv) in face.iter().zip(&FACE_UVS) {
            vertices.push(TexVertex { position, uv });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

/// Vertex bytes ready for upload plus their u16 indices
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<u8>,
    pub indices: Vec<u16>,
    pub layout: VertexLayout,
}

impl Mesh {
    fn colored(vertices: &[ColorVertex], indices: &[u16]) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            indices: indices.to_vec(),
            layout: VertexLayout::new(
                std::mem::size_of::<ColorVertex>() as u32,
                &[(vk::Format::R32G32B32_SFLOAT, 0), (vk::Format::R32G32B32_SFLOAT, 12)],
            ),
        }
    }

    fn textured(vertices: &[TexVertex], indices: Vec<u16>) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            indices,
            layout: VertexLayout::new(
                std::mem::size_of::<TexVertex>() as u32,
                &[(vk::Format::R32G32B32_SFLOAT, 0), (vk::Format::R32G32_SFLOAT, 12)],
            ),
        }
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

// =============================================================================
// CAMERA
// =============================================================================

pub const FOV_DEGREES: f32 = 45.0;
pub const NEAR: f32 = 0.1;
pub const FAR: f32 = 100.0;
pub const EYE: Vec3 = Vec3::new(0.0, 3.0, 5.0);

/// GL-style perspective with Y flipped into Vulkan clip space
pub fn projection(aspect: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh_gl(FOV_DEGREES.to_radians(), aspect, NEAR, FAR);
    proj.y_axis.y *= -1.0;
    proj
}

pub fn view() -> Mat4 {
    Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Y)
}

/// Projection * view * rotation about +Y by `spin` degrees
pub fn mvp(spin: f32, aspect: f32) -> Mat4 {
    projection(aspect) * view() * Mat4::from_rotation_y(spin.to_radians())
}

// =============================================================================
// SAMPLES
// =============================================================================

#[derive(Debug, Clone)]
pub struct Sample {
    pub kind: SampleKind,
    pub mesh: Mesh,
    pub shaders: ShaderNames,
}

impl Sample {
    pub fn new(kind: SampleKind) -> Self {
        let tri_shaders = ShaderNames {
            vertex: "shaders/tri-vert.spv",
            fragment: "shaders/tri-frag.spv",
        };

        match kind {
            SampleKind::Triangle => Self {
                kind,
                mesh: Mesh::colored(&TRIANGLE_VERTICES, &TRIANGLE_INDICES),
                shaders: tri_shaders,
            },
            SampleKind::Uniform => Self {
                kind,
                mesh: Mesh::colored(&CUBE_VERTICES, &CUBE_INDICES),
                shaders: tri_shaders,
            },
            SampleKind::Texture => {
                let (vertices, indices) = textured_cube();
                Self {
                    kind,
                    mesh: Mesh::textured(&vertices, indices),
                    shaders: ShaderNames {
                        vertex: "shaders/tex-vert.spv",
                        fragment: "shaders/tex-frag.spv",
                    },
                }
            }
        }
    }

    pub fn uses_texture(&self) -> bool {
        self.kind == SampleKind::Texture
    }

    /// The matrix written to the uniform block for a given spin angle
    pub fn transform(&self, spin: f32, aspect: f32) -> Transform {
        let mvp = match self.kind {
            SampleKind::Triangle => Mat4::IDENTITY,
            SampleKind::Uniform | SampleKind::Texture => mvp(spin, aspect),
        };
        Transform { mvp }
    }
}

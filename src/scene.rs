// The fixed scene: vertex layout, uniforms, geometry and draw list
//
// Three textured boxes, the chalet, the mountain scenery and a skybox. Draw
// order is the order of `Scene::draws`; the skybox goes last.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::backend::pipeline::PipelineKind;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    fn bits(&self) -> [u32; 8] {
        let [px, py, pz] = self.pos;
        let [r, g, b] = self.color;
        let [u, v] = self.tex_coord;
        [px, py, pz, r, g, b, u, v].map(f32::to_bits)
    }
}

// Bitwise equality so vertices can key a HashMap during deduplication
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Layout of the uniform block at binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

/// Camera matrices for one frame, before the per-object model transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
}

/// The two uniform buffers. Everything except the chalet shares `Scene`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSlot {
    Scene,
    Chalet,
}

impl UniformSlot {
    pub const ALL: [UniformSlot; 2] = [UniformSlot::Scene, UniformSlot::Chalet];

    pub fn model(self) -> Mat4 {
        match self {
            UniformSlot::Scene => Mat4::IDENTITY,
            UniformSlot::Chalet => Mat4::from_scale(Vec3::splat(3.0)),
        }
    }

    /// Full block for this slot. Projection Y is flipped for Vulkan clip space.
    pub fn uniforms(self, frame: &FrameUniforms) -> UniformBufferObject {
        let mut proj = frame.projection;
        proj.y_axis.y *= -1.0;
        UniformBufferObject {
            model: self.model(),
            view: frame.view,
            proj,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// What a descriptor set binds: a uniform slot plus an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Material {
    Box,
    Chalet,
    Scenery,
    Skybox,
}

impl Material {
    pub const ALL: [Material; 4] = [
        Material::Box,
        Material::Chalet,
        Material::Scenery,
        Material::Skybox,
    ];

    pub fn uniform_slot(self) -> UniformSlot {
        match self {
            Material::Chalet => UniformSlot::Chalet,
            _ => UniformSlot::Scene,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Texture file per 2D material, relative to the asset root
pub fn texture_path(material: Material) -> Option<PathBuf> {
    let file = match material {
        Material::Box => "textures/box.jpg",
        Material::Chalet => "textures/chalet.jpg",
        Material::Scenery => "textures/terrain3.jpg",
        Material::Skybox => return None,
    };
    Some(PathBuf::from(file))
}

/// Skybox faces in cube layer order: +X, -X, +Y, -Y, +Z, -Z
pub const SKYBOX_FACES: [&str; 6] = [
    "textures/skyboxes/right.png",
    "textures/skyboxes/left.png",
    "textures/skyboxes/top.png",
    "textures/skyboxes/bot.png",
    "textures/skyboxes/front.png",
    "textures/skyboxes/back.png",
];

pub const CUBE_INDICES: [u32; 36] = [
    0, 1, 2, 2, 3, 0, // top
    4, 7, 6, 6, 5, 4, // bottom
    8, 9, 10, 10, 11, 8, // +z
    12, 13, 14, 14, 15, 12, // -z
    16, 17, 18, 18, 19, 16, // -x
    20, 21, 22, 22, 23, 20, // +x
];

pub const SKYBOX_HALF_EXTENT: f32 = 250.0;

pub const SKYBOX_INDICES: [u32; 36] = [
    3, 2, 1, 1, 0, 3, //
    7, 4, 5, 5, 6, 7, //
    5, 4, 0, 0, 1, 5, //
    6, 5, 1, 1, 2, 6, //
    7, 6, 2, 2, 3, 7, //
    4, 7, 3, 3, 0, 4, //
];

/// 24-vertex box spanning `min..max`, four vertices per face
pub fn cube_vertices(min: [f32; 3], max: [f32; 3]) -> Vec<Vertex> {
    let [x0, y0, z0] = min;
    let [x1, y1, z1] = max;

    const CYAN: [f32; 3] = [0.0, 1.0, 1.0];
    const RED: [f32; 3] = [1.0, 0.0, 0.0];
    const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
    const BLUE: [f32; 3] = [0.0, 0.0, 1.0];
    const YELLOW: [f32; 3] = [1.0, 1.0, 0.0];
    const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

    // Caps share one color/uv pattern, sides another
    let cap = |y: f32| {
        [
            Vertex::new([x0, y, z0], CYAN, [1.0, 1.0]),
            Vertex::new([x0, y, z1], RED, [0.0, 1.0]),
            Vertex::new([x1, y, z1], BLUE, [0.0, 0.0]),
            Vertex::new([x1, y, z0], YELLOW, [1.0, 0.0]),
        ]
    };
    let side = |corners: [[f32; 3]; 4]| {
        [
            Vertex::new(corners[0], RED, [0.0, 1.0]),
            Vertex::new(corners[1], GREEN, [1.0, 1.0]),
            Vertex::new(corners[2], BLUE, [1.0, 0.0]),
            Vertex::new(corners[3], WHITE, [0.0, 0.0]),
        ]
    };

    let front = [
        Vertex::new([x1, y1, z1], CYAN, [1.0, 1.0]),
        Vertex::new([x0, y1, z1], RED, [0.0, 1.0]),
        Vertex::new([x0, y0, z1], BLUE, [0.0, 0.0]),
        Vertex::new([x1, y0, z1], YELLOW, [1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    vertices.extend(cap(y1));
    vertices.extend(cap(y0));
    vertices.extend(front);
    vertices.extend(side([[x1, y0, z0], [x0, y0, z0], [x0, y1, z0], [x1, y1, z0]]));
    vertices.extend(side([[x0, y0, z0], [x0, y0, z1], [x0, y1, z1], [x0, y1, z0]]));
    vertices.extend(side([[x1, y0, z1], [x1, y0, z0], [x1, y1, z0], [x1, y1, z1]]));
    vertices
}

/// Eight corners at `±SKYBOX_HALF_EXTENT`. The fragment shader samples the
/// cubemap by position, so colors and uvs are unused.
pub fn skybox_vertices() -> Vec<Vertex> {
    let e = SKYBOX_HALF_EXTENT;
    let corner = |x: f32, y: f32, z: f32| Vertex::new([x * e, y * e, z * e], [1.0; 3], [0.0; 2]);
    vec![
        corner(-1.0, -1.0, 1.0),
        corner(1.0, -1.0, 1.0),
        corner(1.0, 1.0, 1.0),
        corner(-1.0, 1.0, 1.0),
        corner(-1.0, -1.0, -1.0),
        corner(1.0, -1.0, -1.0),
        corner(1.0, 1.0, -1.0),
        corner(-1.0, 1.0, -1.0),
    ]
}

/// Where a mesh's vertices come from
#[derive(Debug, Clone)]
pub enum Geometry {
    Inline {
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
    },
    /// Wavefront OBJ relative to the asset root
    Obj(PathBuf),
}

#[derive(Debug, Clone)]
pub struct MeshSource {
    pub name: &'static str,
    pub geometry: Geometry,
}

/// One entry of the draw loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawItem {
    /// Index into `Scene::meshes`
    pub mesh: usize,
    pub material: Material,
    pub pipeline: PipelineKind,
}

#[derive(Debug, Clone)]
pub struct Scene {
    pub meshes: Vec<MeshSource>,
    pub draws: Vec<DrawItem>,
}

impl Scene {
    pub fn fixed() -> Self {
        let boxes = [
            ("box1", [-5.75, 0.12, 5.1], [-5.1, 0.92, 5.75]),
            ("box2", [-5.0, 0.12, 4.5], [-4.5, 0.62, 5.0]),
            ("box3", [-5.05, 0.62, 4.55], [-4.55, 1.12, 5.05]),
        ];

        let mut meshes: Vec<MeshSource> = boxes
            .iter()
            .map(|&(name, min, max)| MeshSource {
                name,
                geometry: Geometry::Inline {
                    vertices: cube_vertices(min, max),
                    indices: CUBE_INDICES.to_vec(),
                },
            })
            .collect();
        meshes.push(MeshSource {
            name: "chalet",
            geometry: Geometry::Obj(PathBuf::from("models/chalet.obj")),
        });
        meshes.push(MeshSource {
            name: "scenery",
            geometry: Geometry::Obj(PathBuf::from("models/mountains.obj")),
        });
        meshes.push(MeshSource {
            name: "skybox",
            geometry: Geometry::Inline {
                vertices: skybox_vertices(),
                indices: SKYBOX_INDICES.to_vec(),
            },
        });

        let draw = |mesh, material, pipeline| DrawItem {
            mesh,
            material,
            pipeline,
        };
        let draws = vec![
            draw(0, Material::Box, PipelineKind::Scene),
            draw(1, Material::Box, PipelineKind::Scene),
            draw(2, Material::Box, PipelineKind::Scene),
            draw(3, Material::Chalet, PipelineKind::Scene),
            draw(4, Material::Scenery, PipelineKind::Scene),
            draw(5, Material::Skybox, PipelineKind::Skybox),
        ];

        Self { meshes, draws }
    }
}

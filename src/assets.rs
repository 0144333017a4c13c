// Asset loading - OBJ meshes and RGBA8 images
//
// Everything is read once at startup; any failure here is fatal.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::scene::Vertex;

const OBJ_VERTEX_COLOR: [f32; 3] = [1.0, 1.0, 1.0];

/// Vertex and index data ready for upload
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Append one indexed face list, sharing identical vertices.
    ///
    /// `positions` is xyz triples, `texcoords` uv pairs, both addressed by
    /// `indices`. V is flipped since OBJ puts the origin at the bottom left.
    pub fn append_deduplicated(
        &mut self,
        unique: &mut HashMap<Vertex, u32>,
        positions: &[f32],
        texcoords: &[f32],
        indices: &[u32],
    ) {
        for &index in indices {
            let pos_offset = 3 * index as usize;
            let tex_offset = 2 * index as usize;

            let tex_coord = match texcoords.get(tex_offset..tex_offset + 2) {
                Some(uv) => [uv[0], 1.0 - uv[1]],
                None => [0.0, 0.0],
            };
            let vertex = Vertex::new(
                [
                    positions[pos_offset],
                    positions[pos_offset + 1],
                    positions[pos_offset + 2],
                ],
                OBJ_VERTEX_COLOR,
                tex_coord,
            );

            let next = self.vertices.len() as u32;
            let index = *unique.entry(vertex).or_insert_with(|| {
                self.vertices.push(vertex);
                next
            });
            self.indices.push(index);
        }
    }
}

/// Load every model in an OBJ file into one mesh
pub fn load_obj(path: &Path) -> Result<MeshData> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open model {:?}", path))?,
    );
    let (models, _) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        // Materials are ignored; each mesh has its own texture
        |_| Ok(Default::default()),
    )
    .with_context(|| format!("Failed to parse model {:?}", path))?;

    let mut mesh = MeshData::default();
    let mut unique = HashMap::new();
    for model in &models {
        mesh.append_deduplicated(
            &mut unique,
            &model.mesh.positions,
            &model.mesh.texcoords,
            &model.mesh.indices,
        );
    }

    anyhow::ensure!(!mesh.indices.is_empty(), "Model {:?} has no faces", path);

    log::info!(
        "Loaded {:?}: {} vertices, {} indices",
        path,
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

/// Decode any supported image file to tightly packed RGBA8
pub fn load_rgba(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)
        .with_context(|| format!("Failed to load texture image {:?}", path))?
        .to_rgba8();
    log::debug!("Loaded {:?} ({}x{})", path, image.width(), image.height());
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_corners_are_stored_once() {
        // Two triangles of a unit quad sharing the diagonal
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        let texcoords = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let indices = [0, 1, 2, 2, 3, 0];

        let mut mesh = MeshData::default();
        mesh.append_deduplicated(&mut HashMap::new(), &positions, &texcoords, &indices);

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn texture_v_is_flipped_and_color_is_white() {
        let positions = [1.0, 2.0, 3.0];
        let texcoords = [0.25, 0.75];

        let mut mesh = MeshData::default();
        mesh.append_deduplicated(&mut HashMap::new(), &positions, &texcoords, &[0]);

        let vertex = mesh.vertices[0];
        assert_eq!(vertex.pos, [1.0, 2.0, 3.0]);
        assert_eq!(vertex.tex_coord, [0.25, 0.25]);
        assert_eq!(vertex.color, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn same_position_with_different_uv_stays_distinct() {
        let positions = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let texcoords = [0.0, 0.0, 1.0, 1.0];

        let mut mesh = MeshData::default();
        mesh.append_deduplicated(&mut HashMap::new(), &positions, &texcoords, &[0, 1, 0]);

        assert_eq!(mesh.vertices.len(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 0]);
    }

    #[test]
    fn loads_a_triangulated_obj_file() {
        let path = std::env::temp_dir().join(format!("skyview-quad-{}.obj", std::process::id()));
        std::fs::write(
            &path,
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
             vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
             f 1/1 2/2 3/3 4/4\n",
        )
        .unwrap();

        let mesh = load_obj(&path).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_model_is_an_error() {
        let path = std::env::temp_dir().join("skyview-no-such-model.obj");
        let err = load_obj(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open model"));
    }

    #[test]
    fn missing_texture_is_an_error() {
        let path = std::env::temp_dir().join("skyview-no-such-texture.png");
        assert!(load_rgba(&path).is_err());
    }
}

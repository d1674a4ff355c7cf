use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use log::*;
use vulkanalia::vk;

use super::buffer::VulkanBuffer;
use super::context::VulkanContext;
use super::vertex::{Vec2, Vec3, Vertex};
use crate::config::ModelConfig;
use crate::error::RendererError;

/// One face corner as read from the mesh file.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeshCorner {
    pub position: [f32; 3],
    pub tex_coord: Option<[f32; 2]>,
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ..Default::default()
    }
}

fn corners(models: &[tobj::Model]) -> Vec<MeshCorner> {
    let mut corners = Vec::new();

    for model in models {
        let mesh = &model.mesh;
        for index in &mesh.indices {
            let pos_offset = 3 * *index as usize;
            let tex_coord_offset = 2 * *index as usize;

            let tex_coord = mesh
                .texcoords
                .get(tex_coord_offset..tex_coord_offset + 2)
                .map(|uv| [uv[0], uv[1]]);

            corners.push(MeshCorner {
                position: [
                    mesh.positions[pos_offset],
                    mesh.positions[pos_offset + 1],
                    mesh.positions[pos_offset + 2],
                ],
                tex_coord,
            });
        }
    }

    corners
}

pub fn read_mesh(path: &Path) -> Result<Vec<MeshCorner>, RendererError> {
    let asset_error = |reason: String| RendererError::Asset {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| asset_error(e.to_string()))?;
    let mut reader = BufReader::new(file);
    read_mesh_from(&mut reader).map_err(|e| asset_error(e.to_string()))
}

/// Materials are never loaded; only geometry and texture coordinates matter.
pub fn read_mesh_from(reader: &mut impl BufRead) -> Result<Vec<MeshCorner>, tobj::LoadError> {
    let (models, _) = tobj::load_obj_buf(reader, &load_options(), |_| Ok(Default::default()))?;
    Ok(corners(&models))
}

/// CPU-side vertex and index lists, one vertex per face corner.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Builds white vertices with V flipped to top-left origin. Corners
    /// without texture coordinates get `(0, 1)`.
    pub fn flatten(corners: &[MeshCorner]) -> Self {
        let mut missing = 0usize;

        let vertices: Vec<_> = corners
            .iter()
            .map(|corner| {
                let tex_coord = match corner.tex_coord {
                    Some([u, v]) => Vec2::new(u, 1.0 - v),
                    None => {
                        missing += 1;
                        Vec2::new(0.0, 1.0)
                    }
                };

                Vertex::new(
                    Vec3::from(corner.position),
                    Vec3::new(1.0, 1.0, 1.0),
                    tex_coord,
                )
            })
            .collect();

        if missing > 0 {
            warn!("{missing} mesh vertices have no texture coordinates; using (0, 1).");
        }

        let indices = (0..vertices.len() as u32).collect();

        Self { vertices, indices }
    }
}

/// A mesh uploaded to device-local vertex and index buffers.
#[derive(Debug)]
pub struct VulkanModel {
    pub vertex_buffer: VulkanBuffer,
    pub index_buffer: VulkanBuffer,
    pub index_count: u32,
}

impl VulkanModel {
    pub unsafe fn load(ctx: &Rc<VulkanContext>, config: &ModelConfig) -> Result<Self> {
        let mesh = MeshData::flatten(&read_mesh(&config.mesh)?);
        if mesh.vertices.is_empty() {
            return Err(RendererError::Asset {
                path: config.mesh.clone(),
                reason: "mesh has no faces".to_string(),
            }
            .into());
        }

        let vertex_buffer =
            VulkanBuffer::with_data(ctx, &mesh.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer =
            VulkanBuffer::with_data(ctx, &mesh.indices, vk::BufferUsageFlags::INDEX_BUFFER)?;

        info!(
            "Loaded mesh `{}` ({} vertices).",
            config.mesh.display(),
            mesh.vertices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const QUAD: &str = "\
v -0.5 -0.5 0.0
v 0.5 -0.5 0.0
v 0.5 0.5 0.0
v -0.5 0.5 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
f 1/1 2/2 3/3 4/4
";

    const BARE_TRIANGLE: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
f 1 2 3
";

    #[test]
    fn quads_are_triangulated_one_vertex_per_corner() {
        let corners = read_mesh_from(&mut Cursor::new(QUAD)).unwrap();
        let mesh = MeshData::flatten(&corners);

        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(mesh
            .vertices
            .iter()
            .all(|v| v.color == Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn v_coordinate_is_flipped() {
        let corners = read_mesh_from(&mut Cursor::new(QUAD)).unwrap();
        let mesh = MeshData::flatten(&corners);

        let first = mesh.vertices[0];
        assert_eq!(first.pos, Vec3::new(-0.5, -0.5, 0.0));
        assert_eq!(first.tex_coord, Vec2::new(0.0, 1.0));

        let top_right = mesh
            .vertices
            .iter()
            .find(|v| v.pos == Vec3::new(0.5, 0.5, 0.0))
            .unwrap();
        assert_eq!(top_right.tex_coord, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn missing_tex_coords_default_to_bottom_left() {
        let corners = read_mesh_from(&mut Cursor::new(BARE_TRIANGLE)).unwrap();
        assert!(corners.iter().all(|c| c.tex_coord.is_none()));

        let mesh = MeshData::flatten(&corners);
        assert_eq!(mesh.vertices.len(), 3);
        assert!(mesh
            .vertices
            .iter()
            .all(|v| v.tex_coord == Vec2::new(0.0, 1.0)));
    }

    #[test]
    fn shared_corners_are_not_deduplicated() {
        let corners = vec![
            MeshCorner {
                position: [0.0, 0.0, 0.0],
                tex_coord: Some([0.5, 0.5]),
            };
            4
        ];

        let mesh = MeshData::flatten(&corners);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unreadable_mesh_is_an_asset_error() {
        let err = read_mesh(Path::new("does/not/exist.obj")).unwrap_err();
        assert!(matches!(err, RendererError::Asset { .. }));
    }
}

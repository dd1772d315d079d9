//! Scene description consumed by the deferred renderer.
//!
//! The renderer never parses model files itself; it reads everything through
//! [`SceneProvider`]. Two providers ship with the crate: a procedurally
//! generated demo scene and a Wavefront OBJ loader built on `tobj`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3, Vec4};

use crate::error::{RenderError, RenderResult};
use crate::gpu::mesh::{
    create_box_geometry, create_plane_geometry, create_sphere_geometry, MeshData, Vertex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightType {
    Point,
    Directional,
}

/// A light placed in the scene.
#[derive(Clone, Debug)]
pub struct SceneLight {
    pub light_type: LightType,
    /// Linear RGB.
    pub color: Vec3,
    /// Node world transform. Point lights use its translation, directional
    /// lights shine along its -Y axis.
    pub world: Mat4,
}

impl SceneLight {
    pub fn point(color: Vec3, position: Vec3) -> Self {
        Self {
            light_type: LightType::Point,
            color,
            world: Mat4::from_translation(position),
        }
    }

    pub fn directional(color: Vec3, world: Mat4) -> Self {
        Self {
            light_type: LightType::Directional,
            color,
            world,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    pub diffuse_color: Vec4,
    pub specular_strength: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse_color: Vec4::new(0.8, 0.8, 0.8, 1.0),
            specular_strength: 0.5,
        }
    }
}

/// An instance of a mesh in the scene.
#[derive(Clone, Debug)]
pub struct MeshNode {
    pub mesh: usize,
    pub material: usize,
    pub world: Mat4,
}

#[derive(Clone, Debug)]
pub struct SceneCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for SceneCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 30.0, 100.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 0.7,
            near: 1.0,
            far: 2000.0,
        }
    }
}

/// Source of geometry, materials, lights and cameras.
pub trait SceneProvider {
    fn meshes(&self) -> &[MeshData];
    fn mesh_nodes(&self) -> &[MeshNode];
    fn materials(&self) -> &[Material];
    fn lights(&self) -> &[SceneLight];
    fn cameras(&self) -> &[SceneCamera];

    /// Advance node animation to `time_ms`.
    fn set_animation_time(&mut self, _time_ms: f32) {}
}

/// Check the scene can be rendered.
pub fn validate_scene(scene: &dyn SceneProvider) -> RenderResult<()> {
    if scene.cameras().is_empty() {
        return Err(RenderError::invalid_scene(
            "The main scene to display must contain a camera.",
        ));
    }
    if scene.materials().is_empty() {
        return Err(RenderError::invalid_scene(
            "The scene does not contain any materials.",
        ));
    }
    for (i, node) in scene.mesh_nodes().iter().enumerate() {
        if node.mesh >= scene.meshes().len() {
            return Err(RenderError::invalid_scene(format!(
                "Mesh node {} references missing mesh {}",
                i, node.mesh
            )));
        }
        if node.material >= scene.materials().len() {
            return Err(RenderError::invalid_scene(format!(
                "Mesh node {} references missing material {}",
                i, node.material
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Procedural scene
// ============================================================================

/// Built-in demo scene: a floor, a ring of pillars, spinning spheres,
/// two point lights, one directional light and a camera.
pub struct ProceduralScene {
    meshes: Vec<MeshData>,
    nodes: Vec<MeshNode>,
    materials: Vec<Material>,
    lights: Vec<SceneLight>,
    cameras: Vec<SceneCamera>,
    /// Node indices of the orbiting spheres, with their base angle.
    orbiting: Vec<(usize, f32)>,
}

const PILLAR_COUNT: usize = 8;
const RING_RADIUS: f32 = 30.0;

impl ProceduralScene {
    pub fn new() -> Self {
        let meshes = vec![
            create_plane_geometry(160.0, 8.0),
            create_box_geometry([2.5, 15.0, 2.5]),
            create_sphere_geometry(4.0, 16, 32),
        ];

        let materials = vec![
            Material {
                diffuse_color: Vec4::new(0.6, 0.6, 0.65, 1.0),
                specular_strength: 0.2,
            },
            Material {
                diffuse_color: Vec4::new(0.85, 0.8, 0.7, 1.0),
                specular_strength: 0.4,
            },
            Material {
                diffuse_color: Vec4::new(0.9, 0.9, 0.9, 1.0),
                specular_strength: 0.9,
            },
        ];

        let mut nodes = vec![MeshNode {
            mesh: 0,
            material: 0,
            world: Mat4::IDENTITY,
        }];
        let mut orbiting = Vec::new();
        for i in 0..PILLAR_COUNT {
            let angle = i as f32 / PILLAR_COUNT as f32 * std::f32::consts::TAU;
            let position = Vec3::new(angle.sin() * RING_RADIUS, 15.0, angle.cos() * RING_RADIUS);
            nodes.push(MeshNode {
                mesh: 1,
                material: 1,
                world: Mat4::from_translation(position),
            });

            let sphere_angle = angle + std::f32::consts::PI / PILLAR_COUNT as f32;
            orbiting.push((nodes.len(), sphere_angle));
            nodes.push(MeshNode {
                mesh: 2,
                material: 2,
                world: Self::orbit_transform(sphere_angle),
            });
        }

        let lights = vec![
            SceneLight::point(Vec3::new(1.0, 0.6, 0.3), Vec3::new(0.0, 10.0, 0.0)),
            SceneLight::point(Vec3::new(0.3, 0.6, 1.0), Vec3::new(15.0, 25.0, -15.0)),
            SceneLight::directional(
                Vec3::new(1.0, 0.95, 0.9),
                Mat4::from_quat(Quat::from_rotation_x(0.4) * Quat::from_rotation_z(0.3)),
            ),
        ];

        Self {
            meshes,
            nodes,
            materials,
            lights,
            cameras: vec![SceneCamera::default()],
            orbiting,
        }
    }

    fn orbit_transform(angle: f32) -> Mat4 {
        let radius = RING_RADIUS * 0.6;
        Mat4::from_translation(Vec3::new(angle.sin() * radius, 6.0, angle.cos() * radius))
    }
}

impl Default for ProceduralScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneProvider for ProceduralScene {
    fn meshes(&self) -> &[MeshData] {
        &self.meshes
    }

    fn mesh_nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    fn materials(&self) -> &[Material] {
        &self.materials
    }

    fn lights(&self) -> &[SceneLight] {
        &self.lights
    }

    fn cameras(&self) -> &[SceneCamera] {
        &self.cameras
    }

    fn set_animation_time(&mut self, time_ms: f32) {
        let spin = time_ms * 0.0002;
        for (node, base) in &self.orbiting {
            self.nodes[*node].world = Self::orbit_transform(base + spin);
        }
    }
}

// ============================================================================
// OBJ scene
// ============================================================================

/// Scene loaded from a Wavefront OBJ file, with a default camera and lights.
pub struct ObjScene {
    meshes: Vec<MeshData>,
    nodes: Vec<MeshNode>,
    materials: Vec<Material>,
    lights: Vec<SceneLight>,
    cameras: Vec<SceneCamera>,
}

impl ObjScene {
    pub fn load(path: &Path) -> Result<Self> {
        let load_options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };
        let (models, materials) = tobj::load_obj(path, &load_options)
            .with_context(|| format!("Failed to load OBJ {}", path.display()))?;

        // Missing .mtl files are not fatal: fall back to a default material.
        let obj_materials = materials.unwrap_or_else(|e| {
            log::warn!("Failed to load OBJ materials for {}: {}", path.display(), e);
            Vec::new()
        });

        let mut materials: Vec<Material> = obj_materials
            .iter()
            .map(|m| {
                let diffuse = m.diffuse.unwrap_or([0.8, 0.8, 0.8]);
                let shininess = m.shininess.unwrap_or(32.0);
                Material {
                    diffuse_color: Vec4::new(diffuse[0], diffuse[1], diffuse[2], 1.0),
                    specular_strength: (shininess / 128.0).clamp(0.0, 1.0),
                }
            })
            .collect();
        let default_material = materials.len();
        materials.push(Material::default());

        let mut meshes = Vec::new();
        let mut nodes = Vec::new();
        let mut bounds_min = Vec3::splat(f32::MAX);
        let mut bounds_max = Vec3::splat(f32::MIN);

        for model in &models {
            let mesh = &model.mesh;
            if mesh.positions.is_empty() || mesh.indices.is_empty() {
                continue;
            }
            let positions: Vec<[f32; 3]> = mesh
                .positions
                .chunks_exact(3)
                .map(|p| [p[0], p[1], p[2]])
                .collect();
            for p in &positions {
                bounds_min = bounds_min.min(Vec3::from_array(*p));
                bounds_max = bounds_max.max(Vec3::from_array(*p));
            }

            let normals: Vec<[f32; 3]> = if mesh.normals.len() == mesh.positions.len() {
                mesh.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]).collect()
            } else {
                compute_vertex_normals(&positions, &mesh.indices)
            };
            let has_uvs = mesh.texcoords.len() / 2 == positions.len();

            let vertices = positions
                .iter()
                .zip(normals.iter())
                .enumerate()
                .map(|(i, (p, n))| {
                    let uv = if has_uvs {
                        [mesh.texcoords[i * 2], 1.0 - mesh.texcoords[i * 2 + 1]]
                    } else {
                        [0.0, 0.0]
                    };
                    Vertex::new(*p, *n, uv)
                })
                .collect();

            let material = mesh
                .material_id
                .filter(|id| *id < default_material)
                .unwrap_or(default_material);
            nodes.push(MeshNode {
                mesh: meshes.len(),
                material,
                world: Mat4::IDENTITY,
            });
            meshes.push(MeshData::indexed(vertices, mesh.indices.clone()));
        }

        if meshes.is_empty() {
            anyhow::bail!("OBJ file {} contains no triangles", path.display());
        }

        // Frame the model: camera and lights are placed relative to its bounds.
        let centre = (bounds_min + bounds_max) * 0.5;
        let extent = (bounds_max - bounds_min).length().max(1.0);
        let camera = SceneCamera {
            position: centre + Vec3::new(0.0, extent * 0.3, extent),
            target: centre,
            far: extent * 20.0,
            ..Default::default()
        };
        let lights = vec![
            SceneLight::point(Vec3::new(1.0, 0.9, 0.8), centre + Vec3::new(0.0, extent * 0.25, 0.0)),
            SceneLight::directional(Vec3::ONE, Mat4::from_rotation_x(0.5)),
        ];

        log::info!(
            "Loaded {} meshes and {} materials from {}",
            meshes.len(),
            materials.len(),
            path.display()
        );

        Ok(Self {
            meshes,
            nodes,
            materials,
            lights,
            cameras: vec![camera],
        })
    }
}

impl SceneProvider for ObjScene {
    fn meshes(&self) -> &[MeshData] {
        &self.meshes
    }

    fn mesh_nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    fn materials(&self) -> &[Material] {
        &self.materials
    }

    fn lights(&self) -> &[SceneLight] {
        &self.lights
    }

    fn cameras(&self) -> &[SceneCamera] {
        &self.cameras
    }
}

/// Area-weighted vertex normals.
pub fn compute_vertex_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let pa = Vec3::from_array(positions[a]);
        let pb = Vec3::from_array(positions[b]);
        let pc = Vec3::from_array(positions[c]);
        // Unnormalized cross product is proportional to triangle area.
        let n = (pb - pa).cross(pc - pa);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
        .collect()
}

/// Group nodes by material so the G-buffer pass switches material state once per group.
pub fn nodes_by_material(scene: &dyn SceneProvider) -> Vec<(usize, Vec<usize>)> {
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, node) in scene.mesh_nodes().iter().enumerate() {
        groups.entry(node.material).or_default().push(i);
    }
    let mut groups: Vec<(usize, Vec<usize>)> = groups.into_iter().collect();
    groups.sort_by_key(|(material, _)| *material);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyScene {
        cameras: Vec<SceneCamera>,
        materials: Vec<Material>,
    }

    impl SceneProvider for EmptyScene {
        fn meshes(&self) -> &[MeshData] {
            &[]
        }
        fn mesh_nodes(&self) -> &[MeshNode] {
            &[]
        }
        fn materials(&self) -> &[Material] {
            &self.materials
        }
        fn lights(&self) -> &[SceneLight] {
            &[]
        }
        fn cameras(&self) -> &[SceneCamera] {
            &self.cameras
        }
    }

    #[test]
    fn test_procedural_scene_is_valid() {
        let scene = ProceduralScene::new();
        assert!(validate_scene(&scene).is_ok());
        let points = scene
            .lights()
            .iter()
            .filter(|l| l.light_type == LightType::Point)
            .count();
        assert_eq!(points, 2);
        assert_eq!(scene.mesh_nodes().len(), 1 + PILLAR_COUNT * 2);
    }

    #[test]
    fn test_missing_camera() {
        let scene = EmptyScene {
            cameras: vec![],
            materials: vec![Material::default()],
        };
        let err = validate_scene(&scene).unwrap_err();
        assert!(err.to_string().contains("must contain a camera"));
    }

    #[test]
    fn test_missing_materials() {
        let scene = EmptyScene {
            cameras: vec![SceneCamera::default()],
            materials: vec![],
        };
        assert!(matches!(
            validate_scene(&scene),
            Err(RenderError::InvalidSceneData(_))
        ));
    }

    #[test]
    fn test_animation_moves_spheres() {
        let mut scene = ProceduralScene::new();
        let (node, _) = scene.orbiting[0];
        let before = scene.mesh_nodes()[node].world;
        scene.set_animation_time(5000.0);
        assert_ne!(before, scene.mesh_nodes()[node].world);
    }

    #[test]
    fn test_compute_vertex_normals() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let normals = compute_vertex_normals(&positions, &[0, 1, 2]);
        for n in normals {
            assert!((n[2] - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn test_nodes_by_material() {
        let scene = ProceduralScene::new();
        let groups = nodes_by_material(&scene);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], (0, vec![0]));
        assert_eq!(groups[1].1.len(), PILLAR_COUNT);
    }
}

//! Vertex format, primitive geometry and GPU mesh upload.
//!
//! All generators produce counter-clockwise front faces with outward normals.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, normal, uv }
    }

    const ATTRIBS: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }

    /// Layout exposing only the position, for proxy and skybox geometry.
    pub fn position_only_desc() -> wgpu::VertexBufferLayout<'static> {
        const POSITION: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION,
        }
    }
}

/// Vertex for full-screen passes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// One oversized triangle covering the whole viewport (counter-clockwise).
pub const FULLSCREEN_TRIANGLE: &[QuadVertex] = &[
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [ 3.0, -1.0], uv: [2.0, 1.0] },
    QuadVertex { position: [-1.0,  3.0], uv: [0.0, -1.0] },
];

/// CPU-side mesh.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    /// `None` for non-indexed triangle lists.
    pub indices: Option<Vec<u32>>,
}

impl MeshData {
    pub fn indexed(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices: Some(indices),
        }
    }

    /// Vertex or index count, whichever the draw uses.
    pub fn element_count(&self) -> u32 {
        match &self.indices {
            Some(indices) => indices.len() as u32,
            None => self.vertices.len() as u32,
        }
    }

    /// Iterate triangles as vertex index triples.
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        match &self.indices {
            Some(indices) => indices
                .chunks_exact(3)
                .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
                .collect(),
            None => (0..self.vertices.len() / 3)
                .map(|i| [i * 3, i * 3 + 1, i * 3 + 2])
                .collect(),
        }
    }
}

/// Mesh uploaded to GPU buffers.
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: Option<wgpu::Buffer>,
    pub element_count: u32,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, mesh: &MeshData, label: &str) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertex Buffer", label)),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = mesh.indices.as_ref().map(|indices| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} Index Buffer", label)),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        Self {
            vertex_buffer,
            index_buffer,
            element_count: mesh.element_count(),
        }
    }

    /// Bind buffers and issue the draw.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        match &self.index_buffer {
            Some(index_buffer) => {
                pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..self.element_count, 0, 0..1);
            }
            None => pass.draw(0..self.element_count, 0..1),
        }
    }
}

/// Full-screen triangle vertex buffer.
pub fn create_fullscreen_buffer(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(FULLSCREEN_TRIANGLE),
        usage: wgpu::BufferUsages::VERTEX,
    })
}

// ============================================================================
// Primitives
// ============================================================================

/// Axis-aligned box centred at the origin with the given half extents.
pub fn create_box_geometry(half: [f32; 3]) -> MeshData {
    let [hx, hy, hz] = half;
    // (normal, tangent u, tangent v); corners are n + (-u -v), (+u -v), (+u +v), (-u +v)
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv, uv) in [
            (-1.0, -1.0, [0.0, 1.0]),
            (1.0, -1.0, [1.0, 1.0]),
            (1.0, 1.0, [1.0, 0.0]),
            (-1.0, 1.0, [0.0, 0.0]),
        ] {
            let p = [
                (n[0] + su * u[0] + sv * v[0]) * hx,
                (n[1] + su * u[1] + sv * v[1]) * hy,
                (n[2] + su * u[2] + sv * v[2]) * hz,
            ];
            vertices.push(Vertex::new(p, n, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    MeshData::indexed(vertices, indices)
}

/// Plane in XZ (Y up) centred at the origin.
pub fn create_plane_geometry(size: f32, uv_repeat: f32) -> MeshData {
    let h = size * 0.5;
    let n = [0.0, 1.0, 0.0];
    let vertices = vec![
        Vertex::new([-h, 0.0, -h], n, [0.0, 0.0]),
        Vertex::new([h, 0.0, -h], n, [uv_repeat, 0.0]),
        Vertex::new([h, 0.0, h], n, [uv_repeat, uv_repeat]),
        Vertex::new([-h, 0.0, h], n, [0.0, uv_repeat]),
    ];
    MeshData::indexed(vertices, vec![0, 2, 1, 0, 3, 2])
}

/// UV sphere centred at the origin.
pub fn create_sphere_geometry(radius: f32, lat_segments: u32, lon_segments: u32) -> MeshData {
    let lat_segments = lat_segments.max(2);
    let lon_segments = lon_segments.max(3);
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    for lat in 0..=lat_segments {
        let theta = std::f32::consts::PI * (lat as f32) / (lat_segments as f32);
        let (sin_theta, cos_theta) = theta.sin_cos();

        for lon in 0..=lon_segments {
            let phi = 2.0 * std::f32::consts::PI * (lon as f32) / (lon_segments as f32);
            let (sin_phi, cos_phi) = phi.sin_cos();
            let n = [cos_phi * sin_theta, cos_theta, sin_phi * sin_theta];
            vertices.push(Vertex::new(
                [n[0] * radius, n[1] * radius, n[2] * radius],
                n,
                [lon as f32 / lon_segments as f32, lat as f32 / lat_segments as f32],
            ));
        }
    }

    for lat in 0..lat_segments {
        for lon in 0..lon_segments {
            let first = lat * (lon_segments + 1) + lon;
            let second = first + lon_segments + 1;

            indices.extend_from_slice(&[first, first + 1, second]);
            indices.extend_from_slice(&[second, first + 1, second + 1]);
        }
    }

    MeshData::indexed(vertices, indices)
}

/// Low-poly unit sphere used as the point light volume.
///
/// Vertices sit on the unit sphere, so flat faces are slightly inside it;
/// the proxy is scaled up by the ratio of the face inradius to cover that.
pub fn create_light_proxy_geometry() -> MeshData {
    const LAT: u32 = 8;
    const LON: u32 = 12;
    let inradius = (std::f32::consts::PI / LAT as f32).cos();
    create_sphere_geometry(1.0 / inradius, LAT, LON)
}

/// Concatenate meshes, each transformed by its matrix, into one indexed mesh.
pub fn merge_geometry(parts: &[(MeshData, Mat4)]) -> MeshData {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for (mesh, transform) in parts {
        let base = vertices.len() as u32;
        let normal_matrix = transform.inverse().transpose();
        vertices.extend(mesh.vertices.iter().map(|v| {
            let position = transform.transform_point3(Vec3::from_array(v.position));
            let normal = normal_matrix
                .transform_vector3(Vec3::from_array(v.normal))
                .normalize_or_zero();
            Vertex::new(position.to_array(), normal.to_array(), v.uv)
        }));
        indices.extend(
            mesh.triangles()
                .into_iter()
                .flatten()
                .map(|i| base + i as u32),
        );
    }
    MeshData::indexed(vertices, indices)
}

/// Plinth, column and head of the bloom demo statue, standing on y = 0.
pub fn create_statue_geometry() -> MeshData {
    merge_geometry(&[
        (
            create_box_geometry([4.0, 1.5, 4.0]),
            Mat4::from_translation(Vec3::new(0.0, 1.5, 0.0)),
        ),
        (
            create_box_geometry([2.0, 6.0, 2.0]),
            Mat4::from_translation(Vec3::new(0.0, 9.0, 0.0)),
        ),
        (
            create_sphere_geometry(3.5, 16, 32),
            Mat4::from_translation(Vec3::new(0.0, 18.5, 0.0)),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
    }

    fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ]
    }

    fn assert_outward_ccw(mesh: &MeshData) {
        for [a, b, c] in mesh.triangles() {
            let (va, vb, vc) = (mesh.vertices[a], mesh.vertices[b], mesh.vertices[c]);
            let n = cross(sub(vb.position, va.position), sub(vc.position, va.position));
            let area = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if area < 1e-6 {
                continue; // pole triangles collapse
            }
            let avg = [
                va.normal[0] + vb.normal[0] + vc.normal[0],
                va.normal[1] + vb.normal[1] + vc.normal[1],
                va.normal[2] + vb.normal[2] + vc.normal[2],
            ];
            let dot = n[0] * avg[0] + n[1] * avg[1] + n[2] * avg[2];
            assert!(dot > 0.0, "triangle {:?} winds clockwise", [a, b, c]);
        }
    }

    #[test]
    fn test_vertex_size() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<QuadVertex>(), 16);
    }

    #[test]
    fn test_box_winding() {
        let mesh = create_box_geometry([1.0, 2.0, 3.0]);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.element_count(), 36);
        assert_outward_ccw(&mesh);
    }

    #[test]
    fn test_plane_winding() {
        assert_outward_ccw(&create_plane_geometry(10.0, 1.0));
    }

    #[test]
    fn test_sphere_winding() {
        let mesh = create_sphere_geometry(0.5, 16, 32);
        assert_outward_ccw(&mesh);
        for v in &mesh.vertices {
            let r = (v.position[0].powi(2) + v.position[1].powi(2) + v.position[2].powi(2)).sqrt();
            assert!((r - 0.5).abs() < 0.001);
        }
    }

    #[test]
    fn test_light_proxy_covers_unit_sphere() {
        let mesh = create_light_proxy_geometry();
        assert_outward_ccw(&mesh);
        let r = mesh.vertices[0].position[1];
        assert!(r > 1.0);
    }

    #[test]
    fn test_merge_offsets_indices() {
        let statue = create_statue_geometry();
        let parts = [
            create_box_geometry([4.0, 1.5, 4.0]),
            create_box_geometry([2.0, 6.0, 2.0]),
            create_sphere_geometry(3.5, 16, 32),
        ];
        let vertices: usize = parts.iter().map(|m| m.vertices.len()).sum();
        let elements: u32 = parts.iter().map(|m| m.element_count()).sum();
        assert_eq!(statue.vertices.len(), vertices);
        assert_eq!(statue.element_count(), elements);
        assert_outward_ccw(&statue);
        let lowest = statue
            .vertices
            .iter()
            .map(|v| v.position[1])
            .fold(f32::MAX, f32::min);
        assert!(lowest.abs() < 1e-4);
    }
}

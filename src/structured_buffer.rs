//! Schema-driven uniform buffer layout.
//!
//! A [`StructLayout`] is built from an ordered list of named fields and
//! computes WGSL uniform-address-space offsets for each of them. A buffer
//! may hold several copies of the struct ("dynamic slices", e.g. one per
//! light or per mesh node); slices are placed at a stride rounded up to the
//! device's `min_uniform_buffer_offset_alignment` so each slice can be bound
//! with a dynamic offset.
//!
//! [`BufferWriter`] writes typed values by field name into the bytes of such
//! a buffer. Getting those bytes to the GPU is the job of
//! [`crate::gpu::uniform_buffer::StructuredBuffer`].

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Element types a structured buffer field can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuDataType {
    Float,
    Int,
    UInt,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl GpuDataType {
    /// Size in bytes of one element (without trailing array padding).
    pub fn size(self) -> usize {
        match self {
            GpuDataType::Float | GpuDataType::Int | GpuDataType::UInt => 4,
            GpuDataType::Vec2 => 8,
            GpuDataType::Vec3 => 12,
            GpuDataType::Vec4 => 16,
            // mat3x3<f32> is three vec3 columns, each padded to 16 bytes
            GpuDataType::Mat3 => 48,
            GpuDataType::Mat4 => 64,
        }
    }

    /// Natural alignment in the uniform address space.
    pub fn alignment(self) -> usize {
        match self {
            GpuDataType::Float | GpuDataType::Int | GpuDataType::UInt => 4,
            GpuDataType::Vec2 => 8,
            GpuDataType::Vec3 | GpuDataType::Vec4 | GpuDataType::Mat3 | GpuDataType::Mat4 => 16,
        }
    }

    /// Stride between array elements. Uniform arrays round elements up to 16 bytes.
    pub fn array_stride(self) -> usize {
        round_up(self.size(), 16)
    }
}

/// One named field of a structured buffer schema.
#[derive(Clone, Debug)]
pub struct FieldDesc {
    pub name: String,
    pub data_type: GpuDataType,
    /// `None` for a plain field, `Some(n)` for a fixed-size array.
    pub array_len: Option<usize>,
}

impl FieldDesc {
    pub fn new(name: impl Into<String>, data_type: GpuDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            array_len: None,
        }
    }

    pub fn array(name: impl Into<String>, data_type: GpuDataType, len: usize) -> Self {
        Self {
            name: name.into(),
            data_type,
            array_len: Some(len.max(1)),
        }
    }

    fn alignment(&self) -> usize {
        match self.array_len {
            Some(_) => 16,
            None => self.data_type.alignment(),
        }
    }

    fn size(&self) -> usize {
        match self.array_len {
            Some(n) => self.data_type.array_stride() * n,
            None => self.data_type.size(),
        }
    }
}

/// A field with its resolved byte offset inside one slice.
#[derive(Clone, Debug)]
pub struct FieldLayout {
    pub desc: FieldDesc,
    pub offset: usize,
}

/// Errors from accessing a structured buffer by name.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' holds {expected:?}, not {actual:?}")]
    TypeMismatch {
        field: String,
        expected: GpuDataType,
        actual: GpuDataType,
    },

    #[error("slice {index} out of range ({count} slices)")]
    SliceOutOfRange { index: usize, count: usize },

    #[error("element {index} of '{field}' out of range ({len} elements)")]
    ArrayIndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },
}

/// Resolved layout of a struct repeated over `slice_count` dynamic slices.
#[derive(Clone, Debug)]
pub struct StructLayout {
    fields: Vec<FieldLayout>,
    struct_size: usize,
    slice_stride: usize,
    slice_count: usize,
}

impl StructLayout {
    /// Lay out `fields` in order.
    ///
    /// `min_alignment` is the device's uniform buffer offset alignment
    /// (a power of two); `slice_count` is clamped to at least one.
    pub fn new(fields: Vec<FieldDesc>, slice_count: usize, min_alignment: usize) -> Self {
        let mut offset = 0;
        let mut resolved = Vec::with_capacity(fields.len());
        for desc in fields {
            offset = round_up(offset, desc.alignment());
            let size = desc.size();
            resolved.push(FieldLayout { desc, offset });
            offset += size;
        }

        // Uniform structs are 16-byte aligned, so their size rounds up too.
        let struct_size = round_up(offset.max(16), 16);
        let slice_stride = round_up(struct_size, min_alignment.max(16));

        Self {
            fields: resolved,
            struct_size,
            slice_stride,
            slice_count: slice_count.max(1),
        }
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&FieldLayout, LayoutError> {
        self.fields
            .iter()
            .find(|f| f.desc.name == name)
            .ok_or_else(|| LayoutError::UnknownField(name.to_string()))
    }

    /// Size of a single struct instance.
    pub fn struct_size(&self) -> usize {
        self.struct_size
    }

    pub fn slice_count(&self) -> usize {
        self.slice_count
    }

    /// Byte offset to bind for slice `index`.
    pub fn dynamic_slice_offset(&self, index: usize) -> usize {
        index * self.slice_stride
    }

    /// Byte size to bind for one slice.
    pub fn dynamic_slice_size(&self) -> usize {
        self.struct_size
    }

    pub fn slice_stride(&self) -> usize {
        self.slice_stride
    }

    /// Total size of the backing buffer.
    pub fn buffer_size(&self) -> usize {
        self.slice_stride * (self.slice_count - 1) + self.struct_size
    }

    /// Absolute byte range for `field[element]` in slice `slice`.
    fn locate(
        &self,
        name: &str,
        slice: usize,
        element: Option<usize>,
        data_type: GpuDataType,
    ) -> Result<(usize, usize), LayoutError> {
        if slice >= self.slice_count {
            return Err(LayoutError::SliceOutOfRange {
                index: slice,
                count: self.slice_count,
            });
        }
        let field = self.field(name)?;
        if field.desc.data_type != data_type {
            return Err(LayoutError::TypeMismatch {
                field: name.to_string(),
                expected: field.desc.data_type,
                actual: data_type,
            });
        }

        let mut offset = self.dynamic_slice_offset(slice) + field.offset;
        match (element, field.desc.array_len) {
            (Some(index), Some(len)) => {
                if index >= len {
                    return Err(LayoutError::ArrayIndexOutOfRange {
                        field: name.to_string(),
                        index,
                        len,
                    });
                }
                offset += index * data_type.array_stride();
            }
            (Some(index), None) if index > 0 => {
                return Err(LayoutError::ArrayIndexOutOfRange {
                    field: name.to_string(),
                    index,
                    len: 1,
                });
            }
            _ => {}
        }
        Ok((offset, data_type.size()))
    }
}

/// A value that can be written into a structured buffer field.
pub trait GpuValue {
    const DATA_TYPE: GpuDataType;

    /// Write exactly `DATA_TYPE.size()` bytes.
    fn write_to(&self, out: &mut [u8]);
}

impl GpuValue for f32 {
    const DATA_TYPE: GpuDataType = GpuDataType::Float;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(self));
    }
}

impl GpuValue for i32 {
    const DATA_TYPE: GpuDataType = GpuDataType::Int;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(self));
    }
}

impl GpuValue for u32 {
    const DATA_TYPE: GpuDataType = GpuDataType::UInt;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(self));
    }
}

impl GpuValue for Vec2 {
    const DATA_TYPE: GpuDataType = GpuDataType::Vec2;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::cast_slice(&self.to_array()));
    }
}

impl GpuValue for Vec3 {
    const DATA_TYPE: GpuDataType = GpuDataType::Vec3;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::cast_slice(&self.to_array()));
    }
}

impl GpuValue for Vec4 {
    const DATA_TYPE: GpuDataType = GpuDataType::Vec4;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::cast_slice(&self.to_array()));
    }
}

impl GpuValue for [f32; 4] {
    const DATA_TYPE: GpuDataType = GpuDataType::Vec4;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::cast_slice(self));
    }
}

impl GpuValue for Mat3 {
    const DATA_TYPE: GpuDataType = GpuDataType::Mat3;
    fn write_to(&self, out: &mut [u8]) {
        let cols = [self.x_axis, self.y_axis, self.z_axis];
        for (i, col) in cols.iter().enumerate() {
            let padded = [col.x, col.y, col.z, 0.0f32];
            out[i * 16..(i + 1) * 16].copy_from_slice(bytemuck::cast_slice(&padded));
        }
    }
}

impl GpuValue for Mat4 {
    const DATA_TYPE: GpuDataType = GpuDataType::Mat4;
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::cast_slice(&self.to_cols_array()));
    }
}

/// Typed writer over the bytes of a structured buffer.
pub struct BufferWriter<'a> {
    layout: &'a StructLayout,
    bytes: &'a mut [u8],
    written: Option<(usize, usize)>,
}

impl<'a> BufferWriter<'a> {
    /// `bytes` must be at least `layout.buffer_size()` long.
    pub fn new(layout: &'a StructLayout, bytes: &'a mut [u8]) -> Self {
        Self {
            layout,
            bytes,
            written: None,
        }
    }

    pub fn layout(&self) -> &StructLayout {
        self.layout
    }

    /// Write `value` into `name` of slice `slice`.
    pub fn set<T: GpuValue>(&mut self, name: &str, slice: usize, value: T) -> Result<(), LayoutError> {
        let (offset, size) = self.layout.locate(name, slice, None, T::DATA_TYPE)?;
        self.write_at(offset, size, &value);
        Ok(())
    }

    /// Write `value` into element `index` of array field `name`.
    pub fn set_array_element<T: GpuValue>(
        &mut self,
        name: &str,
        slice: usize,
        index: usize,
        value: T,
    ) -> Result<(), LayoutError> {
        let (offset, size) = self.layout.locate(name, slice, Some(index), T::DATA_TYPE)?;
        self.write_at(offset, size, &value);
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Byte range touched so far, as `(start, end)`.
    pub fn written_range(&self) -> Option<(usize, usize)> {
        self.written
    }

    fn write_at<T: GpuValue>(&mut self, offset: usize, size: usize, value: &T) {
        value.write_to(&mut self.bytes[offset..offset + size]);
        self.written = Some(match self.written {
            Some((start, end)) => (start.min(offset), end.max(offset + size)),
            None => (offset, offset + size),
        });
    }
}

pub(crate) fn round_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_light_layout(slices: usize, alignment: usize) -> StructLayout {
        StructLayout::new(
            vec![
                FieldDesc::new("mWorldViewProjectionMatrix", GpuDataType::Mat4),
                FieldDesc::new("vViewPosition", GpuDataType::Vec4),
                FieldDesc::new("fRadius", GpuDataType::Float),
                FieldDesc::new("vColor", GpuDataType::Vec3),
                FieldDesc::new("mProxyWorldViewMatrix", GpuDataType::Mat4),
            ],
            slices,
            alignment,
        )
    }

    #[test]
    fn test_field_offsets() {
        let layout = point_light_layout(1, 256);
        let offsets: Vec<usize> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 64, 80, 96, 112]);
        assert_eq!(layout.struct_size(), 176);
    }

    #[test]
    fn test_alignment() {
        for alignment in [16usize, 64, 256] {
            let layout = point_light_layout(7, alignment);
            for field in layout.fields() {
                assert_eq!(field.offset % field.desc.data_type.alignment(), 0);
            }
            for i in 0..layout.slice_count() {
                assert_eq!(layout.dynamic_slice_offset(i) % alignment, 0);
                assert!(layout.slice_stride() >= layout.dynamic_slice_size());
            }
        }
    }

    #[test]
    fn test_scalar_after_vec3_packs() {
        let layout = StructLayout::new(
            vec![
                FieldDesc::new("a", GpuDataType::Vec3),
                FieldDesc::new("b", GpuDataType::Float),
            ],
            1,
            256,
        );
        assert_eq!(layout.field("b").unwrap().offset, 12);
        assert_eq!(layout.struct_size(), 16);
    }

    #[test]
    fn test_array_stride() {
        let layout = StructLayout::new(
            vec![
                FieldDesc::new("count", GpuDataType::UInt),
                FieldDesc::array("weights", GpuDataType::Float, 4),
                FieldDesc::new("tail", GpuDataType::Float),
            ],
            1,
            256,
        );
        assert_eq!(layout.field("weights").unwrap().offset, 16);
        assert_eq!(layout.field("tail").unwrap().offset, 80);
    }

    #[test]
    fn test_buffer_size() {
        let layout = point_light_layout(3, 256);
        assert_eq!(layout.slice_stride(), 256);
        assert_eq!(layout.buffer_size(), 2 * 256 + 176);
    }

    #[test]
    fn test_writer() {
        let layout = point_light_layout(2, 256);
        let mut bytes = vec![0u8; layout.buffer_size()];
        let mut writer = BufferWriter::new(&layout, &mut bytes);
        writer.set("fRadius", 1, 9.5f32).unwrap();
        writer
            .set("vViewPosition", 0, Vec4::new(1.0, 2.0, 3.0, 4.0))
            .unwrap();
        assert_eq!(writer.written_range(), Some((64, 256 + 84)));

        let radius: f32 = bytemuck::pod_read_unaligned(&bytes[256 + 80..256 + 84]);
        assert!((radius - 9.5).abs() < 0.001);
        let y: f32 = bytemuck::pod_read_unaligned(&bytes[68..72]);
        assert!((y - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_writer_errors() {
        let layout = point_light_layout(2, 256);
        let mut bytes = vec![0u8; layout.buffer_size()];
        let mut writer = BufferWriter::new(&layout, &mut bytes);

        assert_eq!(
            writer.set("missing", 0, 1.0f32),
            Err(LayoutError::UnknownField("missing".into()))
        );
        assert!(matches!(
            writer.set("fRadius", 0, Vec4::ZERO),
            Err(LayoutError::TypeMismatch { .. })
        ));
        assert_eq!(
            writer.set("fRadius", 2, 1.0f32),
            Err(LayoutError::SliceOutOfRange { index: 2, count: 2 })
        );
        assert!(matches!(
            writer.set_array_element("fRadius", 0, 1, 1.0f32),
            Err(LayoutError::ArrayIndexOutOfRange { .. })
        ));
        assert_eq!(writer.written_range(), None);
    }

    #[test]
    fn test_mat3_padding() {
        let layout = StructLayout::new(vec![FieldDesc::new("m", GpuDataType::Mat3)], 1, 16);
        let mut bytes = vec![0xffu8; layout.buffer_size()];
        let mut writer = BufferWriter::new(&layout, &mut bytes);
        writer.set("m", 0, Mat3::IDENTITY).unwrap();
        let floats: Vec<f32> = bytes[..48]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(&floats[..4], &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(&floats[4..8], &[0.0, 1.0, 0.0, 0.0]);
    }
}

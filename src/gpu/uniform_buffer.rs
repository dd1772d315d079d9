//! GPU uniform buffers written through a [`StructLayout`].
//!
//! Writes always land in a CPU mirror first. Acquiring a [`MappedBuffer`]
//! hands out a typed writer; dropping it uploads the data according to the
//! device's [`BufferUpdateStrategy`], on every exit path.

use std::ops::{Deref, DerefMut};

use crate::gpu::context::BufferUpdateStrategy;
use crate::structured_buffer::{round_up, BufferWriter, StructLayout};

pub struct StructuredBuffer {
    label: String,
    layout: StructLayout,
    buffer: wgpu::Buffer,
    mirror: Vec<u8>,
    strategy: BufferUpdateStrategy,
}

impl StructuredBuffer {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        layout: StructLayout,
        strategy: BufferUpdateStrategy,
    ) -> Self {
        let size = round_up(layout.buffer_size(), wgpu::COPY_BUFFER_ALIGNMENT as usize);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self {
            label: label.to_string(),
            layout,
            buffer,
            mirror: vec![0; size],
            strategy,
        }
    }

    pub fn layout(&self) -> &StructLayout {
        &self.layout
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Start a write cycle. Data reaches the GPU when the guard is dropped.
    pub fn map<'a>(&'a mut self, queue: &'a wgpu::Queue) -> MappedBuffer<'a> {
        MappedBuffer {
            queue,
            buffer: &self.buffer,
            strategy: self.strategy,
            label: &self.label,
            writer: BufferWriter::new(&self.layout, &mut self.mirror),
        }
    }

    /// Dynamic offset to bind for slice `index`.
    pub fn dynamic_offset(&self, index: usize) -> u32 {
        self.layout.dynamic_slice_offset(index) as u32
    }

    /// Binding covering a single slice, for use with dynamic offsets.
    pub fn slice_binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: wgpu::BufferSize::new(self.layout.dynamic_slice_size() as u64),
        })
    }

    pub fn slice_size(&self) -> Option<wgpu::BufferSize> {
        wgpu::BufferSize::new(self.layout.dynamic_slice_size() as u64)
    }
}

/// Scoped write access to a [`StructuredBuffer`].
pub struct MappedBuffer<'a> {
    queue: &'a wgpu::Queue,
    buffer: &'a wgpu::Buffer,
    strategy: BufferUpdateStrategy,
    label: &'a str,
    writer: BufferWriter<'a>,
}

impl<'a> Deref for MappedBuffer<'a> {
    type Target = BufferWriter<'a>;

    fn deref(&self) -> &Self::Target {
        &self.writer
    }
}

impl DerefMut for MappedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.writer
    }
}

impl Drop for MappedBuffer<'_> {
    fn drop(&mut self) {
        let bytes = self.writer.bytes();
        let Some((start, end)) = pending_upload(self.strategy, self.writer.written_range(), bytes.len()) else {
            return;
        };
        match self.strategy {
            BufferUpdateStrategy::Persistent => {
                self.queue
                    .write_buffer(self.buffer, start as u64, &bytes[start..end]);
            }
            BufferUpdateStrategy::Transient => {
                let size = wgpu::BufferSize::new((end - start) as u64);
                match size.and_then(|size| self.queue.write_buffer_with(self.buffer, start as u64, size)) {
                    Some(mut view) => view.copy_from_slice(&bytes[start..end]),
                    None => log::error!("Failed to map '{}' for writing", self.label),
                }
            }
        }
    }
}

/// Byte range a released guard uploads, or `None` when nothing was written.
///
/// Persistent buffers upload the written range widened to copy alignment;
/// transient ones upload the whole mirror.
fn pending_upload(
    strategy: BufferUpdateStrategy,
    written: Option<(usize, usize)>,
    len: usize,
) -> Option<(usize, usize)> {
    match strategy {
        BufferUpdateStrategy::Persistent => upload_range(written, len),
        BufferUpdateStrategy::Transient => written.map(|_| (0, len)),
    }
}

/// Expand a written byte range to copy alignment.
fn upload_range(written: Option<(usize, usize)>, len: usize) -> Option<(usize, usize)> {
    let (start, end) = written?;
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    let start = start / align * align;
    let end = round_up(end, align).min(len);
    (start < end).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::GpuContext;
    use crate::structured_buffer::{FieldDesc, GpuDataType};
    use glam::Vec4;

    #[test]
    fn test_upload_range_alignment() {
        assert_eq!(upload_range(None, 64), None);
        assert_eq!(upload_range(Some((5, 10)), 64), Some((4, 12)));
        assert_eq!(upload_range(Some((0, 64)), 64), Some((0, 64)));
        assert_eq!(upload_range(Some((60, 70)), 64), Some((60, 64)));
    }

    #[test]
    fn test_pending_upload_per_strategy() {
        use BufferUpdateStrategy::{Persistent, Transient};
        assert_eq!(pending_upload(Persistent, None, 512), None);
        assert_eq!(pending_upload(Transient, None, 512), None);
        assert_eq!(pending_upload(Persistent, Some((258, 262)), 512), Some((256, 264)));
        assert_eq!(pending_upload(Transient, Some((258, 262)), 512), Some((0, 512)));
    }

    fn test_layout() -> StructLayout {
        StructLayout::new(
            vec![
                FieldDesc::new("fScale", GpuDataType::Float),
                FieldDesc::new("vColor", GpuDataType::Vec4),
            ],
            2,
            256,
        )
    }

    fn field_offset(layout: &StructLayout, slice: usize, name: &str) -> usize {
        layout.dynamic_slice_offset(slice) + layout.field(name).unwrap().offset
    }

    fn read_back(ctx: &GpuContext, buffer: &wgpu::Buffer) -> Vec<u8> {
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Readback"),
            size: buffer.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Uniform Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, buffer.size());
        ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, |result| result.unwrap());
        ctx.device.poll(wgpu::Maintain::Wait);
        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        bytes
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        bytemuck::pod_read_unaligned(&bytes[offset..offset + 4])
    }

    #[test]
    fn test_release_uploads_per_strategy() {
        // Needs a real adapter; machines without one skip.
        let Ok(ctx) = pollster::block_on(GpuContext::new_headless(None)) else {
            return;
        };

        for strategy in [BufferUpdateStrategy::Persistent, BufferUpdateStrategy::Transient] {
            let layout = test_layout();
            let scale_0 = field_offset(&layout, 0, "fScale");
            let scale_1 = field_offset(&layout, 1, "fScale");
            let color_1 = field_offset(&layout, 1, "vColor");
            let mut uniforms = StructuredBuffer::new(&ctx.device, "Upload Test", layout, strategy);
            let zeros = vec![0u8; uniforms.buffer().size() as usize];

            {
                let mut mapped = uniforms.map(&ctx.queue);
                mapped.set("fScale", 0, 2.5f32).unwrap();
                mapped.set("fScale", 1, 4.0f32).unwrap();
                mapped.set("vColor", 1, Vec4::new(0.1, 0.2, 0.3, 0.4)).unwrap();
            }
            let bytes = read_back(&ctx, uniforms.buffer());
            assert_eq!(read_f32(&bytes, scale_0), 2.5, "{}", strategy);
            assert_eq!(read_f32(&bytes, scale_1), 4.0, "{}", strategy);
            assert_eq!(read_f32(&bytes, color_1 + 12), 0.4, "{}", strategy);

            // Clear the GPU copy behind the mirror's back.
            ctx.queue.write_buffer(uniforms.buffer(), 0, &zeros);
            drop(uniforms.map(&ctx.queue));
            let bytes = read_back(&ctx, uniforms.buffer());
            assert!(bytes.iter().all(|b| *b == 0), "{} uploaded an untouched buffer", strategy);

            {
                let mut mapped = uniforms.map(&ctx.queue);
                mapped.set("fScale", 1, 8.0f32).unwrap();
            }
            let bytes = read_back(&ctx, uniforms.buffer());
            assert_eq!(read_f32(&bytes, scale_1), 8.0, "{}", strategy);
            match strategy {
                // Only the aligned range around slice 1's scale was sent.
                BufferUpdateStrategy::Persistent => {
                    assert_eq!(read_f32(&bytes, scale_0), 0.0);
                    assert_eq!(read_f32(&bytes, color_1 + 12), 0.0);
                    assert!(bytes[..scale_1].iter().all(|b| *b == 0));
                    assert!(bytes[scale_1 + 4..].iter().all(|b| *b == 0));
                }
                // The whole mirror was sent again.
                BufferUpdateStrategy::Transient => {
                    assert_eq!(read_f32(&bytes, scale_0), 2.5);
                    assert_eq!(read_f32(&bytes, color_1 + 12), 0.4);
                }
            }
        }
    }
}

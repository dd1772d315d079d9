//! Copy rendered frames back to the CPU and write them as PNG.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::UVec2;

/// Bytes per row of a `width`-texel RGBA8 copy, padded to the copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padding = (align - unpadded % align) % align;
    unpadded + padding
}

/// Strip row padding from a mapped copy.
pub fn unpad_rows(data: &[u8], size: UVec2, padded_row: u32) -> Vec<u8> {
    let row = (size.x * 4) as usize;
    let mut unpadded = Vec::with_capacity(row * size.y as usize);
    for y in 0..size.y as usize {
        let start = y * padded_row as usize;
        unpadded.extend_from_slice(&data[start..start + row]);
    }
    unpadded
}

/// Staging buffer sized for one output frame.
pub struct FrameReadback {
    buffer: wgpu::Buffer,
    size: UVec2,
    padded_row: u32,
}

impl FrameReadback {
    pub fn new(device: &wgpu::Device, size: UVec2) -> Self {
        let padded_row = padded_bytes_per_row(size.x);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Readback Buffer"),
            size: (padded_row * size.y) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            size,
            padded_row,
        }
    }

    /// Record the copy of `texture` into the staging buffer.
    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) {
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.size.y),
                },
            },
            wgpu::Extent3d {
                width: self.size.x,
                height: self.size.y,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Wait for the copy and return tightly packed RGBA8 pixels.
    pub fn read(&self, device: &wgpu::Device) -> Result<Vec<u8>> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver outlives the poll below.
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| anyhow!("readback callback was dropped"))?
            .context("Failed to map readback buffer")?;

        let pixels = {
            let data = slice.get_mapped_range();
            unpad_rows(&data, self.size, self.padded_row)
        };
        self.buffer.unmap();
        Ok(pixels)
    }

    pub fn save_png(&self, device: &wgpu::Device, path: &Path) -> Result<()> {
        let pixels = self.read(device)?;
        image::save_buffer(path, &pixels, self.size.x, self.size.y, image::ColorType::Rgba8)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(800) % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
    }

    #[test]
    fn test_unpad_rows() {
        let size = UVec2::new(2, 2);
        let padded = padded_bytes_per_row(2) as usize;
        let mut data = vec![0u8; padded * 2];
        data[..8].copy_from_slice(&[1; 8]);
        data[padded..padded + 8].copy_from_slice(&[2; 8]);
        let pixels = unpad_rows(&data, size, padded as u32);
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[..8], &[1; 8]);
        assert_eq!(&pixels[8..], &[2; 8]);
    }
}

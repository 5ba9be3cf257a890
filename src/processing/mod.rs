// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing between capture and display.
//!
//! A [`ProcessingGateway`] fills an output texture from an input texture on the
//! render thread's device. The render loop allocates the output, calls the
//! gateway, and only samples the output when the call succeeded. In raw mode
//! every gateway must produce a byte-identical copy of the input.

pub mod edges;

use image::RgbaImage;
use tracing::debug;

use crate::constants;
use crate::errors::ProcessingError;
use crate::gpu::{GpuDevice, TextureHandle};
use crate::render::mode::ProcessingMode;

/// Single-frame processing step run on the render thread
pub trait ProcessingGateway: Send {
    fn name(&self) -> &'static str;

    /// Populate `output` from `input`.
    ///
    /// When this returns, `output` is complete for every later command on the
    /// same device.
    fn process(
        &mut self,
        device: &mut dyn GpuDevice,
        input: TextureHandle,
        output: TextureHandle,
        mode: ProcessingMode,
    ) -> Result<(), ProcessingError>;
}

/// Input size, after checking that `output` matches it
fn matching_size(
    device: &dyn GpuDevice,
    input: TextureHandle,
    output: TextureHandle,
) -> Result<(u32, u32), ProcessingError> {
    let input_size = device.texture_size(input)?;
    let output_size = device.texture_size(output)?;
    if input_size != output_size {
        return Err(ProcessingError::SizeMismatch {
            input: input_size,
            output: output_size,
        });
    }
    Ok(input_size)
}

/// Copies the input in every mode
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughGateway;

impl ProcessingGateway for PassthroughGateway {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process(
        &mut self,
        device: &mut dyn GpuDevice,
        input: TextureHandle,
        output: TextureHandle,
        _mode: ProcessingMode,
    ) -> Result<(), ProcessingError> {
        matching_size(device, input, output)?;
        device.copy_texture(input, output)?;
        Ok(())
    }
}

/// Canny edge detection in [`ProcessingMode::Edges`], copy otherwise
#[derive(Debug, Clone, Copy)]
pub struct EdgeDetectionGateway {
    low_threshold: f32,
    high_threshold: f32,
}

impl Default for EdgeDetectionGateway {
    fn default() -> Self {
        Self::new(
            constants::edges::LOW_THRESHOLD,
            constants::edges::HIGH_THRESHOLD,
        )
    }
}

impl EdgeDetectionGateway {
    pub fn new(low_threshold: f32, high_threshold: f32) -> Self {
        Self {
            low_threshold,
            high_threshold,
        }
    }
}

impl ProcessingGateway for EdgeDetectionGateway {
    fn name(&self) -> &'static str {
        "edge-detection"
    }

    fn process(
        &mut self,
        device: &mut dyn GpuDevice,
        input: TextureHandle,
        output: TextureHandle,
        mode: ProcessingMode,
    ) -> Result<(), ProcessingError> {
        let (width, height) = matching_size(device, input, output)?;

        if mode == ProcessingMode::Raw {
            device.copy_texture(input, output)?;
            return Ok(());
        }

        let pixels = device.read_texture(input)?;
        let rgba = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
            ProcessingError::Unavailable(format!(
                "input readback does not hold {}x{} RGBA pixels",
                width, height
            ))
        })?;
        let gray = image::imageops::grayscale(&rgba);
        let edge_map = edges::canny(&gray, self.low_threshold, self.high_threshold);
        let result = edges::to_rgba(&edge_map);
        device.upload_texture(output, width, height, result.as_raw())?;
        debug!(width, height, "Edge detection pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{SoftwareDevice, TextureDesc};

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        (0..width * height)
            .flat_map(|i| [(i % 251) as u8, (i * 7 % 256) as u8, (i / 3 % 256) as u8, 200])
            .collect()
    }

    fn setup(width: u32, height: u32) -> (SoftwareDevice, TextureHandle, TextureHandle) {
        let mut device = SoftwareDevice::new(width, height);
        let input = device.create_texture(TextureDesc::external(width, height)).unwrap();
        let output = device.create_texture(TextureDesc::texture_2d(width, height)).unwrap();
        device
            .upload_texture(input, width, height, &gradient(width, height))
            .unwrap();
        (device, input, output)
    }

    #[test]
    fn test_raw_mode_is_byte_identical() {
        let gateways: Vec<Box<dyn ProcessingGateway>> = vec![
            Box::new(PassthroughGateway),
            Box::new(EdgeDetectionGateway::default()),
        ];
        for mut gateway in gateways {
            let (mut device, input, output) = setup(13, 7);
            gateway
                .process(&mut device, input, output, ProcessingMode::Raw)
                .unwrap();
            assert_eq!(
                device.read_texture(output).unwrap(),
                device.read_texture(input).unwrap(),
                "{} altered raw pixels",
                gateway.name()
            );
        }
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let mut device = SoftwareDevice::new(4, 4);
        let input = device.create_texture(TextureDesc::external(4, 4)).unwrap();
        let output = device.create_texture(TextureDesc::texture_2d(2, 2)).unwrap();
        let result = PassthroughGateway.process(&mut device, input, output, ProcessingMode::Raw);
        assert_eq!(
            result,
            Err(ProcessingError::SizeMismatch {
                input: (4, 4),
                output: (2, 2)
            })
        );
    }

    #[test]
    fn test_edges_mode_outputs_binary_opaque_pixels() {
        let (mut device, input, output) = setup(16, 16);
        let mut gateway = EdgeDetectionGateway::default();
        gateway
            .process(&mut device, input, output, ProcessingMode::Edges)
            .unwrap();
        let pixels = device.read_texture(output).unwrap();
        assert_eq!(pixels.len(), 16 * 16 * 4);
        for px in pixels.chunks_exact(4) {
            assert!(px[0] == 0 || px[0] == 255);
            assert_eq!(px[0], px[1]);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_missing_texture_is_gpu_error() {
        let (mut device, input, output) = setup(4, 4);
        device.delete_texture(output).unwrap();
        let result = EdgeDetectionGateway::default().process(
            &mut device,
            input,
            output,
            ProcessingMode::Edges,
        );
        assert!(matches!(result, Err(ProcessingError::Gpu(_))));
    }
}

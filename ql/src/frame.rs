use anyhow::Result;

use crate::prelude::QlError;

/// One scaled, single-channel game screen with pixel values normalized to `[0, 1]`
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    height: usize,
    width: usize,
    pixels: Vec<f32>,
}

impl Frame {
    pub fn new(
        height: usize,
        width: usize,
        pixels: Vec<f32>,
    ) -> Result<Self> {
        if pixels.len() != height * width {
            return Err(QlError(format!("frame of {}x{} needs {} pixels, got {}", height, width, height * width, pixels.len())).into());
        }
        Ok(Self { height, width, pixels })
    }

    pub fn zeros(
        height: usize,
        width: usize,
    ) -> Self {
        Self::filled(height, width, 0.0)
    }

    pub fn filled(
        height: usize,
        width: usize,
        value: f32,
    ) -> Self {
        Self {
            height,
            width,
            pixels: vec![value; height * width],
        }
    }

    /// Same as [Self::new] for raw 8 bit luminance values, which get scaled into `[0, 1]`
    pub fn from_luma(
        height: usize,
        width: usize,
        luma: &[u8],
    ) -> Result<Self> {
        Self::new(height, width, luma.iter().map(|&p| p as f32 / 255.0).collect())
    }

    pub fn height(&self) -> usize { self.height }

    pub fn width(&self) -> usize { self.width }

    pub fn pixels(&self) -> &[f32] { &self.pixels }
}

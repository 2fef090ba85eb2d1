/// Upper bound applied to the device pixel ratio before sizing any buffer.
pub const MAX_PIXEL_RATIO: f32 = 2.0;

/// Pixel dimensions of an intermediate image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub struct BufferSize {
    pub width: u32,
    pub height: u32,
}

impl BufferSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Size of a buffer downscaled by `2^level`, rounding like the bloom mip chain.
    pub fn mip(self, level: u32) -> Self {
        let divisor = 2f32.powi(level as i32 + 1);
        Self::new(
            (self.width as f32 / divisor).round() as u32,
            (self.height as f32 / divisor).round() as u32,
        )
    }

    pub fn texel(self) -> [f32; 2] {
        [1.0 / self.width as f32, 1.0 / self.height as f32]
    }
}

impl std::fmt::Display for BufferSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Logical display size plus the raw device pixel ratio reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f32,
}

impl ViewportState {
    pub fn new(width: u32, height: u32, device_pixel_ratio: f32) -> Self {
        Self {
            width,
            height,
            device_pixel_ratio,
        }
    }

    /// Returns false for the zero-sized notifications some hosts emit while minimised.
    pub fn is_drawable(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixel_ratio(&self) -> f32 {
        if !self.device_pixel_ratio.is_finite() || self.device_pixel_ratio <= 0.0 {
            return 1.0;
        }
        self.device_pixel_ratio.min(MAX_PIXEL_RATIO)
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    /// Dimensions every sized stage buffer must have for this viewport.
    pub fn buffer_size(&self) -> BufferSize {
        let ratio = self.pixel_ratio();
        BufferSize::new(
            (self.width as f32 * ratio).round() as u32,
            (self.height as f32 * ratio).round() as u32,
        )
    }
}

impl Default for ViewportState {
    fn default() -> Self {
        Self::new(800, 600, 1.0)
    }
}

/// Anti-aliasing policy for the base scene pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antialiasing {
    /// Use 4x MSAA when the HDR target format can resolve it.
    #[default]
    Auto,
    /// Never multisample; pipelines at pixel ratio 1 get the FXAA fallback.
    Off,
}

/// Adapter selection hint forwarded to wgpu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    Low,
    #[default]
    High,
}

/// What we learned about the selected adapter.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub max_texture_dimension: u32,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
            max_texture_dimension: limits.max_texture_dimension_2d,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}

/// Start-up options for the interactive viewer.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Initial logical window size.
    pub window_size: (u32, u32),
    pub title: String,
    pub antialiasing: Antialiasing,
    pub power: GpuPowerPreference,
    /// Hidden windows are used by smoke tests.
    pub show_window: bool,
    /// Exit after this many presented frames.
    pub frame_limit: Option<u64>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_size: (800, 600),
            title: "fxview".into(),
            antialiasing: Antialiasing::default(),
            power: GpuPowerPreference::default(),
            show_window: true,
            frame_limit: None,
        }
    }
}

use composer::{BackendError, TextureId};
use half::f16;
use image::Rgba32FImage;
use wgpu::util::DeviceExt;

use super::context::HDR_FORMAT;

struct ResidentTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Textures uploaded for texture uniforms and the scene environment.
///
/// Ids index into the store and are never reused.
pub(crate) struct TextureStore {
    textures: Vec<ResidentTexture>,
    max_dimension: u32,
    placeholder: ResidentTexture,
}

impl TextureStore {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, max_dimension: u32) -> Self {
        let placeholder = create(device, queue, "placeholder texture", 1, 1, &[f16::ZERO; 4]);
        Self {
            textures: Vec::new(),
            max_dimension,
            placeholder,
        }
    }

    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        image: &Rgba32FImage,
    ) -> Result<TextureId, BackendError> {
        let (width, height) = image.dimensions();
        if width > self.max_dimension || height > self.max_dimension {
            return Err(BackendError::BufferTooLarge {
                size: composer::BufferSize::new(width, height),
                limit: self.max_dimension,
            });
        }
        if width == 0 || height == 0 {
            return Err(BackendError::Internal(anyhow::anyhow!(
                "texture '{label}' is empty"
            )));
        }

        let texels: Vec<f16> = image.as_raw().iter().copied().map(f16::from_f32).collect();
        let resident = create(device, queue, label, width, height, &texels);
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(resident);
        tracing::debug!(label, id = id.0, width, height, "texture uploaded");
        Ok(id)
    }

    pub fn view(&self, id: TextureId) -> Result<&wgpu::TextureView, BackendError> {
        self.textures
            .get(id.0 as usize)
            .map(|texture| &texture.view)
            .ok_or(BackendError::MissingTexture(id))
    }

    /// 1x1 transparent black, bound where no texture is resident yet.
    pub fn placeholder(&self) -> &wgpu::TextureView {
        &self.placeholder.view
    }
}

fn create(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    texels: &[f16],
) -> ResidentTexture {
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        bytemuck::cast_slice(texels),
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    ResidentTexture {
        _texture: texture,
        view,
    }
}

/// Equirect lookups wrap around the horizon and clamp at the poles.
pub(crate) fn environment_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("environment sampler"),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

use composer::BufferSize;

use super::context::HDR_FORMAT;

/// A sampleable HDR colour buffer.
pub(crate) struct RenderTarget {
    pub size: BufferSize,
    _texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl RenderTarget {
    pub(crate) fn new(device: &wgpu::Device, label: &str, size: BufferSize) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            size,
            _texture: texture,
            view,
        }
    }
}

/// Multisampled attachment the scene pass resolves into a [`RenderTarget`].
pub(crate) struct MultisampleTarget {
    pub size: BufferSize,
    _texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl MultisampleTarget {
    pub(crate) fn new(device: &wgpu::Device, size: BufferSize, sample_count: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("msaa scene target"),
            size: extent(size),
            mip_level_count: 1,
            sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            size,
            _texture: texture,
            view,
        }
    }
}

fn extent(size: BufferSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width.max(1),
        height: size.height.max(1),
        depth_or_array_layers: 1,
    }
}

/// The read/write pair every stage ping-pongs between.
pub(crate) struct PingPong {
    pub read: RenderTarget,
    pub write: RenderTarget,
}

impl PingPong {
    pub(crate) fn new(device: &wgpu::Device, size: BufferSize) -> Self {
        Self {
            read: RenderTarget::new(device, "pipeline read buffer", size),
            write: RenderTarget::new(device, "pipeline write buffer", size),
        }
    }

    pub(crate) fn get(&self, id: composer::BufferId) -> &RenderTarget {
        match id {
            composer::BufferId::Read => &self.read,
            composer::BufferId::Write => &self.write,
        }
    }
}

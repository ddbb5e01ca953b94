use wgpu::{Device, Texture, TextureFormat, TextureView};

/// An off-screen render target: one texture plus its view, tagged with its
/// current pixel size. The owning handle stays stable for the lifetime of
/// the pipeline; `resize` reallocates the texture storage behind it.
pub struct Fbo {
    label: &'static str,
    format: TextureFormat,
    texture: Texture,
    view: TextureView,
    width: u32,
    height: u32,
}

impl Fbo {
    pub fn new(
        device: &Device,
        label: &'static str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let (texture, view) = make_texture(device, label, width, height, format);
        Self {
            label,
            format,
            texture,
            view,
            width,
            height,
        }
    }

    /// Reallocate the texture storage for a new surface size. Dimensions are
    /// clamped to 1x1 so a collapsed window never produces an invalid
    /// allocation. A no-op when the size is unchanged.
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if width == self.width && height == self.height {
            return;
        }
        let (texture, view) = make_texture(device, self.label, width, height, self.format);
        self.texture = texture;
        self.view = view;
        self.width = width;
        self.height = height;
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn make_texture(
    device: &Device,
    label: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> (Texture, TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

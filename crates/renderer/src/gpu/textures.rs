use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::api::{ApiError, TextureData};
use crate::introspect::GlslType;

pub(crate) struct GpuTexture {
    pub _texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub dimension: wgpu::TextureViewDimension,
}

impl GpuTexture {
    pub fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        name: &str,
        data: &TextureData,
    ) -> Result<Self, ApiError> {
        let expected = data.width as usize * data.height as usize * 4;
        if data.width == 0 || data.height == 0 || data.rgba.len() != expected {
            return Err(ApiError::InvalidUpload(format!(
                "texture '{name}' is {}x{} with {} bytes of RGBA data",
                data.width,
                data.height,
                data.rgba.len()
            )));
        }
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(&format!("texture {name}")),
                size: wgpu::Extent3d {
                    width: data.width,
                    height: data.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &data.rgba,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            _texture: texture,
            view,
            dimension: wgpu::TextureViewDimension::D2,
        })
    }

    /// 1x1 stand-in bound to texture globals nothing has been uploaded for.
    /// Cube and 3D declarations get a matching view dimension.
    pub fn placeholder(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        dimension: wgpu::TextureViewDimension,
    ) -> Self {
        let layers = match dimension {
            wgpu::TextureViewDimension::Cube => 6,
            _ => 1,
        };
        let texel = [255u8, 255, 255, 255];
        let data: Vec<u8> = texel.repeat(layers as usize);
        let texture_dimension = match dimension {
            wgpu::TextureViewDimension::D1 => wgpu::TextureDimension::D1,
            wgpu::TextureViewDimension::D3 => wgpu::TextureDimension::D3,
            _ => wgpu::TextureDimension::D2,
        };
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("placeholder texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: texture_dimension,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(dimension),
            ..Default::default()
        });
        Self {
            _texture: texture,
            view,
            dimension,
        }
    }
}

pub(crate) fn view_dimension(ty: GlslType) -> Option<wgpu::TextureViewDimension> {
    match ty {
        GlslType::Texture1D => Some(wgpu::TextureViewDimension::D1),
        GlslType::Texture2D => Some(wgpu::TextureViewDimension::D2),
        GlslType::Texture2DArray => Some(wgpu::TextureViewDimension::D2Array),
        GlslType::Texture3D => Some(wgpu::TextureViewDimension::D3),
        GlslType::TextureCube => Some(wgpu::TextureViewDimension::Cube),
        _ => None,
    }
}

pub(crate) fn create_samplers(device: &wgpu::Device) -> (wgpu::Sampler, wgpu::Sampler) {
    let filtering = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("default sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });
    let comparison = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("shadow sampler"),
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        compare: Some(wgpu::CompareFunction::LessEqual),
        ..Default::default()
    });
    (filtering, comparison)
}

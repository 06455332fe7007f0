use log::info;

use crate::error::{create_resource, ParticleError};

// Include a templated shader by specifying a path relative to the shader
// source directory.
#[macro_export]
macro_rules! include_shader {
    ($path:literal) => {
        include_str!(concat!(env!("OUT_DIR"), "/shaders/", $path))
    };
}

fn create_sprite_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    image: &image::RgbaImage,
) -> Result<wgpu::TextureView, ParticleError> {
    let size = wgpu::Extent3d {
        width: image.width(),
        height: image.height(),
        depth_or_array_layers: 1,
    };
    let texture = create_resource(device, "sprite texture", || {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Sprite"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    })?;
    queue.write_texture(
        texture.as_image_copy(),
        image.as_raw(),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * image.width()),
            rows_per_image: Some(image.height()),
        },
        size,
    );
    Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
}

// Read an image file and upload it as the particle sprite.
pub fn load_png_to_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    path: &str,
) -> Result<wgpu::TextureView, ParticleError> {
    let image = image::open(path)?.to_rgba8();
    info!(
        "Loading image with (width, height) = ({}, {})",
        image.width(),
        image.height()
    );
    create_sprite_texture(device, queue, &image)
}

// Soft white disc with a quadratic falloff to transparent edges.
pub fn default_sprite_image(size: u32) -> image::RgbaImage {
    let center = (size as f32 - 1.0) / 2.0;
    image::ImageBuffer::from_fn(size, size, |x, y| {
        let dx = (x as f32 - center) / (center + 0.5);
        let dy = (y as f32 - center) / (center + 0.5);
        let falloff = (1.0 - (dx * dx + dy * dy)).max(0.0);
        image::Rgba([255, 255, 255, (falloff * falloff * 255.0).round() as u8])
    })
}

pub fn create_default_sprite(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    size: u32,
) -> Result<wgpu::TextureView, ParticleError> {
    create_sprite_texture(device, queue, &default_sprite_image(size))
}

use log::info;
use rand::{Rng, SeedableRng};

use crate::error::{create_resource, ParticleError};

// Tileable 3-D value noise, generated once on the host and sampled by the
// emit pass to perturb particle velocities.
pub struct NoiseVolume {
    resolution: u32,
    texels: Vec<[u8; 4]>,
}

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

impl NoiseVolume {
    // `frequency` lattice cells per side; the lattice wraps so the volume
    // tiles seamlessly.
    pub fn generate(resolution: u32, frequency: u32, seed: u64) -> Self {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let cells = frequency.max(1) as usize;
        let lattice: Vec<[f32; 3]> = (0..cells * cells * cells)
            .map(|_| [rng.gen(), rng.gen(), rng.gen()])
            .collect();
        let at = |x: usize, y: usize, z: usize| {
            lattice[x % cells + (y % cells) * cells + (z % cells) * cells * cells]
        };

        let res = resolution as usize;
        let to_lattice = |i: usize| {
            let u = i as f32 * cells as f32 / resolution as f32;
            let cell = u.floor();
            (cell as usize, smoothstep(u - cell))
        };
        let mut texels = Vec::with_capacity(res * res * res);
        for z in 0..res {
            let (z0, tz) = to_lattice(z);
            for y in 0..res {
                let (y0, ty) = to_lattice(y);
                for x in 0..res {
                    let (x0, tx) = to_lattice(x);
                    let mut texel = [0u8, 0, 0, 255];
                    for (channel, out) in texel.iter_mut().take(3).enumerate() {
                        let c = |dx, dy, dz| at(x0 + dx, y0 + dy, z0 + dz)[channel];
                        let x00 = lerp(c(0, 0, 0), c(1, 0, 0), tx);
                        let x10 = lerp(c(0, 1, 0), c(1, 1, 0), tx);
                        let x01 = lerp(c(0, 0, 1), c(1, 0, 1), tx);
                        let x11 = lerp(c(0, 1, 1), c(1, 1, 1), tx);
                        let value = lerp(lerp(x00, x10, ty), lerp(x01, x11, ty), tz);
                        *out = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                    texels.push(texel);
                }
            }
        }
        NoiseVolume { resolution, texels }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn texel(&self, x: u32, y: u32, z: u32) -> [u8; 4] {
        let r = self.resolution as usize;
        self.texels[x as usize + y as usize * r + z as usize * r * r]
    }

    // Same lookup as noise_at in emit.wgsl: nearest texel, wrapped, mapped to
    // [-1, 1].
    pub fn sample(&self, position: [f32; 3], time: f32, scale: f32, scroll: f32) -> [f32; 3] {
        let r = self.resolution as i32;
        let mut cell = [0u32; 3];
        for axis in 0..3 {
            let coordinate = (position[axis] * scale + time * scroll).floor() as i32;
            cell[axis] = coordinate.rem_euclid(r) as u32;
        }
        let texel = self.texel(cell[0], cell[1], cell[2]);
        let mut drift = [0.0; 3];
        for axis in 0..3 {
            drift[axis] = (texel[axis] as f32 / 255.0 - 0.5) * 2.0;
        }
        drift
    }

    pub fn create_texture(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<wgpu::TextureView, ParticleError> {
        let size = wgpu::Extent3d {
            width: self.resolution,
            height: self.resolution,
            depth_or_array_layers: self.resolution,
        };
        info!("Uploading {}^3 noise volume", self.resolution);
        let texture = create_resource(device, "noise volume", || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Noise volume"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D3,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        queue.write_texture(
            texture.as_image_copy(),
            bytemuck::cast_slice(&self.texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.resolution),
                rows_per_image: Some(self.resolution),
            },
            size,
        );
        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_volume() {
        let a = NoiseVolume::generate(8, 2, 3);
        let b = NoiseVolume::generate(8, 2, 3);
        let c = NoiseVolume::generate(8, 2, 4);
        assert_eq!(a.texels, b.texels);
        assert_ne!(a.texels, c.texels);
        assert_eq!(a.texels.len(), 8 * 8 * 8);
    }

    #[test]
    fn sample_wraps_around_the_volume() {
        let volume = NoiseVolume::generate(8, 4, 11);
        let scale = 2.0;
        let period = 8.0 / scale;
        let here = volume.sample([0.3, -0.7, 1.1], 0.0, scale, 0.0);
        let there = volume.sample([0.3 + period, -0.7 - period, 1.1], 0.0, scale, 0.0);
        assert_eq!(here, there);
    }

    #[test]
    fn samples_are_centered_drift() {
        let volume = NoiseVolume::generate(4, 2, 5);
        for z in 0..4 {
            let drift = volume.sample([0.0, 0.0, z as f32], 0.5, 1.0, 0.1);
            assert!(drift.iter().all(|d| (-1.0..=1.0).contains(d)));
        }
        assert!(volume.texels.iter().all(|t| t[3] == 255));
    }
}

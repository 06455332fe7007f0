use std::mem::{offset_of, size_of};

// This should match the struct defined in emit.wgsl, and the attribute table
// below must match the vertex inputs in draw.wgsl.
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Particle {
    pub position: [f32; 3],
    pub size: f32,
    pub velocity: [f32; 3],
    pub lifetime: f32,
    pub current_time: f32,
    pub kind: u32,
    pub _padding: [u32; 2],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ParticleKind {
    Regular = 0,
    Launcher = 1,
}

impl Particle {
    pub const STRIDE: wgpu::BufferAddress = size_of::<Particle>() as wgpu::BufferAddress;

    pub const ATTRIBUTES: [wgpu::VertexAttribute; 6] = [
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x3,
            offset: offset_of!(Particle, position) as wgpu::BufferAddress,
            shader_location: 0,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32,
            offset: offset_of!(Particle, size) as wgpu::BufferAddress,
            shader_location: 1,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x3,
            offset: offset_of!(Particle, velocity) as wgpu::BufferAddress,
            shader_location: 2,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32,
            offset: offset_of!(Particle, lifetime) as wgpu::BufferAddress,
            shader_location: 3,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32,
            offset: offset_of!(Particle, current_time) as wgpu::BufferAddress,
            shader_location: 4,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Uint32,
            offset: offset_of!(Particle, kind) as wgpu::BufferAddress,
            shader_location: 5,
        },
    ];

    // One record per instance; the quad corners come from the vertex index.
    pub fn instance_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Particle::STRIDE,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Particle::ATTRIBUTES,
        }
    }

    pub fn launcher(position: [f32; 3], velocity: [f32; 3]) -> Self {
        Particle {
            position,
            velocity,
            kind: ParticleKind::Launcher as u32,
            ..Particle::default()
        }
    }

    pub fn regular(position: [f32; 3], velocity: [f32; 3], size: f32, lifetime: f32) -> Self {
        Particle {
            position,
            size,
            velocity,
            lifetime,
            kind: ParticleKind::Regular as u32,
            ..Particle::default()
        }
    }

    pub fn kind(&self) -> ParticleKind {
        if self.kind == ParticleKind::Launcher as u32 {
            ParticleKind::Launcher
        } else {
            ParticleKind::Regular
        }
    }

    pub fn is_launcher(&self) -> bool {
        self.kind() == ParticleKind::Launcher
    }
}

// Per-buffer counter block. The first four words are a draw_indirect argument
// block; `requested` is the atomic slot allocator of the emit pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CaptureCounter {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
    pub requested: u32,
    pub overflow: u32,
    pub _padding: [u32; 2],
}

impl CaptureCounter {
    pub const SIZE: wgpu::BufferAddress = size_of::<CaptureCounter>() as wgpu::BufferAddress;
    pub const QUAD_VERTICES: u32 = 4;

    // State of a counter right before an emit pass starts capturing.
    pub fn reset() -> Self {
        CaptureCounter {
            vertex_count: CaptureCounter::QUAD_VERTICES,
            ..CaptureCounter::default()
        }
    }

    // State of a freshly seeded buffer holding `live` records.
    pub fn seeded(live: u32) -> Self {
        CaptureCounter {
            vertex_count: CaptureCounter::QUAD_VERTICES,
            instance_count: live,
            requested: live,
            ..CaptureCounter::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_layout_matches_shader() {
        assert_eq!(size_of::<Particle>(), 48);
        assert_eq!(offset_of!(Particle, position), 0);
        assert_eq!(offset_of!(Particle, size), 12);
        assert_eq!(offset_of!(Particle, velocity), 16);
        assert_eq!(offset_of!(Particle, lifetime), 28);
        assert_eq!(offset_of!(Particle, current_time), 32);
        assert_eq!(offset_of!(Particle, kind), 36);
    }

    #[test]
    fn attributes_are_in_bounds_and_unique() {
        let mut locations: Vec<u32> = Particle::ATTRIBUTES
            .iter()
            .map(|a| a.shader_location)
            .collect();
        locations.sort_unstable();
        locations.dedup();
        assert_eq!(locations.len(), Particle::ATTRIBUTES.len());
        for attribute in Particle::ATTRIBUTES.iter() {
            assert!(attribute.offset + attribute.format.size() <= Particle::STRIDE);
        }
    }

    #[test]
    fn counter_prefix_is_indirect_args() {
        assert_eq!(CaptureCounter::SIZE, 32);
        let counter = CaptureCounter::seeded(7);
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&counter));
        assert_eq!(&words[..4], &[4, 7, 0, 0]);
        assert_eq!(CaptureCounter::reset().instance_count, 0);
    }

    #[test]
    fn kinds() {
        assert!(Particle::launcher([0.0; 3], [0.0; 3]).is_launcher());
        assert!(!Particle::regular([0.0; 3], [0.0; 3], 1.0, 1.0).is_launcher());
        assert_eq!(Particle::default().kind(), ParticleKind::Regular);
    }
}

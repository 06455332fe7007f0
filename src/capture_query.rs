use log::warn;

use crate::error::{create_resource, ParticleError};
use crate::particle::{CaptureCounter, Particle};
use crate::particle_system::ParticleBuffer;

// How many records one emit pass captured. Only meaningful once the fence of
// that pass has been waited on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureCount {
    // Records actually stored in the destination.
    pub written: u32,
    // Records the pass tried to store.
    pub requested: u32,
    // Records discarded because the destination was full.
    pub overflow: u32,
}

impl From<CaptureCounter> for CaptureCount {
    fn from(counter: CaptureCounter) -> Self {
        CaptureCount {
            written: counter.instance_count,
            requested: counter.requested,
            overflow: counter.overflow,
        }
    }
}

impl CaptureCount {
    pub fn from_requested(requested: u32, capacity: u32) -> Self {
        let written = requested.min(capacity);
        CaptureCount {
            written,
            requested,
            overflow: requested - written,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflow > 0
    }

    pub fn warn_on_overflow(&self, frame_index: u64) {
        if self.overflowed() {
            warn!(
                "Frame {}: destination full, dropped {} of {} captured particles",
                frame_index, self.overflow, self.requested
            );
        }
    }
}

// Copies GPU counters and particles into mappable staging buffers. Every read
// blocks until the device is idle, so this is a diagnostic path.
pub struct CaptureQuery {
    capacity: u32,
    counter_staging: wgpu::Buffer,
    particle_staging: Option<wgpu::Buffer>,
}

// Bytes to copy for a particle readback of `count` records, or None when
// there is nothing to read.
fn particle_readback_bytes(
    enabled: bool,
    count: u32,
    capacity: u32,
) -> Option<wgpu::BufferAddress> {
    let count = count.min(capacity);
    if !enabled || count == 0 {
        return None;
    }
    Some(count as wgpu::BufferAddress * Particle::STRIDE)
}

fn decode_particles(bytes: &[u8]) -> Vec<Particle> {
    bytes
        .chunks_exact(Particle::STRIDE as usize)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

impl CaptureQuery {
    pub fn new(
        device: &wgpu::Device,
        capacity: u32,
        read_particles: bool,
    ) -> Result<Self, ParticleError> {
        let counter_staging = create_resource(device, "capture counter staging", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Capture counter staging"),
                size: CaptureCounter::SIZE,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        let particle_staging = if read_particles {
            Some(create_resource(device, "particle staging", || {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Particle staging"),
                    size: capacity as wgpu::BufferAddress * Particle::STRIDE,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })?)
        } else {
            None
        };
        Ok(CaptureQuery {
            capacity,
            counter_staging,
            particle_staging,
        })
    }

    pub fn read_count(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffer: &ParticleBuffer,
    ) -> Result<CaptureCount, ParticleError> {
        let bytes = read_back(
            device,
            queue,
            &buffer.counter,
            &self.counter_staging,
            CaptureCounter::SIZE,
        )?;
        let counter: CaptureCounter = bytemuck::pod_read_unaligned(&bytes);
        Ok(counter.into())
    }

    // Reads the first `count` records, at most the capacity. Returns nothing
    // when particle readback was not enabled at creation.
    pub fn read_particles(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffer: &ParticleBuffer,
        count: u32,
    ) -> Result<Vec<Particle>, ParticleError> {
        let enabled = self.particle_staging.is_some();
        let (staging, size) = match (
            &self.particle_staging,
            particle_readback_bytes(enabled, count, self.capacity),
        ) {
            (Some(staging), Some(size)) => (staging, size),
            _ => return Ok(Vec::new()),
        };
        let bytes = read_back(device, queue, &buffer.buffer, staging, size)?;
        Ok(decode_particles(&bytes))
    }
}

fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    staging: &wgpu::Buffer,
    size: wgpu::BufferAddress,
) -> Result<Vec<u8>, ParticleError> {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback encoder"),
    });
    encoder.copy_buffer_to_buffer(source, 0, staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..size);
    let (sender, receiver) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|_| ParticleError::Readback("map callback was dropped".to_string()))?
        .map_err(|err| ParticleError::Readback(err.to_string()))?;
    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_converts_to_count() {
        let counter = CaptureCounter {
            instance_count: 8,
            requested: 11,
            overflow: 3,
            ..CaptureCounter::reset()
        };
        let count = CaptureCount::from(counter);
        assert_eq!(
            count,
            CaptureCount {
                written: 8,
                requested: 11,
                overflow: 3
            }
        );
        assert!(count.overflowed());
    }

    #[test]
    fn requested_is_clamped_to_capacity() {
        assert_eq!(
            CaptureCount::from_requested(6, 4),
            CaptureCount {
                written: 4,
                requested: 6,
                overflow: 2
            }
        );
        let fits = CaptureCount::from_requested(3, 4);
        assert_eq!(fits.written, 3);
        assert!(!fits.overflowed());
    }

    #[test]
    fn particle_readback_skips_empty_requests() {
        assert_eq!(particle_readback_bytes(false, 5, 8), None);
        assert_eq!(particle_readback_bytes(true, 0, 8), None);
        assert_eq!(particle_readback_bytes(true, 3, 8), Some(3 * Particle::STRIDE));
        // Never copies past the staging buffer.
        assert_eq!(particle_readback_bytes(true, 20, 8), Some(8 * Particle::STRIDE));
    }

    #[test]
    fn particles_decode_from_staging_bytes() {
        let particles = [
            Particle::launcher([1.0, 2.0, 3.0], [0.0; 3]),
            Particle::regular([0.5; 3], [0.0, 1.0, 0.0], 0.2, 4.0),
        ];
        let mut bytes = bytemuck::cast_slice::<Particle, u8>(&particles).to_vec();
        // A trailing partial record is ignored.
        bytes.extend_from_slice(&[0u8; 7]);
        assert_eq!(decode_particles(&bytes), particles);
        assert!(decode_particles(&[]).is_empty());
    }
}

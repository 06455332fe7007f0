use log::info;
use wgpu::util::DeviceExt;

use crate::error::{create_resource, ParticleError};
use crate::particle::{CaptureCounter, Particle};

// What the frame loop needs to know about a buffer regardless of where the
// records live.
pub trait ParticleStore {
    // Position of this buffer inside its ParticleBufferSet.
    fn slot(&self) -> usize;
    fn capacity(&self) -> u32;
}

// Fixed-capacity particle storage on the GPU, plus the counter block the
// emit pass captures into and the draw pass reads its instance count from.
pub struct ParticleBuffer {
    slot: usize,
    capacity: u32,
    pub buffer: wgpu::Buffer,
    pub counter: wgpu::Buffer,
}

impl ParticleBuffer {
    pub fn new(
        device: &wgpu::Device,
        slot: usize,
        capacity: u32,
        initial: &[Particle],
    ) -> Result<Self, ParticleError> {
        if capacity == 0 {
            return Err(ParticleError::ResourceCreation {
                resource: "particle buffer",
                reason: "capacity must be at least one particle".to_string(),
            });
        }
        let size = capacity as wgpu::BufferAddress * Particle::STRIDE;
        let limit = device.limits().max_storage_buffer_binding_size as wgpu::BufferAddress;
        if size > limit {
            return Err(ParticleError::ResourceCreation {
                resource: "particle buffer",
                reason: format!("{} bytes exceeds the storage binding limit of {}", size, limit),
            });
        }

        let live = initial.len().min(capacity as usize);
        let mut records = vec![Particle::default(); capacity as usize];
        records[..live].copy_from_slice(&initial[..live]);
        let counter_state = CaptureCounter::seeded(live as u32);

        let label = format!("Particle buffer {}", slot);
        let (buffer, counter) = create_resource(device, "particle buffer", || {
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&label),
                contents: bytemuck::cast_slice(&records),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
            let counter = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Particle capture counter"),
                contents: bytemuck::bytes_of(&counter_state),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::INDIRECT
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
            (buffer, counter)
        })?;
        info!(
            "Particle buffer {}: capacity {}, seeded {}, {} bytes",
            slot, capacity, live, size
        );
        Ok(ParticleBuffer {
            slot,
            capacity,
            buffer,
            counter,
        })
    }
}

impl ParticleStore for ParticleBuffer {
    fn slot(&self) -> usize {
        self.slot
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

// Ping-pong pair. One buffer is the read source, the other the capture
// destination; the roles only change through `swap`.
pub struct ParticleBufferSet<B> {
    buffers: [B; 2],
    source_index: usize,
}

impl<B: ParticleStore> ParticleBufferSet<B> {
    pub fn new(first: B, second: B) -> Self {
        debug_assert!(first.slot() == 0 && second.slot() == 1);
        ParticleBufferSet {
            buffers: [first, second],
            source_index: 0,
        }
    }

    pub fn source_index(&self) -> usize {
        self.source_index
    }

    pub fn source(&self) -> &B {
        &self.buffers[self.source_index]
    }

    pub fn destination(&self) -> &B {
        &self.buffers[1 - self.source_index]
    }

    pub fn split_mut(&mut self) -> (&B, &mut B) {
        let [first, second] = &mut self.buffers;
        if self.source_index == 0 {
            (first, second)
        } else {
            (second, first)
        }
    }

    // Host-side bookkeeping only. Callers flip the roles after the emit pass
    // that wrote the destination has been fenced.
    pub fn swap(&mut self) {
        self.source_index = 1 - self.source_index;
    }

    pub fn buffers(&self) -> &[B; 2] {
        &self.buffers
    }
}

impl ParticleBufferSet<ParticleBuffer> {
    // Slot 0 is seeded with `initial`, slot 1 starts zeroed.
    pub fn create(
        device: &wgpu::Device,
        capacity: u32,
        initial: &[Particle],
    ) -> Result<Self, ParticleError> {
        Ok(ParticleBufferSet::new(
            ParticleBuffer::new(device, 0, capacity, initial)?,
            ParticleBuffer::new(device, 1, capacity, &[])?,
        ))
    }
}

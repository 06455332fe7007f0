use log::trace;

use crate::capture_query::CaptureCount;
use crate::emitter::{EmitSettings, EmitStep, EmitUniforms};
use crate::error::ParticleError;
use crate::frame_loop::ParticleBackend;
use crate::noise_volume::NoiseVolume;
use crate::particle::{CaptureCounter, Particle, ParticleKind};
use crate::particle_params::ExpiryPolicy;
use crate::particle_renderer::DrawStep;
use crate::particle_system::{ParticleBufferSet, ParticleStore};
use crate::rng::{ParticleRng, RECYCLE_LANE};
use crate::sync::{FenceNotifier, PollMode};

// Host-side twin of ParticleBuffer.
#[derive(Debug, Clone)]
pub struct CpuParticleBuffer {
    slot: usize,
    records: Vec<Particle>,
    counter: CaptureCounter,
}

impl CpuParticleBuffer {
    pub fn new(slot: usize, capacity: u32, initial: &[Particle]) -> Result<Self, ParticleError> {
        if capacity == 0 {
            return Err(ParticleError::ResourceCreation {
                resource: "particle buffer",
                reason: "capacity must be at least one particle".to_string(),
            });
        }
        let live = initial.len().min(capacity as usize);
        let mut records = vec![Particle::default(); capacity as usize];
        records[..live].copy_from_slice(&initial[..live]);
        Ok(CpuParticleBuffer {
            slot,
            records,
            counter: CaptureCounter::seeded(live as u32),
        })
    }

    // Records captured by the last pass that wrote this buffer.
    pub fn live(&self) -> &[Particle] {
        &self.records[..self.counter.instance_count as usize]
    }

    pub fn counter(&self) -> CaptureCounter {
        self.counter
    }
}

impl ParticleStore for CpuParticleBuffer {
    fn slot(&self) -> usize {
        self.slot
    }

    fn capacity(&self) -> u32 {
        self.records.len() as u32
    }
}

impl ParticleBufferSet<CpuParticleBuffer> {
    pub fn create_on_host(capacity: u32, initial: &[Particle]) -> Result<Self, ParticleError> {
        Ok(ParticleBufferSet::new(
            CpuParticleBuffer::new(0, capacity, initial)?,
            CpuParticleBuffer::new(1, capacity, &[])?,
        ))
    }
}

struct Capture<'a> {
    destination: &'a mut CpuParticleBuffer,
}

impl Capture<'_> {
    fn push(&mut self, particle: Particle) {
        let counter = &mut self.destination.counter;
        let slot = counter.requested as usize;
        counter.requested = counter.requested.saturating_add(1);
        if let Some(record) = self.destination.records.get_mut(slot) {
            *record = particle;
        }
    }
}

fn spawn(
    uniforms: &EmitUniforms,
    origin: [f32; 3],
    base_velocity: [f32; 3],
    rng: &mut ParticleRng,
) -> Particle {
    let direction = rng.unit_direction();
    let speed = rng.next_range(uniforms.speed_min, uniforms.speed_max);
    let velocity = [
        base_velocity[0] + direction[0] * speed,
        base_velocity[1] + direction[1] * speed,
        base_velocity[2] + direction[2] * speed,
    ];
    let lifetime = rng.next_range(uniforms.lifetime_min, uniforms.lifetime_max);
    let size = rng.next_range(uniforms.size_min, uniforms.size_max);
    Particle::regular(origin, velocity, size, lifetime)
}

fn launcher_fires(particle: &Particle, uniforms: &EmitUniforms) -> bool {
    particle.is_launcher() && particle.current_time + uniforms.dt >= uniforms.spawn_interval
}

// Reference implementation of the emit pass. Carried records are captured in
// a first pass and spawns in a second, both in input order, so a full
// destination only ever loses spawns.
pub fn emit(
    source: &[Particle],
    destination: &mut CpuParticleBuffer,
    uniforms: &EmitUniforms,
    noise: &NoiseVolume,
) -> CaptureCount {
    destination.counter = CaptureCounter::reset();
    let dt = uniforms.dt;
    let mut capture = Capture { destination };
    for (index, particle) in source.iter().enumerate() {
        let index = index as u32;
        let mut particle = *particle;
        match particle.kind() {
            ParticleKind::Launcher => {
                if launcher_fires(&particle, uniforms) {
                    particle.current_time = 0.0;
                } else {
                    particle.current_time += dt;
                }
                capture.push(particle);
            }
            ParticleKind::Regular => {
                let age = particle.current_time + dt;
                if age > particle.lifetime {
                    if uniforms.expiry_policy == ExpiryPolicy::Recycle.as_uniform() {
                        let mut rng = ParticleRng::stream(uniforms.seed, index, RECYCLE_LANE);
                        capture.push(spawn(uniforms, uniforms.origin, [0.0; 3], &mut rng));
                    }
                    continue;
                }
                let drift = noise.sample(
                    particle.position,
                    uniforms.time,
                    uniforms.noise_scale,
                    uniforms.noise_scroll,
                );
                for axis in 0..3 {
                    particle.velocity[axis] += drift[axis] * uniforms.noise_strength * dt;
                    particle.position[axis] += particle.velocity[axis] * dt;
                }
                particle.current_time = age;
                capture.push(particle);
            }
        }
    }

    for (index, launcher) in source.iter().enumerate() {
        if !launcher_fires(launcher, uniforms) {
            continue;
        }
        for lane in 0..uniforms.spawn_count {
            let mut rng = ParticleRng::stream(uniforms.seed, index as u32, lane);
            capture.push(spawn(uniforms, launcher.position, launcher.velocity, &mut rng));
        }
    }

    let counter = &mut capture.destination.counter;
    let count = CaptureCount::from_requested(counter.requested, uniforms.capacity);
    counter.instance_count = count.written;
    counter.overflow = count.overflow;
    count
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRecord {
    pub slot: usize,
    pub instances: u32,
    pub time: f32,
}

// Runs the whole frame on the host. Used for headless runs and tests.
pub struct CpuBackend {
    settings: EmitSettings,
    noise: NoiseVolume,
    last_draw: Option<DrawRecord>,
    presented: u64,
}

impl CpuBackend {
    pub fn new(settings: EmitSettings, noise: NoiseVolume) -> Self {
        CpuBackend {
            settings,
            noise,
            last_draw: None,
            presented: 0,
        }
    }

    pub fn last_draw(&self) -> Option<DrawRecord> {
        self.last_draw
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl ParticleBackend for CpuBackend {
    type Buffer = CpuParticleBuffer;

    fn emit(
        &mut self,
        source: &CpuParticleBuffer,
        destination: &mut CpuParticleBuffer,
        step: &EmitStep,
    ) -> Result<(), ParticleError> {
        let uniforms = EmitUniforms::new(&self.settings, step, destination.capacity());
        let count = emit(source.live(), destination, &uniforms, &self.noise);
        trace!(
            "Host emit {} -> {}: {:?}",
            source.slot(),
            destination.slot(),
            count
        );
        Ok(())
    }

    fn notify_on_completion(&mut self, notifier: FenceNotifier) {
        // Host work is finished by the time emit returns.
        notifier.notify();
    }

    fn poll(&mut self, _mode: PollMode) {}

    fn capture_count(
        &mut self,
        buffer: &CpuParticleBuffer,
    ) -> Result<Option<CaptureCount>, ParticleError> {
        Ok(Some(buffer.counter.into()))
    }

    fn draw(&mut self, source: &CpuParticleBuffer, step: &DrawStep) -> Result<(), ParticleError> {
        self.last_draw = Some(DrawRecord {
            slot: source.slot(),
            instances: source.counter.instance_count,
            time: step.time,
        });
        Ok(())
    }

    fn present(&mut self) -> Result<(), ParticleError> {
        self.presented += 1;
        Ok(())
    }
}

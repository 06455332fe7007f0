use std::borrow::Cow;
use wgpu::util::DeviceExt;

use crate::error::{create_resource, ParticleError};
use crate::particle::CaptureCounter;
use crate::particle_params::{ExpiryPolicy, ParticleParams};
use crate::particle_system::{ParticleBuffer, ParticleBufferSet, ParticleStore};

include!(concat!(env!("OUT_DIR"), "/workgroup.rs"));

// Emitter settings that stay fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitSettings {
    pub expiry_policy: ExpiryPolicy,
    pub spawn_interval: f32,
    pub spawn_count: u32,
    pub speed_min: f32,
    pub speed_max: f32,
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    pub size_min: f32,
    pub size_max: f32,
    pub noise_strength: f32,
    pub noise_scale: f32,
    pub noise_scroll: f32,
    pub noise_resolution: u32,
}

impl From<&ParticleParams> for EmitSettings {
    fn from(params: &ParticleParams) -> Self {
        let e = &params.emitter;
        EmitSettings {
            expiry_policy: params.expiry_policy,
            spawn_interval: e.spawn_interval,
            spawn_count: e.spawn_count,
            speed_min: e.speed_min,
            speed_max: e.speed_max,
            lifetime_min: e.lifetime_min,
            lifetime_max: e.lifetime_max,
            size_min: e.size_min,
            size_max: e.size_max,
            noise_strength: params.noise.strength,
            noise_scale: params.noise.scale,
            noise_scroll: params.noise.scroll,
            noise_resolution: params.noise.resolution,
        }
    }
}

// Per-frame inputs of one simulation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitStep {
    pub time: f32,
    pub dt: f32,
    pub seed: u32,
    // Where recycled particles respawn.
    pub origin: [f32; 3],
}

// This should match EmitUniforms in emit.wgsl.
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct EmitUniforms {
    pub origin: [f32; 3],
    pub dt: f32,
    pub time: f32,
    pub seed: u32,
    pub capacity: u32,
    pub expiry_policy: u32,
    pub spawn_interval: f32,
    pub spawn_count: u32,
    pub speed_min: f32,
    pub speed_max: f32,
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    pub size_min: f32,
    pub size_max: f32,
    pub noise_strength: f32,
    pub noise_scale: f32,
    pub noise_scroll: f32,
    pub noise_resolution: u32,
}

impl EmitUniforms {
    pub fn new(settings: &EmitSettings, step: &EmitStep, capacity: u32) -> Self {
        EmitUniforms {
            origin: step.origin,
            dt: step.dt,
            time: step.time,
            seed: step.seed,
            capacity,
            expiry_policy: settings.expiry_policy.as_uniform(),
            spawn_interval: settings.spawn_interval,
            spawn_count: settings.spawn_count,
            speed_min: settings.speed_min,
            speed_max: settings.speed_max,
            lifetime_min: settings.lifetime_min,
            lifetime_max: settings.lifetime_max,
            size_min: settings.size_min,
            size_max: settings.size_max,
            noise_strength: settings.noise_strength,
            noise_scale: settings.noise_scale,
            noise_scroll: settings.noise_scroll,
            noise_resolution: settings.noise_resolution,
        }
    }
}

pub fn work_groups(capacity: u32) -> u32 {
    (capacity + EMIT_WORKGROUP_SIZE - 1) / EMIT_WORKGROUP_SIZE
}

pub struct Emitter {
    compute_work_groups: u32,

    // GPU interface cruft
    uniform_buffer: wgpu::Buffer,
    // Copied over the destination counter before every emit.
    counter_reset: wgpu::Buffer,
    // Indexed by the source slot of the pass.
    bind_groups: [wgpu::BindGroup; 2],
    emit_pipeline: wgpu::ComputePipeline,
    spawn_pipeline: wgpu::ComputePipeline,
    finalize_pipeline: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(size),
        },
        count: None,
    }
}

impl Emitter {
    pub fn new(
        device: &wgpu::Device,
        buffers: &ParticleBufferSet<ParticleBuffer>,
        noise_view: &wgpu::TextureView,
    ) -> Result<Self, ParticleError> {
        let capacity = buffers.source().capacity();
        let compute_work_groups = work_groups(capacity);
        log::info!(
            "Work groups: {}, Size: {}",
            compute_work_groups,
            EMIT_WORKGROUP_SIZE
        );

        let uniforms = EmitUniforms::default();
        let uniform_buffer = create_resource(device, "emit uniforms", || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Emit Uniform Buffer"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        })?;
        let counter_reset = create_resource(device, "capture counter reset", || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Capture counter reset"),
                contents: bytemuck::bytes_of(&CaptureCounter::reset()),
                usage: wgpu::BufferUsages::COPY_SRC,
            })
        })?;

        let cs_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Emit shader module"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(crate::include_shader!("emit.wgsl"))),
        });

        let particle_bytes = buffers.source().buffer.size();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<EmitUniforms>() as _,
                        ),
                    },
                    count: None,
                },
                storage_entry(1, true, particle_bytes),
                storage_entry(2, true, CaptureCounter::SIZE),
                storage_entry(3, false, particle_bytes),
                storage_entry(4, false, CaptureCounter::SIZE),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
            label: Some("Emit bind group layout"),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Emit pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &'static str, entry_point: &'static str| {
            create_resource(device, label, || {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    module: &cs_module,
                    entry_point,
                    compilation_options: Default::default(),
                })
            })
        };
        let emit_pipeline = make_pipeline("Emit pipeline", "emit")?;
        let spawn_pipeline = make_pipeline("Emit spawn pipeline", "spawn_from_launchers")?;
        let finalize_pipeline = make_pipeline("Emit finalize pipeline", "finalize")?;

        // Bind group N reads slot N and captures into the other slot.
        let [first, second] = buffers.buffers();
        let make_bind_group = |source: &ParticleBuffer, destination: &ParticleBuffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Emit bind group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: source.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: source.counter.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: destination.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: destination.counter.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(noise_view),
                    },
                ],
            })
        };
        let bind_groups = [
            make_bind_group(first, second),
            make_bind_group(second, first),
        ];

        Ok(Emitter {
            compute_work_groups,
            uniform_buffer,
            counter_reset,
            bind_groups,
            emit_pipeline,
            spawn_pipeline,
            finalize_pipeline,
        })
    }

    // Records one tick from `source` into `destination`. The uniform upload is
    // ordered before the encoder's commands when the encoder is submitted.
    pub fn run_compute(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        source: &ParticleBuffer,
        destination: &ParticleBuffer,
        uniforms: &EmitUniforms,
    ) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
        encoder.copy_buffer_to_buffer(
            &self.counter_reset,
            0,
            &destination.counter,
            0,
            CaptureCounter::SIZE,
        );
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Particle Emitter"),
                timestamp_writes: None,
            });
            cpass.set_bind_group(0, &self.bind_groups[source.slot()], &[]);
            cpass.set_pipeline(&self.emit_pipeline);
            log::trace!("Dispatching {} work groups", self.compute_work_groups);
            cpass.dispatch_workgroups(self.compute_work_groups, 1, 1);
            // Spawns claim slots only after every carried record has one.
            cpass.set_pipeline(&self.spawn_pipeline);
            cpass.dispatch_workgroups(self.compute_work_groups, 1, 1);
            cpass.set_pipeline(&self.finalize_pipeline);
            cpass.dispatch_workgroups(1, 1, 1);
        }
    }
}

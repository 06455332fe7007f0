use std::borrow::Cow;

use cgmath::{Matrix4, Point3, Vector3};
use wgpu::util::DeviceExt;

use crate::error::{create_resource, ParticleError};
use crate::particle::Particle;
use crate::particle_params::RenderParams;
use crate::particle_system::ParticleBuffer;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub fov_degrees: f32,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Camera {
    pub fn new(params: &RenderParams, aspect: f32) -> Self {
        Camera {
            eye: params.camera_eye.into(),
            target: params.camera_target.into(),
            fov_degrees: params.fov_degrees,
            aspect,
            znear: 0.01,
            zfar: 100.0,
        }
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.eye, self.target, Vector3::unit_y())
    }

    pub fn projection_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX
            * cgmath::perspective(cgmath::Deg(self.fov_degrees), self.aspect, self.znear, self.zfar)
    }
}

// Per-frame inputs of the draw pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawStep {
    pub time: f32,
    pub tint: [f32; 4],
}

// This should match DrawUniforms in draw.wgsl.
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DrawUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub tint: [f32; 4],
    pub acceleration: [f32; 3],
    pub time: f32,
    pub spin_rate: f32,
    pub size_scale: f32,
    pub _padding: [f32; 2],
}

impl DrawUniforms {
    pub fn new(camera: &Camera, params: &RenderParams, step: &DrawStep) -> Self {
        DrawUniforms {
            view: camera.view_matrix().into(),
            projection: camera.projection_matrix().into(),
            tint: step.tint,
            acceleration: params.acceleration,
            time: step.time,
            spin_rate: params.spin_rate,
            size_scale: params.size_scale,
            _padding: [0.0; 2],
        }
    }
}

pub struct ParticleRenderer {
    camera: Camera,
    params: RenderParams,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    pipeline: wgpu::RenderPipeline,
}

impl ParticleRenderer {
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        params: &RenderParams,
        sprite: &wgpu::TextureView,
        aspect: f32,
    ) -> Result<Self, ParticleError> {
        let camera = Camera::new(params, aspect);
        let uniforms = DrawUniforms::default();
        let uniform_buffer = create_resource(device, "draw uniforms", || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Draw Uniform Buffer"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        })?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sprite sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Draw bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<DrawUniforms>() as _,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw bind group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(sprite),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Draw shader module"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(crate::include_shader!("draw.wgsl"))),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Draw pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = create_resource(device, "draw pipeline", || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Particle draw pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    compilation_options: Default::default(),
                    buffers: &[Particle::instance_layout()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })?;

        Ok(ParticleRenderer {
            camera,
            params: *params,
            uniform_buffer,
            bind_group,
            pipeline,
        })
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.camera.aspect = aspect;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    // Draws every record the last emit captured into `source`. The instance
    // count is read on the GPU from the buffer's counter block.
    pub fn render(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        source: &ParticleBuffer,
        step: &DrawStep,
    ) {
        let uniforms = DrawUniforms::new(&self.camera, &self.params, step);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        let [r, g, b, a] = self.params.clear_color;
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Particle draw"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(0, &self.bind_group, &[]);
        rpass.set_vertex_buffer(0, source.buffer.slice(..));
        rpass.draw_indirect(&source.counter, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{InnerSpace, Vector4};

    #[test]
    fn uniforms_match_shader_layout() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 176);
        assert_eq!(std::mem::offset_of!(DrawUniforms, tint), 128);
        assert_eq!(std::mem::offset_of!(DrawUniforms, acceleration), 144);
        assert_eq!(std::mem::offset_of!(DrawUniforms, time), 156);
        assert_eq!(std::mem::offset_of!(DrawUniforms, _padding), 168);
    }

    #[test]
    fn camera_centers_its_target() {
        let params = RenderParams::default();
        let camera = Camera::new(&params, 4.0 / 3.0);
        let target = Vector4::new(
            params.camera_target[0],
            params.camera_target[1],
            params.camera_target[2],
            1.0,
        );
        let clip = camera.projection_matrix() * camera.view_matrix() * target;
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
        assert!(clip.magnitude() > 0.0);
    }

    #[test]
    fn uniforms_carry_frame_state() {
        let params = RenderParams::default();
        let mut camera = Camera::new(&params, 1.0);
        let step = DrawStep {
            time: 3.5,
            tint: [0.5, 0.6, 0.7, 0.5],
        };
        let square = DrawUniforms::new(&camera, &params, &step);
        assert_eq!(square.time, 3.5);
        assert_eq!(square.tint, step.tint);
        assert_eq!(square.acceleration, params.acceleration);

        camera.aspect = 2.0;
        let wide = DrawUniforms::new(&camera, &params, &step);
        assert!(wide.projection[0][0] < square.projection[0][0]);
        assert_eq!(wide.view, square.view);
    }
}

use std::sync::Arc;

use log::{debug, info, warn};
use winit::window::Window;

use crate::capture_query::{CaptureCount, CaptureQuery};
use crate::emitter::{EmitSettings, EmitStep, EmitUniforms, Emitter};
use crate::error::ParticleError;
use crate::frame_loop::ParticleBackend;
use crate::noise_volume::NoiseVolume;
use crate::particle_params::ParticleParams;
use crate::particle_renderer::{DrawStep, ParticleRenderer};
use crate::particle_system::{ParticleBuffer, ParticleBufferSet, ParticleStore};
use crate::shader_utils;
use crate::sync::{FenceNotifier, PollMode};

// Particles logged per frame when particle readback is enabled.
const LOGGED_PARTICLES: u32 = 4;

pub struct GpuContext {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
}

fn setup_error(resource: &'static str, reason: impl ToString) -> ParticleError {
    ParticleError::ResourceCreation {
        resource,
        reason: reason.to_string(),
    }
}

impl GpuContext {
    pub async fn new(window: Arc<Window>) -> Result<Self, ParticleError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window)
            .map_err(|e| setup_error("surface", e))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| setup_error("adapter", "no compatible adapter found"))?;
        info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("particle_flow device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| setup_error("device", e))?;

        let config = surface
            .get_default_config(&adapter, size.width.max(1), size.height.max(1))
            .ok_or_else(|| setup_error("surface", "surface is not supported by the adapter"))?;
        surface.configure(&device, &config);
        Ok(GpuContext {
            surface,
            device,
            queue,
            config,
        })
    }

    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }
}

pub struct GpuBackend {
    context: GpuContext,
    settings: EmitSettings,
    emitter: Emitter,
    renderer: ParticleRenderer,
    capture_query: Option<CaptureQuery>,
    log_particles: bool,
    // Acquired by draw, handed back to the surface by present.
    frame: Option<wgpu::SurfaceTexture>,
}

impl GpuBackend {
    pub fn new(
        context: GpuContext,
        params: &ParticleParams,
        buffers: &ParticleBufferSet<ParticleBuffer>,
    ) -> Result<Self, ParticleError> {
        let device = &context.device;
        let queue = &context.queue;
        let noise = NoiseVolume::generate(params.noise.resolution, params.noise.frequency, params.seed);
        let noise_view = noise.create_texture(device, queue)?;
        let emitter = Emitter::new(device, buffers, &noise_view)?;

        let sprite = match &params.sprite_path {
            Some(path) => shader_utils::load_png_to_texture(device, queue, path)?,
            None => shader_utils::create_default_sprite(device, queue, 64)?,
        };
        let renderer = ParticleRenderer::new(
            device,
            context.config.format,
            &params.render,
            &sprite,
            context.aspect(),
        )?;

        let capture_query = if params.readback_capture_count || params.readback_particles {
            Some(CaptureQuery::new(
                device,
                params.capacity,
                params.readback_particles,
            )?)
        } else {
            None
        };

        Ok(GpuBackend {
            settings: EmitSettings::from(params),
            emitter,
            renderer,
            capture_query,
            log_particles: params.readback_particles,
            frame: None,
            context,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        info!("Resizing to {}x{}", width, height);
        self.context.config.width = width;
        self.context.config.height = height;
        self.context
            .surface
            .configure(&self.context.device, &self.context.config);
        self.renderer.set_aspect(self.context.aspect());
    }

    // None means no frame is available right now and this draw is skipped.
    fn acquire_frame(&mut self) -> Result<Option<wgpu::SurfaceTexture>, ParticleError> {
        match self.context.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                warn!("Surface lost or outdated, reconfiguring");
                self.context
                    .surface
                    .configure(&self.context.device, &self.context.config);
                match self.context.surface.get_current_texture() {
                    Ok(frame) => Ok(Some(frame)),
                    Err(wgpu::SurfaceError::Timeout) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("Timed out acquiring a surface texture, skipping draw");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl ParticleBackend for GpuBackend {
    type Buffer = ParticleBuffer;

    fn emit(
        &mut self,
        source: &ParticleBuffer,
        destination: &mut ParticleBuffer,
        step: &EmitStep,
    ) -> Result<(), ParticleError> {
        let uniforms = EmitUniforms::new(&self.settings, step, destination.capacity());
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Emit encoder"),
                });
        self.emitter.run_compute(
            &self.context.queue,
            &mut encoder,
            source,
            destination,
            &uniforms,
        );
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn notify_on_completion(&mut self, notifier: FenceNotifier) {
        self.context
            .queue
            .on_submitted_work_done(move || notifier.notify());
    }

    fn poll(&mut self, mode: PollMode) {
        let maintain = match mode {
            PollMode::Wait => wgpu::Maintain::Wait,
            PollMode::Poll => wgpu::Maintain::Poll,
        };
        self.context.device.poll(maintain);
    }

    fn capture_count(
        &mut self,
        buffer: &ParticleBuffer,
    ) -> Result<Option<CaptureCount>, ParticleError> {
        let query = match &self.capture_query {
            Some(query) => query,
            None => return Ok(None),
        };
        let device = &self.context.device;
        let queue = &self.context.queue;
        let count = query.read_count(device, queue, buffer)?;
        debug!("Captured {:?} into slot {}", count, buffer.slot());
        if self.log_particles {
            let shown = count.written.min(LOGGED_PARTICLES);
            for particle in query.read_particles(device, queue, buffer, shown)? {
                debug!("{:?}", particle);
            }
        }
        Ok(Some(count))
    }

    fn draw(&mut self, source: &ParticleBuffer, step: &DrawStep) -> Result<(), ParticleError> {
        let frame = match self.acquire_frame()? {
            Some(frame) => frame,
            None => return Ok(()),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Draw encoder"),
                });
        self.renderer
            .render(&self.context.queue, &mut encoder, &view, source, step);
        self.context.queue.submit(Some(encoder.finish()));
        self.frame = Some(frame);
        Ok(())
    }

    fn present(&mut self) -> Result<(), ParticleError> {
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
        Ok(())
    }
}

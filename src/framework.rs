use std::sync::Arc;

use log::{error, info};
use rand::SeedableRng;
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::WindowBuilder,
};

use particle_flow::error::ParticleError;
use particle_flow::fps_estimator::{FixedTick, FpsEstimator, TimeSource};
use particle_flow::frame_loop::FrameLoop;
use particle_flow::gpu_backend::{GpuBackend, GpuContext};
use particle_flow::particle_params::ParticleParams;
use particle_flow::particle_system::ParticleBufferSet;
use particle_flow::sync::SyncBarrier;

fn is_exit_request(event: &WindowEvent) -> bool {
    match event {
        WindowEvent::CloseRequested => true,
        WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    logical_key,
                    state: ElementState::Pressed,
                    ..
                },
            ..
        } => match logical_key {
            Key::Named(NamedKey::Escape) => true,
            Key::Character(c) => c.as_str() == "q",
            _ => false,
        },
        _ => false,
    }
}

// Opens a window and drives the GPU frame loop until the user closes it or a
// frame fails.
pub fn run(title: &str, params: &ParticleParams) -> anyhow::Result<()> {
    let event_loop = EventLoop::new()?;
    info!("Initializing the window...");
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(title)
            .with_inner_size(LogicalSize::new(
                params.window_width,
                params.window_height,
            ))
            .build(&event_loop)?,
    );

    let context = futures::executor::block_on(GpuContext::new(window.clone()))?;
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(params.seed);
    let initial = params.initial_particles(&mut rng);
    let buffers = ParticleBufferSet::create(&context.device, params.capacity, &initial)?;
    let backend = GpuBackend::new(context, params, &buffers)?;
    let barrier = SyncBarrier::new(params.fence_timeout(), false);
    let mut frames = FrameLoop::new(backend, buffers, barrier, rng, params);
    let mut time: Box<dyn TimeSource> = match params.fixed_tick {
        Some(dt) => Box::new(FixedTick::new(dt)),
        None => Box::new(FpsEstimator::new(params.fps, params.max_frame_time)),
    };
    let mut failure: Option<ParticleError> = None;

    info!("Entering render loop...");
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run(|event, elwt| match event {
        Event::WindowEvent { event, .. } => {
            if is_exit_request(&event) {
                elwt.exit();
                return;
            }
            match event {
                WindowEvent::Resized(size) => {
                    frames.backend_mut().resize(size.width, size.height);
                }
                WindowEvent::RedrawRequested => {
                    if let Err(err) = frames.run_frame(time.tick()) {
                        error!("Frame {} failed: {}", frames.frame_index(), err);
                        failure = Some(err);
                        elwt.exit();
                    }
                }
                _ => {}
            }
        }
        Event::AboutToWait => window.request_redraw(),
        _ => {}
    })?;

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

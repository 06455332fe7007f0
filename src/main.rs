mod framework;

use anyhow::Context;
use log::{error, info};
use rand::SeedableRng;

use particle_flow::cpu_emitter::{CpuBackend, CpuParticleBuffer};
use particle_flow::emitter::EmitSettings;
use particle_flow::fps_estimator::{FixedTick, TimeSource};
use particle_flow::frame_loop::FrameLoop;
use particle_flow::noise_volume::NoiseVolume;
use particle_flow::particle_params::{get_config_from_default_file, ParticleParams};
use particle_flow::particle_system::ParticleBufferSet;
use particle_flow::sync::SyncBarrier;

gflags::define! {
    --config: &str = "particles.toml"
}
gflags::define! {
    --log_filter: &str = "warn,particle_flow=info"
}
gflags::define! {
    /// Run this many frames on the host without a window, then exit.
    --headless_frames: u32 = 0
}
gflags::define! {
    -h, --help = false
}

fn read_config_from_file(path: &str) -> anyhow::Result<ParticleParams> {
    let serialized =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let params = serialized.parse()?;
    Ok(params)
}

fn get_config() -> ParticleParams {
    match read_config_from_file(CONFIG.flag) {
        Ok(params) => params,
        Err(e) => {
            error!("Failed to parse config file({}): {:?}", CONFIG.flag, e);
            get_config_from_default_file()
        }
    }
}

// Runs the simulation through the host backend and logs what each frame
// captured. Useful for checking a config without a GPU.
fn run_headless(params: &ParticleParams, frame_count: u32) -> anyhow::Result<()> {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(params.seed);
    let initial = params.initial_particles(&mut rng);
    let buffers = ParticleBufferSet::<CpuParticleBuffer>::create_on_host(params.capacity, &initial)?;
    let noise = NoiseVolume::generate(params.noise.resolution, params.noise.frequency, params.seed);
    let backend = CpuBackend::new(EmitSettings::from(params), noise);
    let barrier = SyncBarrier::new(params.fence_timeout(), false);
    let headless = ParticleParams {
        readback_capture_count: true,
        ..params.clone()
    };
    let mut frames = FrameLoop::new(backend, buffers, barrier, rng, &headless);
    let mut time = FixedTick::new(params.fixed_tick.unwrap_or(1.0 / params.fps as f32));
    for _ in 0..frame_count {
        let report = frames.run_frame(time.tick())?;
        if let Some(capture) = report.capture {
            info!(
                "Frame {} t={:.3}: {} particles in slot {} ({} requested)",
                report.frame_index,
                report.time,
                capture.written,
                report.drawn_from,
                capture.requested
            );
        }
    }
    info!("Headless run finished after {} frames", frame_count);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    gflags::parse();
    if HELP.flag {
        gflags::print_help_and_exit(0);
    }
    scrub_log::init_with_filter_string(LOG_FILTER.flag)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {:?}", e))?;

    let params = get_config();
    if let Err(e) = params.validate() {
        error!("{}", e);
        return Err(e.into());
    }

    if HEADLESS_FRAMES.flag > 0 {
        return run_headless(&params, HEADLESS_FRAMES.flag);
    }
    framework::run("Particle Flow", &params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_config() {
        let params = read_config_from_file("particles.toml").unwrap();
        params.validate().unwrap();
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(read_config_from_file("no_such_config.toml").is_err());
    }

    #[test]
    fn headless_run_completes() {
        let mut params = ParticleParams::default();
        params.capacity = 512;
        params.emitter.prefill = 64;
        params.noise.resolution = 8;
        run_headless(&params, 10).unwrap();
    }
}

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ParticleError;
use crate::particle::Particle;

// Launchers drift upward very slowly; spawned particles inherit this as their
// base velocity.
pub const LAUNCHER_VELOCITY: [f32; 3] = [0.0, 0.0001, 0.0];

// Half extent of the cube prefilled particles start in, around the emitter.
const PREFILL_EXTENT: f32 = 0.125;

// What happens to a regular particle whose age passes its lifetime. This
// decides whether the captured count shrinks (drop) or holds (recycle).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    Drop,
    Recycle,
}

impl ExpiryPolicy {
    // Matches POLICY_* in emit.wgsl.
    pub fn as_uniform(self) -> u32 {
        match self {
            ExpiryPolicy::Drop => 0,
            ExpiryPolicy::Recycle => 1,
        }
    }
}

// Parameters that define the simulation. These don't change at runtime.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ParticleParams {
    pub window_width: u32,
    pub window_height: u32,
    pub fps: f64,
    // Wall clock ticks longer than this are clamped.
    pub max_frame_time: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_tick: Option<f32>,

    pub seed: u64,
    pub capacity: u32,
    pub expiry_policy: ExpiryPolicy,
    // Zero waits forever.
    pub fence_timeout_ms: u64,
    pub readback_capture_count: bool,
    pub readback_particles: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprite_path: Option<String>,

    #[serde(default)]
    pub emitter: EmitterParams,

    #[serde(default)]
    pub noise: NoiseParams,

    #[serde(default)]
    pub render: RenderParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct EmitterParams {
    pub position: [f32; 3],
    pub launcher_count: u32,
    pub prefill: u32,
    pub spawn_interval: f32,
    pub spawn_count: u32,
    pub speed_min: f32,
    pub speed_max: f32,
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    pub size_min: f32,
    pub size_max: f32,
}

impl Default for EmitterParams {
    fn default() -> Self {
        EmitterParams {
            position: [0.0, 0.0, 0.0],
            launcher_count: 1,
            prefill: 1000,
            spawn_interval: 0.01,
            spawn_count: 80,
            speed_min: 0.5,
            speed_max: 1.5,
            lifetime_min: 0.5,
            lifetime_max: 2.0,
            size_min: 0.01,
            size_max: 0.03,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct NoiseParams {
    // Texels per side of the noise volume.
    pub resolution: u32,
    // Lattice cells per side; higher is busier.
    pub frequency: u32,
    pub strength: f32,
    // World units to texels.
    pub scale: f32,
    pub scroll: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        NoiseParams {
            resolution: 32,
            frequency: 4,
            strength: 0.6,
            scale: 2.0,
            scroll: 0.3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub acceleration: [f32; 3],
    pub tint: [f32; 4],
    pub clear_color: [f32; 4],
    pub spin_rate: f32,
    pub size_scale: f32,
    // Seconds between random origin/tint changes, zero disables.
    pub recenter_period: f32,
    pub camera_eye: [f32; 3],
    pub camera_target: [f32; 3],
    pub fov_degrees: f32,
}

impl Default for RenderParams {
    fn default() -> Self {
        RenderParams {
            acceleration: [0.0, -0.8, 0.0],
            tint: [1.0, 0.8, 0.5, 0.8],
            clear_color: [0.2, 0.3, 0.3, 1.0],
            spin_rate: 1.0,
            size_scale: 1.0,
            recenter_period: 0.0,
            camera_eye: [0.0, 0.5, 3.0],
            camera_target: [0.0, 0.0, 0.0],
            fov_degrees: 45.0,
        }
    }
}

impl std::str::FromStr for ParticleParams {
    type Err = toml::de::Error;
    fn from_str(serialized: &str) -> Result<Self, Self::Err> {
        let params = toml::from_str(serialized)?;
        Ok(params)
    }
}

impl Default for ParticleParams {
    fn default() -> Self {
        ParticleParams {
            window_width: 800,
            window_height: 600,
            fps: 60.0,
            max_frame_time: 0.1,
            fixed_tick: None,
            seed: 1,
            capacity: 20000,
            expiry_policy: ExpiryPolicy::Drop,
            fence_timeout_ms: 0,
            readback_capture_count: false,
            readback_particles: false,
            sprite_path: None,
            emitter: EmitterParams::default(),
            noise: NoiseParams::default(),
            render: RenderParams::default(),
        }
    }
}

fn check(condition: bool, message: &str) -> Result<(), ParticleError> {
    if condition {
        Ok(())
    } else {
        Err(ParticleError::InvalidConfig(message.to_string()))
    }
}

impl ParticleParams {
    pub fn validate(&self) -> Result<(), ParticleError> {
        let e = &self.emitter;
        check(self.capacity > 0, "capacity must be positive")?;
        check(self.fps > 0.0, "fps must be positive")?;
        check(self.max_frame_time > 0.0, "max_frame_time must be positive")?;
        check(
            self.fixed_tick.map_or(true, |tick| tick > 0.0),
            "fixed_tick must be positive",
        )?;
        check(e.spawn_interval >= 0.0, "spawn_interval must not be negative")?;
        check(e.speed_min <= e.speed_max, "speed_min exceeds speed_max")?;
        check(
            e.lifetime_min >= 0.0 && e.lifetime_min <= e.lifetime_max,
            "lifetime range is empty or negative",
        )?;
        check(e.lifetime_max > 0.0, "lifetime_max must be positive")?;
        check(
            e.size_min >= 0.0 && e.size_min <= e.size_max,
            "size range is empty or negative",
        )?;
        check(
            self.noise.resolution > 0 && self.noise.resolution <= 256,
            "noise resolution must be within 1..=256",
        )?;
        check(self.noise.frequency > 0, "noise frequency must be positive")?;
        check(self.render.recenter_period >= 0.0, "recenter_period must not be negative")?;
        check(
            e.launcher_count.checked_add(e.prefill).is_some(),
            "launcher_count + prefill overflows u32",
        )?;
        // Launchers never die or multiply, so a frame requests at most one
        // slot per carried record plus spawn_count per launcher.
        let launchers = u64::from(e.launcher_count.min(self.capacity));
        let peak_requests = u64::from(self.capacity) + launchers * u64::from(e.spawn_count);
        check(
            peak_requests <= u64::from(u32::MAX),
            "launcher_count * spawn_count overflows the capture counter",
        )?;
        Ok(())
    }

    pub fn fence_timeout(&self) -> Option<std::time::Duration> {
        match self.fence_timeout_ms {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }

    // Launchers first, then randomly aged regular particles around the
    // emitter so the first frames already show a cloud.
    pub fn initial_particles<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Particle> {
        let e = &self.emitter;
        let launchers = e.launcher_count.min(self.capacity);
        let prefill = e.prefill.min(self.capacity - launchers);
        let mut particles = Vec::with_capacity(launchers.saturating_add(prefill) as usize);
        for _ in 0..launchers {
            particles.push(Particle::launcher(e.position, LAUNCHER_VELOCITY));
        }
        for _ in 0..prefill {
            let mut position = e.position;
            for axis in position.iter_mut() {
                *axis += rng.gen_range(-PREFILL_EXTENT..=PREFILL_EXTENT);
            }
            let speed = rng.gen_range(e.speed_min..=e.speed_max);
            let direction = [
                rng.gen_range(-1.0f32..=1.0),
                rng.gen_range(-1.0f32..=1.0),
                rng.gen_range(-1.0f32..=1.0),
            ];
            let velocity = [
                direction[0] * speed,
                direction[1] * speed,
                direction[2] * speed,
            ];
            let size = rng.gen_range(e.size_min..=e.size_max);
            let lifetime = rng.gen_range(e.lifetime_min..=e.lifetime_max);
            let mut particle = Particle::regular(position, velocity, size, lifetime);
            particle.current_time = rng.gen::<f32>() * lifetime;
            particles.push(particle);
        }
        particles
    }
}

pub fn get_config_from_default_file() -> ParticleParams {
    let config_data = include_str!("../particles.toml");
    match config_data.parse() {
        Ok(params) => params,
        Err(e) => {
            log::error!(
                "Failed to parse config file({}): {:?}",
                "../particles.toml",
                e
            );
            ParticleParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn smoke() {
        let params = ParticleParams {
            capacity: 4096,
            expiry_policy: ExpiryPolicy::Recycle,
            fixed_tick: Some(1.0 / 60.0),
            ..ParticleParams::default()
        };
        let serialized = toml::to_string(&params).unwrap();
        println!("serialized = {}", serialized);
        let deserialized: ParticleParams = toml::from_str(&serialized).unwrap();
        assert_eq!(params, deserialized);
    }

    #[test]
    fn default_file_parses_and_validates() {
        let config_data = include_str!("../particles.toml");
        let params: ParticleParams = config_data.parse().unwrap();
        params.validate().unwrap();
        assert_eq!(get_config_from_default_file(), params);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let params: ParticleParams = r#"
            window_width = 320
            window_height = 240
            fps = 30.0
            max_frame_time = 0.1
            seed = 9
            capacity = 200
            expiry_policy = "drop"
            fence_timeout_ms = 250
            readback_capture_count = true
            readback_particles = false
        "#
        .parse()
        .unwrap();
        assert_eq!(params.emitter, EmitterParams::default());
        assert_eq!(params.noise, NoiseParams::default());
        assert_eq!(params.fixed_tick, None);
        assert_eq!(
            params.fence_timeout(),
            Some(std::time::Duration::from_millis(250))
        );
    }

    #[test]
    fn rejects_impossible_settings() {
        let mut params = ParticleParams::default();
        params.capacity = 0;
        assert!(params.validate().is_err());

        let mut params = ParticleParams::default();
        params.emitter.lifetime_min = 3.0;
        params.emitter.lifetime_max = 1.0;
        assert!(params.validate().is_err());

        let mut params = ParticleParams::default();
        params.noise.resolution = 0;
        assert!(params.validate().is_err());

        let mut params = ParticleParams::default();
        params.fixed_tick = Some(0.0);
        assert!(params.validate().is_err());

        let mut params = ParticleParams::default();
        params.emitter.launcher_count = u32::MAX;
        params.emitter.prefill = 1;
        assert!(params.validate().is_err());

        let mut params = ParticleParams::default();
        params.capacity = 1 << 20;
        params.emitter.launcher_count = 1 << 16;
        params.emitter.spawn_count = 1 << 16;
        assert!(params.validate().is_err());

        // The same spawn count is fine when few launchers exist.
        params.emitter.launcher_count = 1;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn huge_counts_are_capped_without_overflow() {
        let mut params = ParticleParams::default();
        params.capacity = 3;
        params.emitter.launcher_count = u32::MAX;
        params.emitter.prefill = u32::MAX;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let particles = params.initial_particles(&mut rng);
        assert_eq!(particles.len(), 3);
        assert!(particles.iter().all(|p| p.is_launcher()));
    }

    #[test]
    fn initial_particles_are_seeded_and_capped() {
        let mut params = ParticleParams::default();
        params.capacity = 10;
        params.emitter.launcher_count = 2;
        params.emitter.prefill = 50;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(5);
        let particles = params.initial_particles(&mut rng);
        assert_eq!(particles.len(), 10);
        assert!(particles[0].is_launcher());
        assert!(particles[1].is_launcher());
        for particle in &particles[2..] {
            assert!(!particle.is_launcher());
            assert!(particle.current_time <= particle.lifetime);
        }

        let mut again = rand_chacha::ChaCha8Rng::seed_from_u64(5);
        assert_eq!(params.initial_particles(&mut again), particles);
    }
}

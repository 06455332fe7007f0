pub mod capture_query;
pub mod cpu_emitter;
pub mod emitter;
pub mod error;
pub mod fps_estimator;
pub mod frame_loop;
pub mod gpu_backend;
pub mod noise_volume;
pub mod particle;
pub mod particle_params;
pub mod particle_renderer;
pub mod particle_system;
pub mod rng;
pub mod shader_utils;
pub mod sync;

use std::time::Duration;

use crate::sync::FenceState;
use crate::frame_loop::FramePhase;

#[derive(thiserror::Error, Debug)]
pub enum ParticleError {
    #[error("failed to create {resource}: {reason}")]
    ResourceCreation {
        resource: &'static str,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("fence {id} was not signaled within {waited:?}")]
    FenceTimeout { id: u64, waited: Duration },
    #[error("fence {id} was dropped by the device before it signaled")]
    FenceAbandoned { id: u64 },
    #[error("fence {id} cannot move from {from:?} to {to:?}")]
    FenceMisuse {
        id: u64,
        from: FenceState,
        to: FenceState,
    },
    #[error("frame loop halted after frame {frame} lost its fence")]
    Halted { frame: u64 },
    #[error("frame loop cannot move from {from:?} to {to:?}")]
    PhaseOrder { from: FramePhase, to: FramePhase },
    #[error("readback failed: {0}")]
    Readback(String),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

// Runs `create` inside wgpu error scopes so allocation and validation failures
// surface as a `ResourceCreation` error instead of an uncaptured device error.
pub fn create_resource<T>(
    device: &wgpu::Device,
    resource: &'static str,
    create: impl FnOnce() -> T,
) -> Result<T, ParticleError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = futures::executor::block_on(device.pop_error_scope());
    let out_of_memory = futures::executor::block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(err) => Err(ParticleError::ResourceCreation {
            resource,
            reason: err.to_string(),
        }),
        None => Ok(value),
    }
}

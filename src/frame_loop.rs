use log::{debug, error, info, warn};
use rand::{Rng, RngCore};

use crate::capture_query::CaptureCount;
use crate::emitter::EmitStep;
use crate::error::ParticleError;
use crate::particle_params::ParticleParams;
use crate::particle_renderer::DrawStep;
use crate::particle_system::{ParticleBufferSet, ParticleStore};
use crate::sync::{FenceNotifier, PollMode, SyncBarrier};

// Where a frame is in its fixed sequence of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Emitting,
    BarrierPending,
    Swapping,
    Waiting,
    Drawing,
    Presented,
}

impl FramePhase {
    pub fn next(self) -> FramePhase {
        match self {
            FramePhase::Idle => FramePhase::Emitting,
            FramePhase::Emitting => FramePhase::BarrierPending,
            FramePhase::BarrierPending => FramePhase::Swapping,
            FramePhase::Swapping => FramePhase::Waiting,
            FramePhase::Waiting => FramePhase::Drawing,
            FramePhase::Drawing => FramePhase::Presented,
            FramePhase::Presented => FramePhase::Idle,
        }
    }
}

// Executes the passes of a frame. Implemented on the GPU by GpuBackend and on
// the host by CpuBackend.
pub trait ParticleBackend {
    type Buffer: ParticleStore;

    // Records and submits one simulation tick from `source` into `destination`.
    fn emit(
        &mut self,
        source: &Self::Buffer,
        destination: &mut Self::Buffer,
        step: &EmitStep,
    ) -> Result<(), ParticleError>;

    // Arranges for `notifier` to fire once all work submitted so far is done.
    fn notify_on_completion(&mut self, notifier: FenceNotifier);

    fn poll(&mut self, mode: PollMode);

    // None when the backend was configured without capture readback.
    fn capture_count(
        &mut self,
        buffer: &Self::Buffer,
    ) -> Result<Option<CaptureCount>, ParticleError>;

    fn draw(&mut self, source: &Self::Buffer, step: &DrawStep) -> Result<(), ParticleError>;

    fn present(&mut self) -> Result<(), ParticleError>;
}

// Periodically moves the respawn origin and picks a new tint.
#[derive(Debug, Clone, Copy)]
pub struct Recentering {
    period: f32,
    elapsed: f32,
}

impl Recentering {
    pub fn new(period: f32) -> Self {
        Recentering {
            period,
            elapsed: 0.0,
        }
    }

    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        dt: f32,
        rng: &mut R,
    ) -> Option<([f32; 3], [f32; 4])> {
        if self.period <= 0.0 {
            return None;
        }
        self.elapsed += dt;
        if self.elapsed < self.period {
            return None;
        }
        self.elapsed %= self.period;
        let origin = [
            rng.gen_range(-0.5..=0.5),
            rng.gen_range(-0.5..=0.5),
            rng.gen_range(-0.5..=0.5),
        ];
        let tint = [
            rng.gen_range(0.5..=1.0),
            rng.gen_range(0.5..=1.0),
            rng.gen_range(0.5..=1.0),
            0.5,
        ];
        Some((origin, tint))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub time: f32,
    // Slot the emit pass wrote.
    pub emitted_into: usize,
    // Slot the draw pass read.
    pub drawn_from: usize,
    pub capture: Option<CaptureCount>,
}

pub struct FrameLoop<B: ParticleBackend, R: RngCore> {
    backend: B,
    buffers: ParticleBufferSet<B::Buffer>,
    barrier: SyncBarrier,
    rng: R,
    phase: FramePhase,
    frame_index: u64,
    time: f32,
    origin: [f32; 3],
    tint: [f32; 4],
    recentering: Recentering,
    query_capture: bool,
    // Set once a frame's fence fails; the buffers can no longer be trusted.
    halted_at: Option<u64>,
}

impl<B: ParticleBackend, R: RngCore> FrameLoop<B, R> {
    pub fn new(
        backend: B,
        buffers: ParticleBufferSet<B::Buffer>,
        barrier: SyncBarrier,
        rng: R,
        params: &ParticleParams,
    ) -> Self {
        FrameLoop {
            backend,
            buffers,
            barrier,
            rng,
            phase: FramePhase::Idle,
            frame_index: 0,
            time: 0.0,
            origin: params.emitter.position,
            tint: params.render.tint,
            recentering: Recentering::new(params.render.recenter_period),
            query_capture: params.readback_capture_count,
            halted_at: None,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn origin(&self) -> [f32; 3] {
        self.origin
    }

    pub fn tint(&self) -> [f32; 4] {
        self.tint
    }

    pub fn buffers(&self) -> &ParticleBufferSet<B::Buffer> {
        &self.buffers
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn barrier(&self) -> &SyncBarrier {
        &self.barrier
    }

    pub fn is_halted(&self) -> bool {
        self.halted_at.is_some()
    }

    fn enter(&mut self, next: FramePhase) -> Result<(), ParticleError> {
        if self.phase.next() != next {
            return Err(ParticleError::PhaseOrder {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    // Emit, fence, swap, wait, draw, present. On error the loop is back in
    // Idle and the next frame starts from scratch, unless the fence failed:
    // the swapped-in buffer may still be written by the device, so every later
    // frame is refused.
    pub fn run_frame(&mut self, dt: f32) -> Result<FrameReport, ParticleError> {
        if let Some(frame) = self.halted_at {
            return Err(ParticleError::Halted { frame });
        }
        let result = self.step_frame(dt);
        if result.is_err() {
            self.phase = FramePhase::Idle;
        }
        result
    }

    fn step_frame(&mut self, dt: f32) -> Result<FrameReport, ParticleError> {
        self.enter(FramePhase::Emitting)?;
        let time = self.time + dt;
        if let Some((origin, tint)) = self.recentering.advance(dt, &mut self.rng) {
            info!("Recentering emitter to {:?}", origin);
            self.origin = origin;
            self.tint = tint;
        }
        let step = EmitStep {
            time,
            dt,
            seed: self.rng.next_u32(),
            origin: self.origin,
        };
        let (source, destination) = self.buffers.split_mut();
        let emitted_into = destination.slot();
        self.backend.emit(source, destination, &step)?;
        self.time = time;

        if let Err(err) = self.fence_and_swap() {
            error!("Frame {} lost its fence: {}", self.frame_index, err);
            self.halted_at = Some(self.frame_index);
            return Err(err);
        }

        let capture = if self.query_capture {
            match self.backend.capture_count(self.buffers.source()) {
                Ok(capture) => capture,
                Err(err) => {
                    warn!("Frame {}: {}", self.frame_index, err);
                    None
                }
            }
        } else {
            None
        };
        if let Some(capture) = capture {
            capture.warn_on_overflow(self.frame_index);
        }

        self.enter(FramePhase::Drawing)?;
        let drawn_from = self.buffers.source().slot();
        let draw_step = DrawStep {
            time: self.time,
            tint: self.tint,
        };
        self.backend.draw(self.buffers.source(), &draw_step)?;

        self.enter(FramePhase::Presented)?;
        self.backend.present()?;
        self.enter(FramePhase::Idle)?;

        let report = FrameReport {
            frame_index: self.frame_index,
            time: self.time,
            emitted_into,
            drawn_from,
            capture,
        };
        debug!("{:?}", report);
        self.frame_index += 1;
        Ok(report)
    }

    // Fences the submitted emit, makes its destination the new source and
    // blocks until the device is done writing it.
    fn fence_and_swap(&mut self) -> Result<(), ParticleError> {
        self.enter(FramePhase::BarrierPending)?;
        let backend = &mut self.backend;
        let mut fence = self
            .barrier
            .signal(|notifier| backend.notify_on_completion(notifier))?;

        self.enter(FramePhase::Swapping)?;
        self.buffers.swap();

        self.enter(FramePhase::Waiting)?;
        let backend = &mut self.backend;
        self.barrier.wait(&mut fence, |mode| backend.poll(mode))?;
        self.barrier.release(fence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_emitter::{CpuBackend, CpuParticleBuffer};
    use crate::emitter::EmitSettings;
    use crate::noise_volume::NoiseVolume;
    use crate::sync::FenceState;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params() -> ParticleParams {
        let mut params = ParticleParams::default();
        params.capacity = 256;
        params.emitter.prefill = 32;
        params.emitter.spawn_count = 4;
        params.noise.resolution = 4;
        params.readback_capture_count = true;
        params
    }

    fn cpu_loop(params: &ParticleParams, seed: u64) -> FrameLoop<CpuBackend, ChaCha8Rng> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let initial = params.initial_particles(&mut rng);
        let buffers =
            ParticleBufferSet::<CpuParticleBuffer>::create_on_host(params.capacity, &initial)
                .unwrap();
        let noise = NoiseVolume::generate(params.noise.resolution, params.noise.frequency, seed);
        let backend = CpuBackend::new(EmitSettings::from(params), noise);
        FrameLoop::new(backend, buffers, SyncBarrier::new(None, true), rng, params)
    }

    #[test]
    fn draw_reads_the_last_emit_destination() {
        let params = params();
        let mut frames = cpu_loop(&params, 3);
        for expected in 0..6u64 {
            let report = frames.run_frame(1.0 / 60.0).unwrap();
            assert_eq!(report.frame_index, expected);
            assert_eq!(report.drawn_from, report.emitted_into);
            assert_eq!(frames.buffers().source().slot(), report.emitted_into);

            let draw = frames.backend().last_draw().unwrap();
            let drawn = frames.buffers().source();
            assert_eq!(draw.slot, drawn.slot());
            assert_eq!(draw.instances, drawn.counter().instance_count);
            assert_eq!(report.capture.map(|c| c.written), Some(draw.instances));
            assert_eq!(frames.phase(), FramePhase::Idle);
        }
        assert_eq!(frames.backend().presented(), 6);
    }

    #[test]
    fn buffers_alternate_every_frame() {
        let params = params();
        let mut frames = cpu_loop(&params, 3);
        let first = frames.run_frame(0.01).unwrap();
        let second = frames.run_frame(0.01).unwrap();
        let third = frames.run_frame(0.01).unwrap();
        assert_eq!(first.emitted_into, 1);
        assert_eq!(second.emitted_into, 0);
        assert_eq!(third.emitted_into, 1);
    }

    #[test]
    fn every_frame_walks_each_fence_once() {
        let params = params();
        let mut frames = cpu_loop(&params, 3);
        for _ in 0..3 {
            frames.run_frame(0.01).unwrap();
        }
        let journal = frames.barrier().journal();
        assert_eq!(journal.len(), 12);
        for (id, events) in journal.chunks(4).enumerate() {
            assert!(events.iter().all(|e| e.id == id as u64));
            let states: Vec<FenceState> = events.iter().map(|e| e.state).collect();
            assert_eq!(
                states,
                vec![
                    FenceState::Unsignaled,
                    FenceState::Signaled,
                    FenceState::Waited,
                    FenceState::Released
                ]
            );
        }
    }

    #[test]
    fn same_seed_same_simulation() {
        let params = params();
        let mut a = cpu_loop(&params, 9);
        let mut b = cpu_loop(&params, 9);
        for _ in 0..10 {
            assert_eq!(a.run_frame(0.02).unwrap(), b.run_frame(0.02).unwrap());
        }
        assert_eq!(a.buffers().source().live(), b.buffers().source().live());
    }

    #[test]
    fn live_count_never_exceeds_capacity() {
        let mut params = params();
        params.capacity = 40;
        params.emitter.spawn_count = 25;
        let mut frames = cpu_loop(&params, 1);
        for _ in 0..5 {
            let report = frames.run_frame(0.02).unwrap();
            let capture = report.capture.unwrap();
            assert!(capture.written <= 40);
            assert_eq!(frames.buffers().source().live().len(), capture.written as usize);
        }
    }

    #[test]
    fn recentering_moves_origin_and_tint() {
        let mut params = params();
        params.render.recenter_period = 0.1;
        let mut frames = cpu_loop(&params, 4);
        let start = frames.origin();
        frames.run_frame(0.05).unwrap();
        assert_eq!(frames.origin(), start);
        frames.run_frame(0.06).unwrap();
        assert_ne!(frames.origin(), start);
        assert!(frames.origin().iter().all(|c| (-0.5..=0.5).contains(c)));
        let tint = frames.tint();
        assert!(tint[..3].iter().all(|c| (0.5..=1.0).contains(c)));
        assert_eq!(tint[3], 0.5);
    }

    #[test]
    fn phases_cycle_back_to_idle() {
        let mut phase = FramePhase::Idle;
        for _ in 0..7 {
            phase = phase.next();
        }
        assert_eq!(phase, FramePhase::Idle);
    }

    #[test]
    fn out_of_order_phase_is_rejected() {
        let params = params();
        let mut frames = cpu_loop(&params, 3);
        assert!(matches!(
            frames.enter(FramePhase::Drawing),
            Err(ParticleError::PhaseOrder {
                from: FramePhase::Idle,
                to: FramePhase::Drawing
            })
        ));
        frames.enter(FramePhase::Emitting).unwrap();
        assert!(frames.enter(FramePhase::Swapping).is_err());
    }

    // Defers fence completion until the loop polls, and records the order in
    // which the loop drives it.
    struct RecordingBackend {
        inner: CpuBackend,
        pending: Option<FenceNotifier>,
        calls: Vec<String>,
        fail_draw: bool,
        // Never completes a fence, like a hung device.
        hold_fences: bool,
    }

    impl ParticleBackend for RecordingBackend {
        type Buffer = CpuParticleBuffer;

        fn emit(
            &mut self,
            source: &CpuParticleBuffer,
            destination: &mut CpuParticleBuffer,
            step: &EmitStep,
        ) -> Result<(), ParticleError> {
            self.calls
                .push(format!("emit {}->{}", source.slot(), destination.slot()));
            self.inner.emit(source, destination, step)
        }

        fn notify_on_completion(&mut self, notifier: FenceNotifier) {
            self.calls.push("fence".to_string());
            self.pending = Some(notifier);
        }

        fn poll(&mut self, _mode: PollMode) {
            self.calls.push("poll".to_string());
            if self.hold_fences {
                return;
            }
            if let Some(notifier) = self.pending.take() {
                notifier.notify();
            }
        }

        fn capture_count(
            &mut self,
            buffer: &CpuParticleBuffer,
        ) -> Result<Option<CaptureCount>, ParticleError> {
            self.calls.push(format!("capture {}", buffer.slot()));
            self.inner.capture_count(buffer)
        }

        fn draw(
            &mut self,
            source: &CpuParticleBuffer,
            step: &DrawStep,
        ) -> Result<(), ParticleError> {
            self.calls.push(format!("draw {}", source.slot()));
            if self.fail_draw {
                return Err(ParticleError::Readback("draw failed".to_string()));
            }
            self.inner.draw(source, step)
        }

        fn present(&mut self) -> Result<(), ParticleError> {
            self.calls.push("present".to_string());
            self.inner.present()
        }
    }

    fn recording_loop(fail_draw: bool) -> FrameLoop<RecordingBackend, ChaCha8Rng> {
        recording_loop_with(fail_draw, false, SyncBarrier::new(None, true))
    }

    fn recording_loop_with(
        fail_draw: bool,
        hold_fences: bool,
        barrier: SyncBarrier,
    ) -> FrameLoop<RecordingBackend, ChaCha8Rng> {
        let params = params();
        let inner = cpu_loop(&params, 5);
        let FrameLoop {
            backend, buffers, rng, ..
        } = inner;
        let backend = RecordingBackend {
            inner: backend,
            pending: None,
            calls: Vec::new(),
            fail_draw,
            hold_fences,
        };
        FrameLoop::new(backend, buffers, barrier, rng, &params)
    }

    #[test]
    fn backend_calls_follow_frame_order() {
        let mut frames = recording_loop(false);
        frames.run_frame(0.01).unwrap();
        frames.run_frame(0.01).unwrap();
        assert_eq!(
            frames.backend().calls,
            vec![
                "emit 0->1", "fence", "poll", "capture 1", "draw 1", "present", "emit 1->0",
                "fence", "poll", "capture 0", "draw 0", "present",
            ]
        );
    }

    #[test]
    fn draw_failure_keeps_the_fenced_swap() {
        let mut frames = recording_loop(true);
        assert!(frames.run_frame(0.01).is_err());
        assert_eq!(frames.phase(), FramePhase::Idle);
        assert!(!frames.is_halted());
        // The emit was fenced before the draw failed, so its output stays the
        // source and the retry emits back into slot 0.
        assert_eq!(frames.buffers().source().slot(), 1);
        assert!((frames.time() - 0.01).abs() < 1e-6);
        frames.backend_mut().fail_draw = false;
        let report = frames.run_frame(0.01).unwrap();
        assert_eq!(report.emitted_into, 0);
        assert_eq!(report.drawn_from, 0);
        assert_eq!(report.frame_index, 0);
    }

    #[test]
    fn fence_timeout_halts_the_loop() {
        let barrier = SyncBarrier::new(Some(std::time::Duration::from_millis(5)), true);
        let mut frames = recording_loop_with(false, true, barrier);
        assert!(matches!(
            frames.run_frame(0.01),
            Err(ParticleError::FenceTimeout { id: 0, .. })
        ));
        assert_eq!(frames.phase(), FramePhase::Idle);
        assert!(frames.is_halted());
        let calls = frames.backend().calls.clone();
        assert_eq!(calls[..2], ["emit 0->1", "fence"]);
        assert!(!calls.iter().any(|call| call.starts_with("draw")));

        // The unfenced buffer is never emitted from or drawn.
        assert!(matches!(
            frames.run_frame(0.01),
            Err(ParticleError::Halted { frame: 0 })
        ));
        assert_eq!(frames.backend().calls, calls);
        assert_eq!(frames.frame_index(), 0);
    }
}

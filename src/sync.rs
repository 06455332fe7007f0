use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, trace};

use crate::error::ParticleError;

// Lifecycle of one fence. Every fence walks these states in order, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Unsignaled,
    Signaled,
    Waited,
    Released,
}

impl FenceState {
    fn can_become(self, next: FenceState) -> bool {
        matches!(
            (self, next),
            (FenceState::Unsignaled, FenceState::Signaled)
                | (FenceState::Signaled, FenceState::Waited)
                | (FenceState::Waited, FenceState::Released)
        )
    }
}

// How hard a backend should drive its device while a fence is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    // Block until the queue is idle.
    Wait,
    // Process finished work and return immediately.
    Poll,
}

// Handed to the backend when a fence is signaled. The backend calls `notify`
// once every command submitted before the fence has completed.
#[derive(Debug)]
pub struct FenceNotifier {
    id: u64,
    sender: Sender<()>,
}

impl FenceNotifier {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn notify(self) {
        // The fence may already be gone if its frame failed.
        if self.sender.send(()).is_err() {
            trace!("Fence {} dropped before its work completed", self.id);
        }
    }
}

#[derive(Debug)]
pub struct Fence {
    id: u64,
    state: FenceState,
    completed: Receiver<()>,
}

impl Fence {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> FenceState {
        self.state
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if self.state != FenceState::Released {
            debug!("Fence {} dropped in state {:?}", self.id, self.state);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceEvent {
    pub id: u64,
    pub state: FenceState,
}

pub struct SyncBarrier {
    next_id: u64,
    timeout: Option<Duration>,
    journal: Option<Vec<FenceEvent>>,
}

impl SyncBarrier {
    // `timeout` of None waits forever. An instrumented barrier records every
    // fence transition in its journal.
    pub fn new(timeout: Option<Duration>, instrumented: bool) -> Self {
        SyncBarrier {
            next_id: 0,
            timeout,
            journal: if instrumented { Some(Vec::new()) } else { None },
        }
    }

    pub fn journal(&self) -> &[FenceEvent] {
        self.journal.as_deref().unwrap_or(&[])
    }

    pub fn take_journal(&mut self) -> Vec<FenceEvent> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn record(&mut self, id: u64, state: FenceState) {
        trace!("Fence {} -> {:?}", id, state);
        if let Some(journal) = self.journal.as_mut() {
            journal.push(FenceEvent { id, state });
        }
    }

    fn advance(&mut self, fence: &mut Fence, next: FenceState) -> Result<(), ParticleError> {
        if !fence.state.can_become(next) {
            return Err(ParticleError::FenceMisuse {
                id: fence.id,
                from: fence.state,
                to: next,
            });
        }
        fence.state = next;
        self.record(fence.id, next);
        Ok(())
    }

    // Inserts a fence after all work submitted so far. `register` must arrange
    // for the notifier to fire once that work completes.
    pub fn signal(
        &mut self,
        register: impl FnOnce(FenceNotifier),
    ) -> Result<Fence, ParticleError> {
        let id = self.next_id;
        self.next_id += 1;
        let (sender, completed) = crossbeam_channel::bounded(1);
        let mut fence = Fence {
            id,
            state: FenceState::Unsignaled,
            completed,
        };
        self.record(id, FenceState::Unsignaled);
        register(FenceNotifier { id, sender });
        self.advance(&mut fence, FenceState::Signaled)?;
        Ok(fence)
    }

    // Blocks until the fence's work has completed, driving the device through
    // `poll` in the meantime.
    pub fn wait(
        &mut self,
        fence: &mut Fence,
        mut poll: impl FnMut(PollMode),
    ) -> Result<(), ParticleError> {
        if !fence.state.can_become(FenceState::Waited) {
            return Err(ParticleError::FenceMisuse {
                id: fence.id,
                from: fence.state,
                to: FenceState::Waited,
            });
        }
        let start = Instant::now();
        loop {
            match fence.completed.try_recv() {
                Ok(()) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(ParticleError::FenceAbandoned { id: fence.id })
                }
                Err(TryRecvError::Empty) => {}
            }
            match self.timeout {
                None => poll(PollMode::Wait),
                Some(timeout) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(ParticleError::FenceTimeout {
                            id: fence.id,
                            waited,
                        });
                    }
                    poll(PollMode::Poll);
                    std::thread::yield_now();
                }
            }
        }
        self.advance(fence, FenceState::Waited)
    }

    pub fn release(&mut self, mut fence: Fence) -> Result<(), ParticleError> {
        self.advance(&mut fence, FenceState::Released)
    }
}

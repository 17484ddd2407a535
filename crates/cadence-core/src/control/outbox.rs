//! Command outbox with overflow coalescing
//!
//! Mixer commands normally go straight into the lock-free ring. If the ring
//! is full (a stalled callback, or a burst of fader moves), commands queue
//! here and are flushed by the telemetry pump. While queued, `SetStemGain`
//! keeps only the newest value per stem, so a fader storm can never push out
//! a transport command.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::engine::EngineCommand;

struct OutboxState {
    producer: rtrb::Producer<EngineCommand>,
    pending: VecDeque<EngineCommand>,
}

pub struct CommandOutbox {
    state: Mutex<OutboxState>,
}

impl CommandOutbox {
    pub fn new(producer: rtrb::Producer<EngineCommand>) -> Self {
        Self {
            state: Mutex::new(OutboxState {
                producer,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Send a command, preserving submission order across overflow
    pub fn send(&self, command: EngineCommand) {
        let mut state = self.lock();
        Self::flush_locked(&mut state);

        if state.pending.is_empty() {
            match state.producer.push(command) {
                Ok(()) => return,
                Err(rtrb::PushError::Full(command)) => Self::enqueue(&mut state, command),
            }
        } else {
            Self::enqueue(&mut state, command);
        }
    }

    /// Push as much of the pending queue as the ring accepts
    pub fn flush(&self) {
        let mut state = self.lock();
        Self::flush_locked(&mut state);
    }

    /// Number of commands waiting behind a full ring
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn enqueue(state: &mut OutboxState, command: EngineCommand) {
        if let EngineCommand::SetStemGain { stem, .. } = &command {
            let stem = *stem;
            state.pending.retain(
                |queued| !matches!(queued, EngineCommand::SetStemGain { stem: s, .. } if *s == stem),
            );
        }
        state.pending.push_back(command);
    }

    fn flush_locked(state: &mut OutboxState) {
        while let Some(command) = state.pending.pop_front() {
            if let Err(rtrb::PushError::Full(command)) = state.producer.push(command) {
                state.pending.push_front(command);
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutboxState> {
        self.state.lock().expect("command outbox poisoned")
    }
}

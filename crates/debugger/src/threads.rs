use std::collections::HashMap;

use crate::types::{ExecutionState, Frame, Thread, ThreadId};

/// Every thread the session knows about, in the order they were first seen.
///
/// Threads live in a slot arena indexed by id. Removal leaves a hole that is
/// reclaimed once holes outnumber live threads, so iteration stays in
/// insertion order without shifting on every exit.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    slots: Vec<Option<Thread>>,
    index: HashMap<ThreadId, usize>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the thread with this id, creating it in the Unknown state if
    /// it is not known yet. Returns true if it was created.
    pub fn upsert(&mut self, id: &ThreadId) -> bool {
        if self.index.contains_key(id) {
            return false;
        }
        tracing::debug!(thread = %id, "new thread");
        self.index.insert(id.clone(), self.slots.len());
        self.slots.push(Some(Thread::new(id.clone())));
        true
    }

    /// Discard a thread. Returns the removed thread, if it was known.
    pub fn remove(&mut self, id: &ThreadId) -> Option<Thread> {
        let slot = self.index.remove(id)?;
        let thread = self.slots.get_mut(slot).and_then(Option::take);
        tracing::debug!(thread = %id, "thread removed");

        if self.slots.len() - self.index.len() > self.index.len() {
            self.compact();
        }
        thread
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (slot, thread) in self.slots.iter().enumerate() {
            if let Some(thread) = thread {
                self.index.insert(thread.id.clone(), slot);
            }
        }
    }

    pub fn get(&self, id: &ThreadId) -> Option<&Thread> {
        let slot = *self.index.get(id)?;
        self.slots.get(slot)?.as_ref()
    }

    fn get_mut(&mut self, id: &ThreadId) -> Option<&mut Thread> {
        let slot = *self.index.get(id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the thread's new epoch, or `None` if the thread is unknown.
    pub fn mark_stopped(&mut self, id: &ThreadId) -> Option<u64> {
        self.transition(id, ExecutionState::Stopped)
    }

    /// Clears the cached stack. Returns the new epoch, or `None` if the
    /// thread is unknown.
    pub fn mark_running(&mut self, id: &ThreadId) -> Option<u64> {
        self.transition(id, ExecutionState::Running)
    }

    fn transition(&mut self, id: &ThreadId, state: ExecutionState) -> Option<u64> {
        let Some(thread) = self.get_mut(id) else {
            tracing::debug!(thread = %id, %state, "ignoring state change for unknown thread");
            return None;
        };
        if thread.state != state {
            tracing::debug!(thread = %id, from = %thread.state, to = %state, "thread state");
        }
        thread.state = state;
        thread.epoch += 1;
        if state != ExecutionState::Stopped {
            thread.stack.clear();
        }
        Some(thread.epoch)
    }

    /// Only resolves a thread whose state has not been reported by an event.
    pub(crate) fn resolve_unknown_state(&mut self, id: &ThreadId, state: ExecutionState) {
        if let Some(thread) = self.get_mut(id) {
            if thread.state == ExecutionState::Unknown && state != ExecutionState::Unknown {
                thread.state = state;
                thread.epoch += 1;
            }
        }
    }

    pub(crate) fn set_name(&mut self, id: &ThreadId, name: String) {
        if let Some(thread) = self.get_mut(id) {
            thread.name = name;
        }
    }

    /// Store a freshly fetched stack. Ignored unless the thread is stopped,
    /// since a running thread has no meaningful stack.
    pub fn set_stack(&mut self, id: &ThreadId, frames: Vec<Frame>) -> bool {
        match self.get_mut(id) {
            Some(thread) if thread.is_stopped() => {
                thread.stack = frames;
                true
            }
            Some(_) => {
                tracing::debug!(thread = %id, "dropping stack for thread that is not stopped");
                false
            }
            None => false,
        }
    }

    /// Like [`set_stack`](Self::set_stack), but only if the thread has not
    /// changed state since the fetch was started.
    pub(crate) fn set_stack_if_current(
        &mut self,
        id: &ThreadId,
        epoch: u64,
        frames: Vec<Frame>,
    ) -> bool {
        match self.get(id) {
            Some(thread) if thread.epoch == epoch => self.set_stack(id, frames),
            _ => {
                tracing::debug!(thread = %id, epoch, "discarding stale stack");
                false
            }
        }
    }

    /// Thread ids in insertion order. Each call starts a fresh pass.
    pub fn list(&self) -> impl Iterator<Item = &ThreadId> + '_ {
        self.iter().map(|thread| &thread.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

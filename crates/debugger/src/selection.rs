use std::collections::HashMap;

use crate::types::ThreadId;

/// The globally selected thread and each thread's remembered frame.
#[derive(Debug, Default)]
pub struct SelectionController {
    selected: Option<ThreadId>,
    frames: HashMap<ThreadId, usize>,
    reset_frame_on_deselect: bool,
}

impl SelectionController {
    /// With `reset_frame_on_deselect`, selecting a thread sends every other
    /// thread back to its top frame. The newly selected thread always keeps
    /// its own remembered frame.
    pub fn new(reset_frame_on_deselect: bool) -> Self {
        Self {
            selected: None,
            frames: HashMap::new(),
            reset_frame_on_deselect,
        }
    }

    pub fn selected(&self) -> Option<&ThreadId> {
        self.selected.as_ref()
    }

    pub fn is_selected(&self, id: &ThreadId) -> bool {
        self.selected.as_ref() == Some(id)
    }

    /// Returns true if the selection changed.
    pub fn select_thread(&mut self, id: &ThreadId) -> bool {
        if self.is_selected(id) {
            return false;
        }
        tracing::debug!(thread = %id, previous = ?self.selected, "selecting thread");
        if self.reset_frame_on_deselect {
            self.frames.retain(|thread, _| thread == id);
        }
        self.selected = Some(id.clone());
        true
    }

    pub fn select_frame(&mut self, thread: &ThreadId, level: usize) {
        tracing::debug!(%thread, level, "selecting frame");
        self.frames.insert(thread.clone(), level);
    }

    /// The remembered frame for a thread, 0 if it was never chosen.
    pub fn selected_frame(&self, thread: &ThreadId) -> usize {
        self.frames.get(thread).copied().unwrap_or(0)
    }

    /// The selected thread and its frame.
    pub fn current(&self) -> Option<(&ThreadId, usize)> {
        let thread = self.selected.as_ref()?;
        Some((thread, self.selected_frame(thread)))
    }

    pub fn deselect_all(&mut self) {
        if let Some(previous) = self.selected.take() {
            tracing::debug!(thread = %previous, "deselecting");
        }
    }

    /// Drop everything remembered about a thread that has gone away.
    /// Returns true if it was the selected thread.
    pub fn forget(&mut self, id: &ThreadId) -> bool {
        self.frames.remove(id);
        if self.is_selected(id) {
            self.deselect_all();
            true
        } else {
            false
        }
    }
}

//! The thread and selection state machine.
//!
//! [`SessionModel`] applies indications and fetched results synchronously
//! and returns the [`Effect`]s they call for. It performs no I/O; the
//! reconciler runs the effects.

use crate::{
    config::ExecutionMode,
    error::{Result, SessionError},
    events::{Indication, Scope, StopRecord},
    gate,
    selection::SelectionController,
    threads::ThreadRegistry,
    types::{ExecutionState, Frame, ThreadDetails, ThreadId, ThreadIds},
};

/// Work a state change calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Drop the variable view; the selected frame no longer shows it.
    ClearVariables,
    FetchThreadInfo(ThreadId),
    /// Fetch a stack, valid only while the thread is still at `epoch`.
    FetchStack { thread: ThreadId, epoch: u64 },
    /// Discover every thread. With `mark_stopped`, newly found threads are
    /// taken to be stopped, unless a stop or resume was applied after
    /// `transitions` was read.
    FetchThreadIds { mark_stopped: bool, transitions: u64 },
    FetchFrameVariables { thread: ThreadId, level: usize },
}

#[derive(Debug)]
pub(crate) struct SessionModel {
    mode: ExecutionMode,
    threads: ThreadRegistry,
    selection: SelectionController,
    /// Count of stop and resume indications applied.
    transitions: u64,
}

impl SessionModel {
    pub(crate) fn new(mode: ExecutionMode, reset_frame_on_deselect: bool) -> Self {
        Self {
            mode,
            threads: ThreadRegistry::new(),
            selection: SelectionController::new(reset_frame_on_deselect),
            transitions: 0,
        }
    }

    pub(crate) fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub(crate) fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    pub(crate) fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub(crate) fn execution_enabled(&self) -> bool {
        gate::execution_enabled(&self.selection, &self.threads)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(mode = ?self.mode))]
    pub(crate) fn apply(&mut self, indication: &Indication) -> Vec<Effect> {
        let mut effects = Vec::new();
        match indication {
            Indication::ThreadCreated { id } => {
                if self.threads.upsert(id) {
                    effects.push(Effect::FetchThreadInfo(id.clone()));
                }
            }
            Indication::ThreadExited { id } => {
                self.threads.remove(id);
                if self.selection.forget(id) {
                    effects.push(Effect::ClearVariables);
                }
            }
            Indication::ThreadSelected { id } => {
                if self.threads.contains(id) {
                    self.select(id, &mut effects);
                } else {
                    tracing::warn!(thread = %id, "backend selected an unknown thread");
                }
            }
            Indication::Stopped(stop) => self.stopped(stop, &mut effects),
            Indication::Running {
                thread_id: Some(id),
                scope: Scope::One,
            } => {
                self.transitions += 1;
                if self.threads.mark_running(id).is_some() && self.selection.is_selected(id) {
                    effects.push(Effect::ClearVariables);
                }
            }
            Indication::Running { .. } => {
                self.transitions += 1;
                let ids: Vec<ThreadId> = self.threads.list().cloned().collect();
                for id in &ids {
                    self.threads.mark_running(id);
                }
                effects.push(Effect::ClearVariables);
            }
            Indication::Other { name } => {
                tracing::trace!(%name, "ignoring indication");
            }
        }
        self.ensure_selection(&mut effects);
        effects
    }

    fn stopped(&mut self, stop: &StopRecord, effects: &mut Vec<Effect>) {
        if stop.is_exit() {
            tracing::debug!(reason = ?stop.reason, "process is exiting");
            return;
        }

        let scope = match (stop.scope, &stop.thread_id, self.mode) {
            (Scope::One, None, ExecutionMode::AllStop) => Scope::All,
            (Scope::One, None, ExecutionMode::NonStop) => {
                tracing::warn!("stop without a thread in non-stop mode");
                return;
            }
            (scope, _, _) => scope,
        };
        self.transitions += 1;

        match scope {
            Scope::One => {
                let Some(id) = &stop.thread_id else { return };
                if self.threads.mark_stopped(id).is_none() {
                    tracing::warn!(thread = %id, "stop for an unknown thread, rediscovering");
                    effects.push(Effect::FetchThreadIds {
                        mark_stopped: false,
                        transitions: self.transitions,
                    });
                    return;
                }
                if self.selection.selected().is_none() {
                    self.select(id, effects);
                } else if self.selection.is_selected(id) {
                    self.refresh_selected(effects);
                }
            }
            Scope::All => {
                let ids: Vec<ThreadId> = self.threads.list().cloned().collect();
                for id in &ids {
                    self.threads.mark_stopped(id);
                }
                effects.push(Effect::FetchThreadIds {
                    mark_stopped: true,
                    transitions: self.transitions,
                });

                match &stop.thread_id {
                    Some(id) if self.threads.contains(id) => {
                        if !self.select(id, effects) {
                            self.refresh_selected(effects);
                        }
                    }
                    _ => self.refresh_selected(effects),
                }
            }
        }
    }

    /// Select a thread. Returns true if the selection changed.
    fn select(&mut self, id: &ThreadId, effects: &mut Vec<Effect>) -> bool {
        if !self.selection.select_thread(id) {
            return false;
        }
        self.refresh_selected(effects);
        true
    }

    /// The selected thread's view is out of date: drop it and, if the thread
    /// is stopped, fetch its stack again.
    fn refresh_selected(&mut self, effects: &mut Vec<Effect>) {
        let Some(id) = self.selection.selected() else {
            return;
        };
        effects.push(Effect::ClearVariables);
        if let Some(thread) = self.threads.get(id).filter(|t| t.is_stopped()) {
            effects.push(Effect::FetchStack {
                thread: thread.id.clone(),
                epoch: thread.epoch,
            });
        }
    }

    /// Nothing may stay unselected while some thread is stopped.
    fn ensure_selection(&mut self, effects: &mut Vec<Effect>) {
        if self.selection.selected().is_some() {
            return;
        }
        let first_stopped = self.threads.iter().find(|t| t.is_stopped()).map(|t| t.id.clone());
        if let Some(id) = first_stopped {
            tracing::debug!(thread = %id, "selecting first stopped thread");
            self.select(&id, effects);
        }
    }

    /// A user selection, confirmed by the backend.
    pub(crate) fn select_thread(&mut self, id: &ThreadId) -> Result<Vec<Effect>> {
        if !self.threads.contains(id) {
            return Err(SessionError::UnknownThread(id.clone()));
        }
        let mut effects = Vec::new();
        self.select(id, &mut effects);
        Ok(effects)
    }

    pub(crate) fn select_frame(&mut self, id: &ThreadId, level: usize) -> Result<Vec<Effect>> {
        if !self.threads.contains(id) {
            return Err(SessionError::UnknownThread(id.clone()));
        }
        let previous = self.selection.selected_frame(id);
        self.selection.select_frame(id, level);

        let mut effects = Vec::new();
        let stopped = self.threads.get(id).is_some_and(|t| t.is_stopped());
        if self.selection.is_selected(id) && stopped && previous != level {
            effects.push(Effect::ClearVariables);
            effects.push(Effect::FetchFrameVariables {
                thread: id.clone(),
                level,
            });
        }
        Ok(effects)
    }

    pub(crate) fn stack_fetched(
        &mut self,
        id: &ThreadId,
        epoch: u64,
        frames: Vec<Frame>,
    ) -> Vec<Effect> {
        let depth = frames.len();
        if !self.threads.set_stack_if_current(id, epoch, frames) {
            return Vec::new();
        }
        if !self.selection.is_selected(id) {
            return Vec::new();
        }

        let mut level = self.selection.selected_frame(id);
        if level >= depth {
            level = 0;
            self.selection.select_frame(id, level);
        }
        if depth == 0 {
            return vec![Effect::ClearVariables];
        }
        vec![
            Effect::ClearVariables,
            Effect::FetchFrameVariables {
                thread: id.clone(),
                level,
            },
        ]
    }

    pub(crate) fn thread_info_fetched(&mut self, details: ThreadDetails) -> Vec<Effect> {
        let id = details.id;
        if !self.threads.contains(&id) {
            return Vec::new();
        }
        if !details.target_id.is_empty() {
            self.threads.set_name(&id, details.target_id);
        }
        if let Some(state) = details.state.as_deref() {
            self.threads
                .resolve_unknown_state(&id, ExecutionState::from_backend(state));
        }
        let mut effects = Vec::new();
        self.ensure_selection(&mut effects);
        effects
    }

    /// Apply a thread list requested when `transitions` stops and resumes had
    /// been applied. A list that raced with a later stop or resume still adds
    /// the threads it names, but says nothing about their state.
    pub(crate) fn thread_ids_fetched(
        &mut self,
        ids: ThreadIds,
        mark_stopped: bool,
        transitions: u64,
    ) -> Vec<Effect> {
        let current = transitions == self.transitions;
        if !current {
            tracing::debug!(
                requested_at = transitions,
                now = self.transitions,
                "thread list is older than the last stop or resume"
            );
        }
        let mark_stopped = mark_stopped && current;

        let mut effects = Vec::new();
        for id in &ids.thread_ids {
            if self.threads.upsert(id) {
                effects.push(Effect::FetchThreadInfo(id.clone()));
            }
            // threads already stopped keep their epoch so in-flight stack
            // fetches stay valid
            let stopped = self.threads.get(id).is_some_and(|t| t.is_stopped());
            if mark_stopped && !stopped {
                self.threads.mark_stopped(id);
            }
        }

        if current && self.selection.selected().is_none() {
            if let Some(id) = ids.current().filter(|id| self.threads.contains(id)) {
                let id = id.clone();
                self.select(&id, &mut effects);
            }
        }
        self.ensure_selection(&mut effects);
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use crate::events::StopRecord;

    fn id(s: &str) -> ThreadId {
        ThreadId::from(s)
    }

    fn created(s: &str) -> Indication {
        Indication::ThreadCreated { id: id(s) }
    }

    fn exited(s: &str) -> Indication {
        Indication::ThreadExited { id: id(s) }
    }

    fn stopped(thread: &str, scope: Scope) -> Indication {
        Indication::Stopped(StopRecord {
            thread_id: Some(id(thread)),
            scope,
            reason: Some("breakpoint-hit".to_string()),
        })
    }

    fn running(thread: Option<&str>) -> Indication {
        Indication::Running {
            thread_id: thread.map(id),
            scope: if thread.is_some() { Scope::One } else { Scope::All },
        }
    }

    fn state(model: &SessionModel, s: &str) -> ExecutionState {
        model.threads().get(&id(s)).unwrap().state
    }

    fn list_request(effects: &[Effect]) -> u64 {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::FetchThreadIds { transitions, .. } => Some(*transitions),
                _ => None,
            })
            .expect("a thread list request")
    }

    fn model_with_running(mode: ExecutionMode, ids: &[&str]) -> SessionModel {
        let mut model = SessionModel::new(mode, true);
        for t in ids {
            model.apply(&created(t));
            model.apply(&running(Some(t)));
        }
        model
    }

    #[test]
    fn created_thread_fetches_details_once() {
        let mut model = SessionModel::new(ExecutionMode::AllStop, true);
        assert_eq!(model.apply(&created("1")), vec![Effect::FetchThreadInfo(id("1"))]);
        assert!(model.apply(&created("1")).is_empty());
        assert_eq!(model.threads().len(), 1);
    }

    #[test]
    fn all_stop_stop_all() {
        let mut model = model_with_running(ExecutionMode::AllStop, &["1", "2"]);

        let effects = model.apply(&stopped("1", Scope::All));

        assert_eq!(state(&model, "1"), ExecutionState::Stopped);
        assert_eq!(state(&model, "2"), ExecutionState::Stopped);
        assert_eq!(model.selection().selected(), Some(&id("1")));
        assert!(model.execution_enabled());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::FetchThreadIds { mark_stopped: true, .. }
        )));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::FetchStack { thread, .. } if thread == &id("1")
        )));
    }

    #[test]
    fn non_stop_partial_stop() {
        let mut model = model_with_running(ExecutionMode::NonStop, &["1", "2"]);

        model.apply(&stopped("2", Scope::One));

        assert_eq!(state(&model, "2"), ExecutionState::Stopped);
        assert_eq!(state(&model, "1"), ExecutionState::Running);
        assert_eq!(model.selection().selected(), Some(&id("2")));
    }

    #[test]
    fn stop_keeps_existing_selection() {
        let mut model = model_with_running(ExecutionMode::NonStop, &["1", "2"]);
        model.apply(&stopped("1", Scope::One));

        let effects = model.apply(&stopped("2", Scope::One));

        assert_eq!(model.selection().selected(), Some(&id("1")));
        assert!(effects.is_empty());
    }

    #[test]
    fn exit_reason_is_informational() {
        let mut model = model_with_running(ExecutionMode::AllStop, &["1"]);

        let effects = model.apply(&Indication::Stopped(StopRecord {
            thread_id: Some(id("1")),
            scope: Scope::All,
            reason: Some("exited-normally".to_string()),
        }));

        assert!(effects.is_empty());
        assert_eq!(state(&model, "1"), ExecutionState::Running);
        assert!(model.selection().selected().is_none());
    }

    #[test]
    fn running_clears_stack_but_keeps_selection() {
        let mut model = model_with_running(ExecutionMode::AllStop, &["1"]);
        model.apply(&stopped("1", Scope::All));
        let epoch = model.threads().get(&id("1")).unwrap().epoch;
        model.stack_fetched(&id("1"), epoch, vec![Frame {
            level: 0,
            function: "main.main".to_string(),
            file: "main.go".to_string(),
            line: Some(3),
            address: None,
        }]);
        assert_eq!(model.threads().get(&id("1")).unwrap().stack.len(), 1);

        let effects = model.apply(&running(None));

        assert!(model.threads().get(&id("1")).unwrap().stack.is_empty());
        assert_eq!(model.selection().selected(), Some(&id("1")));
        assert!(!model.execution_enabled());
        assert_eq!(effects, vec![Effect::ClearVariables]);
    }

    #[test]
    fn exit_of_selected_thread_moves_selection_to_a_stopped_one() {
        let mut model = model_with_running(ExecutionMode::NonStop, &["1", "2"]);
        model.apply(&stopped("1", Scope::One));
        model.apply(&stopped("2", Scope::One));

        model.apply(&exited("1"));
        assert_eq!(model.selection().selected(), Some(&id("2")));

        model.apply(&running(Some("2")));
        model.apply(&exited("2"));
        assert!(model.selection().selected().is_none());
        assert!(model.threads().is_empty());
    }

    #[test]
    fn unknown_thread_references_are_not_created() {
        let mut model = SessionModel::new(ExecutionMode::NonStop, true);

        let effects = model.apply(&stopped("9", Scope::One));
        model.apply(&running(Some("9")));
        model.apply(&Indication::ThreadSelected { id: id("9") });

        assert!(model.threads().is_empty());
        assert!(model.selection().selected().is_none());
        assert!(matches!(
            effects.as_slice(),
            [Effect::FetchThreadIds { mark_stopped: false, .. }]
        ));
    }

    #[test]
    fn stale_stack_is_ignored() {
        let mut model = model_with_running(ExecutionMode::AllStop, &["1"]);
        model.apply(&stopped("1", Scope::All));
        let epoch = model.threads().get(&id("1")).unwrap().epoch;
        model.apply(&running(None));
        model.apply(&stopped("1", Scope::All));

        let frame = Frame {
            level: 0,
            function: "main.main".to_string(),
            file: String::new(),
            line: None,
            address: None,
        };
        assert!(model.stack_fetched(&id("1"), epoch, vec![frame]).is_empty());
        assert!(model.threads().get(&id("1")).unwrap().stack.is_empty());
    }

    #[test]
    fn frame_selection_fetches_variables_for_selected_stopped_thread() {
        let mut model = model_with_running(ExecutionMode::AllStop, &["1", "2"]);
        model.apply(&stopped("1", Scope::All));

        assert_eq!(
            model.select_frame(&id("1"), 2).unwrap(),
            vec![
                Effect::ClearVariables,
                Effect::FetchFrameVariables {
                    thread: id("1"),
                    level: 2
                }
            ]
        );
        // remembered but not shown
        assert!(model.select_frame(&id("2"), 1).unwrap().is_empty());
        assert_eq!(model.selection().selected_frame(&id("2")), 1);
        assert!(matches!(
            model.select_frame(&id("7"), 0),
            Err(SessionError::UnknownThread(_))
        ));
    }

    #[test]
    fn discovered_threads_are_stopped_in_all_stop() {
        let mut model = SessionModel::new(ExecutionMode::AllStop, true);
        model.apply(&created("1"));
        let transitions = list_request(&model.apply(&stopped("1", Scope::All)));
        let epoch = model.threads().get(&id("1")).unwrap().epoch;

        let effects = model.thread_ids_fetched(
            ThreadIds {
                thread_ids: vec![id("1"), id("2")],
                current_thread_id: Some(id("1")),
            },
            true,
            transitions,
        );

        assert_eq!(state(&model, "2"), ExecutionState::Stopped);
        assert_eq!(model.threads().get(&id("1")).unwrap().epoch, epoch);
        assert_eq!(effects, vec![Effect::FetchThreadInfo(id("2"))]);
    }

    #[test]
    fn thread_list_answered_after_resume_does_not_stop_threads() {
        let mut model = model_with_running(ExecutionMode::AllStop, &["1", "2"]);
        let transitions = list_request(&model.apply(&stopped("1", Scope::All)));
        model.apply(&running(None));

        let effects = model.thread_ids_fetched(
            ThreadIds {
                thread_ids: vec![id("1"), id("2"), id("3")],
                current_thread_id: Some(id("1")),
            },
            true,
            transitions,
        );

        assert_eq!(state(&model, "1"), ExecutionState::Running);
        assert_eq!(state(&model, "2"), ExecutionState::Running);
        // still discovered, but its state is left to thread-info
        assert_eq!(state(&model, "3"), ExecutionState::Unknown);
        assert!(!model.execution_enabled());
        assert_eq!(effects, vec![Effect::FetchThreadInfo(id("3"))]);
    }

    #[test]
    fn thread_list_answered_after_another_stop_does_not_pick_its_current_thread() {
        let mut model = model_with_running(ExecutionMode::NonStop, &["1", "2"]);
        let transitions = list_request(&model.apply(&stopped("9", Scope::One)));
        model.apply(&stopped("2", Scope::One));
        model.apply(&exited("2"));
        assert!(model.selection().selected().is_none());

        model.thread_ids_fetched(
            ThreadIds {
                thread_ids: vec![id("1"), id("9")],
                current_thread_id: Some(id("1")),
            },
            false,
            transitions,
        );

        assert!(model.selection().selected().is_none());
        assert_eq!(state(&model, "1"), ExecutionState::Running);
        assert!(!model.execution_enabled());
    }

    #[test]
    fn late_thread_info_does_not_override_a_resume() {
        let mut model = SessionModel::new(ExecutionMode::NonStop, true);
        model.apply(&created("1"));
        model.apply(&running(Some("1")));

        model.thread_info_fetched(ThreadDetails {
            id: id("1"),
            target_id: "Thread 0x1 (LWP 1)".to_string(),
            state: Some("stopped".to_string()),
            frame: None,
        });

        assert_eq!(state(&model, "1"), ExecutionState::Running);
        assert_eq!(model.threads().get(&id("1")).unwrap().name, "Thread 0x1 (LWP 1)");
        assert!(model.selection().selected().is_none());
    }

    #[test]
    fn thread_info_names_and_resolves_unknown_threads() {
        let mut model = SessionModel::new(ExecutionMode::NonStop, true);
        model.apply(&created("1"));

        let effects = model.thread_info_fetched(ThreadDetails {
            id: id("1"),
            target_id: "Thread 0x7ffff7d89740 (LWP 4242)".to_string(),
            state: Some("stopped".to_string()),
            frame: None,
        });

        let thread = model.threads().get(&id("1")).unwrap();
        assert_eq!(thread.name, "Thread 0x7ffff7d89740 (LWP 4242)");
        assert_eq!(thread.state, ExecutionState::Stopped);
        // a stopped thread must be selected
        assert_eq!(model.selection().selected(), Some(&id("1")));
        assert!(effects.contains(&Effect::FetchStack {
            thread: id("1"),
            epoch: thread.epoch
        }));
    }

    #[test]
    fn invariants_hold_under_random_indications() {
        let mut rng = crate::testing::seeded_rng(0xdead_beef_cafe_f00d);

        for mode in [ExecutionMode::AllStop, ExecutionMode::NonStop] {
            let mut model = SessionModel::new(mode, rng.gen_bool(0.5));
            let mut live = std::collections::BTreeSet::new();
            for _ in 0..2000 {
                let t = rng.gen_range(0..6).to_string();
                let indication = match rng.gen_range(0..7) {
                    0 => {
                        live.insert(id(&t));
                        created(&t)
                    }
                    1 => {
                        live.remove(&id(&t));
                        exited(&t)
                    }
                    2 => stopped(&t, Scope::One),
                    3 => stopped(&t, Scope::All),
                    4 => running(Some(&t)),
                    5 => running(None),
                    _ => Indication::ThreadSelected { id: id(&t) },
                };
                model.apply(&indication);

                let threads: std::collections::BTreeSet<_> =
                    model.threads().list().cloned().collect();
                assert_eq!(threads, live);

                let any_stopped = model.threads().iter().any(|t| t.is_stopped());
                if any_stopped {
                    assert!(model.selection().selected().is_some(), "{indication:?}");
                }
                for thread in model.threads().iter() {
                    assert!(thread.stack.is_empty() || thread.is_stopped());
                }
                let expected = model
                    .selection()
                    .selected()
                    .and_then(|s| model.threads().get(s))
                    .is_some_and(|t| t.state == ExecutionState::Stopped);
                assert_eq!(model.execution_enabled(), expected);
            }
        }
    }
}

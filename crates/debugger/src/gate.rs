use crate::{selection::SelectionController, threads::ThreadRegistry};

/// Whether step, next and continue may be issued: exactly one thread is
/// selected and it is stopped.
pub fn execution_enabled(selection: &SelectionController, threads: &ThreadRegistry) -> bool {
    selection
        .selected()
        .and_then(|id| threads.get(id))
        .is_some_and(|thread| thread.is_stopped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use crate::types::{ExecutionState, ThreadId};

    #[test]
    fn requires_a_selected_stopped_thread() {
        let mut threads = ThreadRegistry::new();
        let mut selection = SelectionController::new(true);
        let one = ThreadId::from("1");
        threads.upsert(&one);

        assert!(!execution_enabled(&selection, &threads));
        selection.select_thread(&one);
        assert!(!execution_enabled(&selection, &threads));
        threads.mark_stopped(&one);
        assert!(execution_enabled(&selection, &threads));
        threads.mark_running(&one);
        assert!(!execution_enabled(&selection, &threads));
    }

    #[test]
    fn selection_of_an_unknown_thread_is_disabled() {
        let threads = ThreadRegistry::new();
        let mut selection = SelectionController::new(true);
        selection.select_thread(&ThreadId::from("9"));
        assert!(!execution_enabled(&selection, &threads));
    }

    #[test]
    fn matches_definition_under_random_interleaving() {
        let mut rng = crate::testing::seeded_rng(0x9e37_79b9_7f4a_7c15);

        let ids: Vec<ThreadId> = (1..=4).map(|n| ThreadId::from(n.to_string())).collect();
        let mut threads = ThreadRegistry::new();
        for id in &ids {
            threads.upsert(id);
        }
        let mut selection = SelectionController::new(false);

        for _ in 0..1000 {
            let id = &ids[rng.gen_range(0..ids.len())];
            match rng.gen_range(0..4) {
                0 => {
                    threads.mark_stopped(id);
                }
                1 => {
                    threads.mark_running(id);
                }
                2 => {
                    selection.select_thread(id);
                }
                _ => selection.deselect_all(),
            }

            let expected = match selection.selected() {
                Some(selected) => {
                    threads.get(selected).map(|t| t.state) == Some(ExecutionState::Stopped)
                }
                None => false,
            };
            assert_eq!(execution_enabled(&selection, &threads), expected);
        }
    }
}

//! Window-switcher (cycle) state machine.
//!
//! Entered by the NextWindow/PreviousWindow actions, driven by key events
//! while the seat is in `InputMode::Cycle`, and finished either
//! explicitly or when the last modifier is released.

use crate::{
    seat::InputMode,
    server::Server,
    view::{ViewCriteria, ViewId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleDir {
    Forward,
    Backward,
}

#[derive(Clone, Debug)]
pub struct CycleState {
    /// Candidates in front-to-back order at the time cycling started.
    pub entries: Vec<ViewId>,
    pub index: usize,
}

impl CycleState {
    pub fn selected(&self) -> Option<ViewId> {
        self.entries.get(self.index).copied()
    }
}

impl Server {
    /// Enter cycle mode (or step it when already cycling).
    pub fn cycle_begin_or_step(&mut self, dir: CycleDir) {
        if self.input_mode == InputMode::Cycle {
            self.cycle_step(dir);
            return;
        }

        let mut entries: Vec<ViewId> = self
            .views
            .matching(ViewCriteria::MappedAndFocusable, self.workspaces.current())
            .into_iter()
            .filter(|id| {
                self.views
                    .get(*id)
                    .is_ok_and(|view| !view.minimized && view.workspace().is_some())
            })
            .collect();
        entries.reverse();
        if entries.is_empty() {
            return;
        }

        self.input_mode = InputMode::Cycle;
        self.cancel_cycling_on_next_key_release = false;
        let mut state = CycleState { entries, index: 0 };
        // The first step moves off the currently focused view.
        match dir {
            CycleDir::Forward => state.index = 1 % state.entries.len(),
            CycleDir::Backward => state.index = state.entries.len() - 1,
        }
        self.cycle = Some(state);
    }

    pub fn cycle_step(&mut self, dir: CycleDir) {
        let Some(state) = self.cycle.as_mut() else {
            return;
        };
        let len = state.entries.len();
        state.index = match dir {
            CycleDir::Forward => (state.index + 1) % len,
            CycleDir::Backward => (state.index + len - 1) % len,
        };
    }

    /// Leave cycle mode; with `switch_focus` the selected view is focused
    /// and raised, otherwise the switch is abandoned.
    pub fn cycle_finish(&mut self, switch_focus: bool) {
        let selected = self.cycle.take().and_then(|state| state.selected());
        self.input_mode = InputMode::Passthrough;
        self.cancel_cycling_on_next_key_release = false;
        if switch_focus {
            if let Some(id) = selected {
                self.focus_view(id, true);
            }
        }
    }
}

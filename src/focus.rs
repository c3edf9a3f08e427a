//! Keyboard-focus policy.

use crate::{
    output::OutputId,
    seat::{ClientEvent, InputMode},
    server::Server,
    view::{FocusPolicy, ViewId},
};

impl Server {
    /// Focus a view, honoring its focus policy.
    ///
    /// Guards against views with no mapped surface (seen when handling
    /// request_activate and request_minimize for half-initialized
    /// clients). A minimized view is unminimized instead; the remap path
    /// re-enters focus with raise set.
    pub fn focus_view(&mut self, id: ViewId, raise: bool) {
        let Ok(view) = self.views.get(id) else {
            tracing::debug!("focus request for stale view");
            return;
        };
        if !view.has_surface {
            return;
        }
        if self.input_mode == InputMode::Cycle {
            tracing::debug!("not focusing window while window switching");
            return;
        }
        if view.minimized {
            if self.views.minimize(id, false).is_ok() {
                self.focus_view(id, true);
            }
            return;
        }
        if !view.mapped {
            return;
        }

        // Make the view visible, unless it lives in a band that is shown
        // on every workspace anyway.
        if let Some(workspace) = view.workspace() {
            if workspace != self.workspaces.current() {
                self.switch_workspace(workspace, false);
            }
        }

        if raise {
            self.move_view_to_front(id);
        }

        // A modal dialog in the family takes the focus instead; raising
        // already surfaced it together with its siblings.
        let target = self.views.modal_dialog_of(id).unwrap_or(id);
        self.set_or_offer_focus(target);
    }

    fn set_or_offer_focus(&mut self, id: ViewId) {
        let Ok(view) = self.views.get(id) else {
            return;
        };
        match view.wants_focus {
            FocusPolicy::Always => {
                if self.seat.focused_view != Some(id) {
                    self.set_keyboard_focus(Some(id));
                }
            }
            FocusPolicy::Likely | FocusPolicy::Unlikely => {
                self.seat.events.push_back(ClientEvent::OfferFocus { view: id });
            }
            FocusPolicy::Never => {}
        }
    }

    pub fn set_keyboard_focus(&mut self, view: Option<ViewId>) {
        self.seat.focused_view = view;
        let serial = self.seat.next_serial();
        self.seat
            .events
            .push_back(ClientEvent::FocusView { view, serial });
        if self.config.kb_layout_per_window {
            if let Some(layout) = view
                .and_then(|id| self.views.get(id).ok())
                .map(|view| view.keyboard_layout)
            {
                self.keyboard_update_layout(layout as usize);
            }
        }
    }

    /// Focus the topmost focusable, non-minimized view on the current
    /// workspace, or clear keyboard focus when there is none.
    pub fn focus_topmost_view(&mut self) {
        match self.views.topmost_focusable(self.workspaces.current()) {
            Some(id) => self.focus_view(id, true),
            None => self.set_keyboard_focus(None),
        }
    }

    /// Focus the topmost focusable view intersecting the output (without
    /// raising) and warp the cursor to its center; with no candidate,
    /// warp to the center of the output's usable area.
    pub fn focus_output(&mut self, output_id: OutputId) {
        let Some(output) = self.outputs.get(output_id) else {
            return;
        };
        if !output.is_usable() || self.input_mode != InputMode::Passthrough {
            return;
        }
        let geometry = output.geometry;
        let usable = output.usable;

        let current = self.workspaces.current();
        let candidate = self
            .views
            .stacking()
            .iter()
            .rev()
            .copied()
            .filter_map(|id| self.views.get(id).ok())
            .find(|view| {
                view.workspace() == Some(current)
                    && view.is_focusable()
                    && view.current.intersects(&geometry)
            })
            .map(|view| view.id);

        match candidate {
            Some(id) => {
                self.focus_view(id, false);
                if let Ok(view) = self.views.get(id) {
                    let (x, y) = view.current.center();
                    self.warp_cursor(x as f64, y as f64);
                }
            }
            None => {
                let (x, y) = usable.center();
                self.warp_cursor(x as f64, y as f64);
            }
        }
        self.update_pointer_focus();
    }

    pub fn warp_cursor(&mut self, x: f64, y: f64) {
        self.seat.pointer = (x, y);
        self.seat.events.push_back(ClientEvent::CursorWarp { x, y });
    }

    /// Recompute pointer focus from the scene after the cursor moved or
    /// the window stack changed.
    pub fn update_pointer_focus(&mut self) {
        let context = self.cursor_context();
        self.pointer_context = context;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::LoadedConfig,
        geo::Rect,
        seat::{ClientEvent, InputMode},
        server::Server,
        view::{FocusPolicy, Placement, View, ViewId},
        workspaces::WorkspaceId,
    };

    fn server() -> Server {
        Server::new_headless(LoadedConfig {
            path: None,
            config: Default::default(),
        })
    }

    fn add_view(server: &mut Server, workspace: usize, policy: FocusPolicy) -> ViewId {
        let mut view = View::new(Placement::Workspace(WorkspaceId(workspace)));
        view.wants_focus = policy;
        let id = server.views.register(view);
        server.views.map(id).unwrap();
        server
            .views
            .move_resize(id, Rect::new(0, 0, 100, 100))
            .unwrap();
        id
    }

    #[test]
    fn always_policy_takes_focus_and_raises() {
        let mut server = server();
        let a = add_view(&mut server, 0, FocusPolicy::Always);
        let b = add_view(&mut server, 0, FocusPolicy::Always);
        server.focus_view(a, true);
        assert_eq!(server.seat.focused_view, Some(a));
        assert_eq!(server.views.stacking().last(), Some(&a));
        server.focus_view(b, false);
        assert_eq!(server.seat.focused_view, Some(b));
        // No raise requested: stacking unchanged.
        assert_eq!(server.views.stacking().last(), Some(&a));
    }

    #[test]
    fn likely_policy_only_offers() {
        let mut server = server();
        let a = add_view(&mut server, 0, FocusPolicy::Likely);
        server.focus_view(a, true);
        assert_eq!(server.seat.focused_view, None);
        assert!(server
            .seat
            .events
            .iter()
            .any(|event| matches!(event, ClientEvent::OfferFocus { view } if *view == a)));
    }

    #[test]
    fn focus_switches_workspace_without_chaining_focus() {
        let mut server = server();
        let _a = add_view(&mut server, 0, FocusPolicy::Always);
        let b = add_view(&mut server, 1, FocusPolicy::Always);
        server.focus_view(b, true);
        assert_eq!(server.workspaces.current(), WorkspaceId(1));
        assert_eq!(server.seat.focused_view, Some(b));
    }

    #[test]
    fn cycle_mode_blocks_focus() {
        let mut server = server();
        let a = add_view(&mut server, 0, FocusPolicy::Always);
        server.input_mode = InputMode::Cycle;
        server.focus_view(a, true);
        assert_eq!(server.seat.focused_view, None);
    }

    #[test]
    fn minimized_view_is_restored_then_focused() {
        let mut server = server();
        let a = add_view(&mut server, 0, FocusPolicy::Always);
        server.views.minimize(a, true).unwrap();
        server.focus_view(a, true);
        let view = server.views.get(a).unwrap();
        assert!(!view.minimized && view.mapped);
        assert_eq!(server.seat.focused_view, Some(a));
    }

    #[test]
    fn modal_dialog_steals_focus_from_parent() {
        let mut server = server();
        let parent = add_view(&mut server, 0, FocusPolicy::Always);
        let mut dialog = View::new(Placement::Workspace(WorkspaceId(0)));
        dialog.wants_focus = FocusPolicy::Always;
        dialog.parent = Some(parent);
        dialog.modal = true;
        let dialog = server.views.register(dialog);
        server.views.map(dialog).unwrap();

        server.focus_view(parent, true);
        assert_eq!(server.seat.focused_view, Some(dialog));
        // The dialog surfaced together with the parent.
        let stacking = server.views.stacking();
        assert_eq!(&stacking[stacking.len() - 2..], [parent, dialog]);
    }

    #[test]
    fn topmost_fallback_clears_focus() {
        let mut server = server();
        let a = add_view(&mut server, 0, FocusPolicy::Always);
        server.focus_view(a, true);
        server.views.minimize(a, true).unwrap();
        server.focus_topmost_view();
        assert_eq!(server.seat.focused_view, None);
    }

    #[test]
    fn focus_output_warps_to_view_center() {
        let mut server = server();
        let output = server.add_output("DP-1", Rect::new(0, 0, 1000, 600));
        let a = add_view(&mut server, 0, FocusPolicy::Always);
        server.views.get_mut(a).unwrap().output = Some(output);
        server
            .views
            .move_resize(a, Rect::new(100, 100, 200, 200))
            .unwrap();
        server.focus_output(output);
        assert_eq!(server.seat.pointer, (200.0, 200.0));
        assert_eq!(server.seat.focused_view, Some(a));
    }

    #[test]
    fn focus_output_without_views_warps_to_usable_center() {
        let mut server = server();
        let output = server.add_output("DP-1", Rect::new(0, 0, 1000, 600));
        server.outputs.get_mut(output).unwrap().usable = Rect::new(0, 30, 1000, 570);
        server.focus_output(output);
        assert_eq!(server.seat.pointer, (500.0, 315.0));
    }
}

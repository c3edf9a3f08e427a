//! Workspaces and the stacking operations layered on top of the registry.

use crate::{
    server::Server,
    view::{ViewCriteria, ViewId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(pub usize);

#[derive(Clone, Debug)]
pub struct Workspace {
    pub name: String,
}

/// The fixed set of workspaces. Created at init from configuration, never
/// removed at runtime; reconfigure only renames.
#[derive(Clone, Debug)]
pub struct Workspaces {
    list: Vec<Workspace>,
    current: WorkspaceId,
}

impl Workspaces {
    pub fn new(names: &[String]) -> Self {
        let names = if names.is_empty() {
            vec!["1".to_owned()]
        } else {
            names.to_vec()
        };
        Self {
            list: names
                .into_iter()
                .map(|name| Workspace { name })
                .collect(),
            current: WorkspaceId(0),
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn current(&self) -> WorkspaceId {
        self.current
    }

    pub(crate) fn set_current(&mut self, id: WorkspaceId) {
        if id.0 < self.list.len() {
            self.current = id;
        }
    }

    pub fn contains(&self, id: WorkspaceId) -> bool {
        id.0 < self.list.len()
    }

    pub fn name(&self, id: WorkspaceId) -> &str {
        self.list
            .get(id.0)
            .map(|workspace| workspace.name.as_str())
            .unwrap_or("")
    }

    /// Rename from a freshly loaded config, preserving the current index.
    pub fn rename_from(&mut self, names: &[String]) {
        for (workspace, name) in self.list.iter_mut().zip(names) {
            workspace.name = name.clone();
        }
    }

    pub fn next(&self) -> WorkspaceId {
        WorkspaceId((self.current.0 + 1) % self.list.len())
    }

    pub fn prev(&self) -> WorkspaceId {
        WorkspaceId((self.current.0 + self.list.len() - 1) % self.list.len())
    }

    /// Resolve a workspace from a name (case-insensitive) or a 1-based
    /// index.
    pub fn lookup(&self, name_or_index: &str) -> Option<WorkspaceId> {
        let token = name_or_index.trim();
        if let Some(found) = self
            .list
            .iter()
            .position(|workspace| workspace.name.eq_ignore_ascii_case(token))
        {
            return Some(WorkspaceId(found));
        }
        let index: usize = token.parse().ok()?;
        (1..=self.list.len())
            .contains(&index)
            .then(|| WorkspaceId(index - 1))
    }
}

impl Server {
    /// Switch the current workspace: hide every view bound to another
    /// workspace (top/bottom band views stay), show the target's views,
    /// then optionally re-run focus selection.
    pub fn switch_workspace(&mut self, target: WorkspaceId, update_focus: bool) {
        if !self.workspaces.contains(target) {
            tracing::warn!("ignoring switch to invalid workspace {:?}", target);
            return;
        }
        if self.workspaces.current() != target {
            self.workspaces.set_current(target);
            tracing::debug!(
                workspace = self.workspaces.name(target),
                "switched workspace"
            );
        }
        self.update_top_layer_visibility();
        self.write_status_files();
        if update_focus {
            self.focus_topmost_view();
        }
    }

    /// Move a view (and its dialog family) to the front of its band.
    pub fn move_view_to_front(&mut self, id: ViewId) {
        if let Err(err) = self.views.raise_family(id) {
            tracing::debug!("raise failed: {err}");
            return;
        }
        self.update_top_layer_visibility();
    }

    pub fn move_view_to_back(&mut self, id: ViewId) {
        if let Err(err) = self.views.lower(id) {
            tracing::debug!("lower failed: {err}");
            return;
        }
        self.update_top_layer_visibility();
    }

    /// Re-bind a view to another workspace, keeping band views untouched.
    pub fn send_view_to_workspace(&mut self, id: ViewId, target: WorkspaceId) {
        if !self.workspaces.contains(target) {
            return;
        }
        let Ok(view) = self.views.get(id) else {
            return;
        };
        match view.workspace() {
            Some(workspace) if workspace != target => {
                let _ = self
                    .views
                    .replace_placement(id, crate::view::Placement::Workspace(target));
                self.update_top_layer_visibility();
            }
            _ => {}
        }
    }

    /// For every output the "top" layer is enabled unless the topmost
    /// mapped, non-minimized view on it is fullscreen with nothing above.
    pub fn update_top_layer_visibility(&mut self) {
        for (_, output) in self.outputs.iter_mut() {
            output.top_layer_enabled = true;
        }

        // Front to back: a fullscreen view only wins when nothing covers
        // it from above.
        let current = self.workspaces.current();
        let mut outputs_covered = 0u64;
        let mut disable = Vec::new();
        for id in self
            .views
            .matching(ViewCriteria::CurrentWorkspace, current)
            .into_iter()
            .rev()
        {
            let Ok(view) = self.views.get(id) else {
                continue;
            };
            if view.minimized || !view.mapped {
                continue;
            }
            let Some(output_id) = view.output else {
                continue;
            };
            if !self
                .outputs
                .get(output_id)
                .is_some_and(crate::output::Output::is_usable)
            {
                continue;
            }
            if view.fullscreen && view.outputs & outputs_covered == 0 {
                disable.push(output_id);
            }
            outputs_covered |= view.outputs;
        }
        for output_id in disable {
            if let Some(output) = self.outputs.get_mut(output_id) {
                output.top_layer_enabled = false;
            }
        }
    }
}

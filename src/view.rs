//! Managed client windows ("views") and the registry that owns them.
//!
//! Views are owned by the registry and addressed through stable handles;
//! the global stacking order is a single back-to-front sequence kept
//! partitioned into three bands: always-on-bottom, workspace views,
//! always-on-top.

use std::collections::HashMap;

use crate::{
    config::{Config, TileDirection},
    errors::{Error, Result},
    geo::{Border, Rect},
    output::OutputId,
    workspaces::WorkspaceId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl ViewId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Which axes a view is maximized along.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViewAxis {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

impl ViewAxis {
    pub fn horizontal(self) -> bool {
        matches!(self, ViewAxis::Horizontal | ViewAxis::Both)
    }

    pub fn vertical(self) -> bool {
        matches!(self, ViewAxis::Vertical | ViewAxis::Both)
    }
}

/// The view's stated keyboard-focus policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FocusPolicy {
    Always,
    #[default]
    Likely,
    Unlikely,
    Never,
}

/// Workspace binding, or one of the global stacking bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Workspace(WorkspaceId),
    AlwaysOnTop,
    AlwaysOnBottom,
}

impl Placement {
    fn band_rank(self) -> u8 {
        match self {
            Placement::AlwaysOnBottom => 0,
            Placement::Workspace(_) => 1,
            Placement::AlwaysOnTop => 2,
        }
    }
}

/// Server-side decoration descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ssd {
    pub thickness: Border,
    pub titlebar_height: i32,
}

/// Window-rule properties resolved at map time and on reconfigure.
#[derive(Clone, Copy, Debug, Default)]
pub struct ViewRuleProps {
    pub fixed_position: bool,
    pub tile_opt_out: bool,
    pub tile_direction: Option<TileDirection>,
}

#[derive(Clone, Debug)]
pub struct View {
    pub id: ViewId,
    pub app_id: Option<String>,
    pub title: Option<String>,

    /// Geometry committed to the client.
    pub current: Rect,
    /// Geometry requested but not yet committed.
    pub pending: Rect,
    /// Pre-maximize geometry, restored on unmaximize.
    pub natural: Rect,

    pub output: Option<OutputId>,
    /// Bitmask of outputs the view currently intersects.
    pub outputs: u64,
    pub placement: Placement,

    pub mapped: bool,
    pub been_mapped: bool,
    pub has_surface: bool,
    pub minimized: bool,
    pub fullscreen: bool,
    pub maximized: ViewAxis,
    pub tiled: bool,

    pub wants_focus: FocusPolicy,
    pub ssd: Option<Ssd>,
    pub keyboard_layout: u32,

    pub parent: Option<ViewId>,
    pub modal: bool,
    /// Action names this view asks the compositor not to run while active.
    pub inhibited_actions: Vec<String>,
    pub rules: ViewRuleProps,
}

impl View {
    pub fn new(placement: Placement) -> Self {
        Self {
            id: ViewId(0),
            app_id: None,
            title: None,
            current: Rect::default(),
            pending: Rect::default(),
            natural: Rect::default(),
            output: None,
            outputs: 0,
            placement,
            mapped: false,
            been_mapped: false,
            has_surface: false,
            minimized: false,
            fullscreen: false,
            maximized: ViewAxis::None,
            tiled: false,
            wants_focus: FocusPolicy::default(),
            ssd: None,
            keyboard_layout: 0,
            parent: None,
            modal: false,
            inhibited_actions: Vec::new(),
            rules: ViewRuleProps::default(),
        }
    }

    pub fn is_always_on_top(&self) -> bool {
        self.placement == Placement::AlwaysOnTop
    }

    pub fn is_always_on_bottom(&self) -> bool {
        self.placement == Placement::AlwaysOnBottom
    }

    pub fn workspace(&self) -> Option<WorkspaceId> {
        match self.placement {
            Placement::Workspace(ws) => Some(ws),
            _ => None,
        }
    }

    pub fn is_focusable(&self) -> bool {
        self.has_surface && self.mapped && self.wants_focus != FocusPolicy::Never
    }

    /// Eligible for the tiling engine.
    pub fn is_tileable(&self) -> bool {
        !self.minimized
            && !self.fullscreen
            && !self.is_always_on_top()
            && !self.is_always_on_bottom()
            && !self.rules.fixed_position
            && !self.rules.tile_opt_out
    }

    pub fn ssd_thickness(&self) -> Border {
        self.ssd.map(|ssd| ssd.thickness).unwrap_or_default()
    }

    pub fn inhibits_any(&self, actions: &[crate::action::Action]) -> bool {
        actions
            .iter()
            .any(|action| self.inhibited_actions.iter().any(|name| name == action.name()))
    }

    /// Re-resolve window-rule properties against the active config.
    pub fn apply_rules(&mut self, config: &Config) {
        let mut props = ViewRuleProps::default();
        for rule in &config.window_rules {
            if !rule.matches(self.app_id.as_deref(), self.title.as_deref()) {
                continue;
            }
            if let Some(fixed) = rule.fixed_position {
                props.fixed_position = fixed;
            }
            if let Some(tile) = rule.tile {
                props.tile_opt_out = !tile;
            }
            if let Some(direction) = rule.tile_direction {
                props.tile_direction = Some(direction);
            }
        }
        self.rules = props;
    }
}

/// Iteration criteria for [`ViewRegistry::matching`]. Iteration order is
/// always stacking order, back to front.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewCriteria {
    Any,
    CurrentWorkspace,
    MappedAndFocusable,
    Tileable,
}

#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: HashMap<ViewId, View>,
    /// Back-to-front, partitioned bottom band / workspace views / top band.
    stacking: Vec<ViewId>,
    next_id: u64,
}

impl ViewRegistry {
    pub fn register(&mut self, mut view: View) -> ViewId {
        self.next_id += 1;
        let id = ViewId(self.next_id);
        view.id = id;
        let rank = view.placement.band_rank();
        self.views.insert(id, view);
        let at = self.band_end(rank);
        self.stacking.insert(at, id);
        id
    }

    pub fn unregister(&mut self, id: ViewId) -> Result<View> {
        let view = self.views.remove(&id).ok_or(Error::ViewGone)?;
        self.stacking.retain(|entry| *entry != id);
        for other in self.views.values_mut() {
            if other.parent == Some(id) {
                other.parent = None;
            }
        }
        Ok(view)
    }

    pub fn contains(&self, id: ViewId) -> bool {
        self.views.contains_key(&id)
    }

    pub fn get(&self, id: ViewId) -> Result<&View> {
        self.views.get(&id).ok_or(Error::ViewGone)
    }

    pub fn get_mut(&mut self, id: ViewId) -> Result<&mut View> {
        self.views.get_mut(&id).ok_or(Error::ViewGone)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Global stacking order, back to front.
    pub fn stacking(&self) -> &[ViewId] {
        &self.stacking
    }

    pub fn iter(&self) -> impl Iterator<Item = &View> + '_ {
        self.stacking.iter().filter_map(|id| self.views.get(id))
    }

    pub fn iter_mut_unordered(&mut self) -> impl Iterator<Item = &mut View> + '_ {
        self.views.values_mut()
    }

    pub fn matching(&self, criteria: ViewCriteria, current: WorkspaceId) -> Vec<ViewId> {
        self.iter()
            .filter(|view| match criteria {
                ViewCriteria::Any => true,
                ViewCriteria::CurrentWorkspace => {
                    view.workspace().is_none() || view.workspace() == Some(current)
                }
                ViewCriteria::MappedAndFocusable => view.is_focusable(),
                ViewCriteria::Tileable => {
                    view.workspace() == Some(current) && view.is_tileable()
                }
            })
            .map(|view| view.id)
            .collect()
    }

    /// Follow the parent chain up to the root view.
    pub fn root_of(&self, id: ViewId) -> ViewId {
        let mut current = id;
        let mut hops = 0;
        while let Some(view) = self.views.get(&current) {
            match view.parent {
                Some(parent) if self.views.contains_key(&parent) && hops < 64 => {
                    current = parent;
                    hops += 1;
                }
                _ => break,
            }
        }
        current
    }

    /// All views sharing a root with `id`, in stacking order.
    pub fn family_of(&self, id: ViewId) -> Vec<ViewId> {
        let root = self.root_of(id);
        self.stacking
            .iter()
            .copied()
            .filter(|entry| self.root_of(*entry) == root)
            .collect()
    }

    /// A mapped modal dialog within the view's family, if any.
    pub fn modal_dialog_of(&self, id: ViewId) -> Option<ViewId> {
        let root = self.root_of(id);
        self.iter()
            .find(|view| view.modal && view.mapped && self.root_of(view.id) == root)
            .map(|view| view.id)
    }

    /// Topmost focusable, non-minimized view on the given workspace.
    pub fn topmost_focusable(&self, workspace: WorkspaceId) -> Option<ViewId> {
        self.stacking
            .iter()
            .rev()
            .filter_map(|id| self.views.get(id))
            .find(|view| {
                view.workspace() == Some(workspace) && view.is_focusable() && !view.minimized
            })
            .map(|view| view.id)
    }

    fn band_start(&self, rank: u8) -> usize {
        self.stacking
            .iter()
            .position(|id| {
                self.views
                    .get(id)
                    .is_some_and(|view| view.placement.band_rank() >= rank)
            })
            .unwrap_or(self.stacking.len())
    }

    fn band_end(&self, rank: u8) -> usize {
        self.stacking
            .iter()
            .position(|id| {
                self.views
                    .get(id)
                    .is_some_and(|view| view.placement.band_rank() > rank)
            })
            .unwrap_or(self.stacking.len())
    }

    /// Raise the view's whole family to the front of its band, keeping the
    /// family's relative order. Raising siblings together is what lets a
    /// modal dialog surface with its parent.
    pub fn raise_family(&mut self, id: ViewId) -> Result<()> {
        let rank = self.get(id)?.placement.band_rank();
        let family = self.family_of(id);
        self.stacking.retain(|entry| !family.contains(entry));
        let at = self.band_end(rank);
        for (offset, member) in family.into_iter().enumerate() {
            self.stacking.insert(at + offset, member);
        }
        Ok(())
    }

    /// Lower a single view to the back of its band.
    pub fn lower(&mut self, id: ViewId) -> Result<()> {
        let rank = self.get(id)?.placement.band_rank();
        self.stacking.retain(|entry| *entry != id);
        let at = self.band_start(rank);
        self.stacking.insert(at, id);
        Ok(())
    }

    /// Re-slot a view after its placement (workspace or band) changed.
    pub fn replace_placement(&mut self, id: ViewId, placement: Placement) -> Result<()> {
        let view = self.get_mut(id)?;
        view.placement = placement;
        let rank = placement.band_rank();
        self.stacking.retain(|entry| *entry != id);
        let at = self.band_end(rank);
        self.stacking.insert(at, id);
        Ok(())
    }

    fn commit(view: &mut View, rect: Rect) -> Result<()> {
        view.pending = rect;
        if !view.mapped {
            return Err(Error::NotMapped);
        }
        view.current = rect;
        Ok(())
    }

    /// Commit a new geometry on behalf of a user or client request.
    ///
    /// A maximized view is first unmaximized without storing natural
    /// geometry; a tiled view loses its tiled flag since the geometry no
    /// longer comes from the tiling engine.
    pub fn move_resize(&mut self, id: ViewId, rect: Rect) -> Result<()> {
        let view = self.get_mut(id)?;
        if view.maximized != ViewAxis::None {
            view.maximized = ViewAxis::None;
        }
        view.tiled = false;
        Self::commit(view, rect)
    }

    /// Geometry commit from the tiling engine: keeps the tiled flag set.
    pub(crate) fn move_resize_tiled(&mut self, id: ViewId, rect: Rect) -> Result<()> {
        let view = self.get_mut(id)?;
        if view.maximized != ViewAxis::None {
            view.maximized = ViewAxis::None;
        }
        view.tiled = true;
        Self::commit(view, rect)
    }

    pub fn set_tiled(&mut self, id: ViewId, tiled: bool) -> Result<()> {
        self.get_mut(id)?.tiled = tiled;
        Ok(())
    }

    /// Maximize along `axis` within `usable`, or restore natural geometry
    /// when `axis` is `None`. With `store_natural` the current geometry is
    /// saved first so a later restore returns to it exactly.
    pub fn maximize(
        &mut self,
        id: ViewId,
        axis: ViewAxis,
        store_natural: bool,
        usable: Option<Rect>,
    ) -> Result<()> {
        let view = self.get_mut(id)?;
        if axis == ViewAxis::None {
            view.maximized = ViewAxis::None;
            let natural = view.natural;
            return Self::commit(view, natural);
        }

        if store_natural {
            view.natural = view.current;
        }
        view.maximized = axis;
        let Some(usable) = usable else {
            return Ok(());
        };
        let margin = view.ssd_thickness();
        let target = usable.shrink(&margin);
        let mut rect = view.current;
        if axis.horizontal() {
            rect.x = target.x;
            rect.width = target.width;
        }
        if axis.vertical() {
            rect.y = target.y;
            rect.height = target.height;
        }
        Self::commit(view, rect)
    }

    /// Minimize or restore. Minimizing an unmapped view is a no-op; a view
    /// can never be fullscreen and minimized at once.
    pub fn minimize(&mut self, id: ViewId, minimized: bool) -> Result<()> {
        let view = self.get_mut(id)?;
        if view.minimized == minimized {
            return Ok(());
        }
        if minimized {
            if !view.mapped {
                return Ok(());
            }
            view.fullscreen = false;
            view.minimized = true;
            view.mapped = false;
        } else {
            view.minimized = false;
            if view.been_mapped {
                view.mapped = true;
            }
        }
        Ok(())
    }

    pub fn set_fullscreen(
        &mut self,
        id: ViewId,
        fullscreen: bool,
        output_geometry: Option<Rect>,
    ) -> Result<()> {
        let view = self.get_mut(id)?;
        if view.fullscreen == fullscreen {
            return Ok(());
        }
        if fullscreen {
            if view.minimized {
                view.minimized = false;
                if view.been_mapped {
                    view.mapped = true;
                }
            }
            if view.maximized == ViewAxis::None && !view.tiled {
                view.natural = view.current;
            }
            view.fullscreen = true;
            if let Some(geometry) = output_geometry {
                return Self::commit(view, geometry);
            }
        } else {
            view.fullscreen = false;
            let natural = view.natural;
            if !natural.is_empty() {
                return Self::commit(view, natural);
            }
        }
        Ok(())
    }

    /// Client map: the view becomes visible and focusable.
    pub fn map(&mut self, id: ViewId) -> Result<()> {
        let view = self.get_mut(id)?;
        view.has_surface = true;
        view.mapped = true;
        view.been_mapped = true;
        view.minimized = false;
        if !view.pending.is_empty() {
            view.current = view.pending;
        }
        Ok(())
    }

    pub fn unmap(&mut self, id: ViewId) -> Result<()> {
        self.get_mut(id)?.mapped = false;
        Ok(())
    }
}

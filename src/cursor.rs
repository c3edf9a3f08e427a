//! Cursor-context resolution.
//!
//! Given the cursor position, find the scene node underneath, then walk up
//! until a descriptor tag classifies the hit. SSD hits are refined by a
//! resize hit-test into edge/corner contexts.

use bitflags::bitflags;

use crate::{
    scene::{NodeDescriptor, NodeId, SsdButton},
    server::Server,
    view::ViewId,
};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ResizeEdge: u32 {
        const TOP = 1 << 0;
        const BOTTOM = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextKind {
    #[default]
    None,
    Root,
    Client,
    LayerSurface,
    MenuItem,
    CycleOsdItem,
    Titlebar,
    Title,
    Button(SsdButton),
    /// SSD border or corner; the edges identify which.
    Resize(ResizeEdge),
    Unmanaged,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CursorContext {
    pub kind: ContextKind,
    pub view: Option<ViewId>,
    pub node: Option<NodeId>,
    /// Surface-local coordinates of the hit.
    pub sx: f64,
    pub sy: f64,
}

impl Server {
    pub fn cursor_context(&self) -> CursorContext {
        let (x, y) = self.seat.pointer;
        let Some(node_id) = self.scene.node_at(x, y) else {
            return CursorContext {
                kind: ContextKind::Root,
                ..Default::default()
            };
        };

        let node = self.scene.get(node_id);
        let mut context = CursorContext {
            kind: ContextKind::None,
            view: None,
            node: Some(node_id),
            sx: x - node.rect.x as f64,
            sy: y - node.rect.y as f64,
        };
        if let Some((width, height)) = node.surface_size {
            avoid_edge_rounding_issues(&mut context, width, height);
        }
        let has_surface = node.surface_size.is_some();

        let Some((tagged, descriptor)) = self.scene.descriptor_at(node_id) else {
            return context;
        };

        match descriptor {
            NodeDescriptor::View(view) | NodeDescriptor::XdgPopup(view) => {
                context.view = Some(view);
                // e.g. when the cursor is on a resize indicator there is no
                // surface under it even though the node belongs to a view.
                context.kind = if has_surface {
                    ContextKind::Client
                } else {
                    ContextKind::None
                };
            }
            NodeDescriptor::LayerSurface => context.kind = ContextKind::LayerSurface,
            NodeDescriptor::LayerPopup
            | NodeDescriptor::SessionLockSurface
            | NodeDescriptor::ImePopup => context.kind = ContextKind::Client,
            NodeDescriptor::MenuItem => {
                context.node = Some(tagged);
                context.kind = ContextKind::MenuItem;
            }
            NodeDescriptor::CycleOsdItem => {
                context.node = Some(tagged);
                context.kind = ContextKind::CycleOsdItem;
            }
            NodeDescriptor::SsdRoot(view)
            | NodeDescriptor::SsdTitlebar(view)
            | NodeDescriptor::SsdTitle(view)
            | NodeDescriptor::SsdButton(view, _) => {
                context.node = Some(tagged);
                context.view = Some(view);
                context.kind = match self.ssd_resize_context(view, x, y) {
                    Some(edges) => ContextKind::Resize(edges),
                    None => match descriptor {
                        NodeDescriptor::SsdTitlebar(_) => ContextKind::Titlebar,
                        NodeDescriptor::SsdTitle(_) => ContextKind::Title,
                        NodeDescriptor::SsdButton(_, button) => ContextKind::Button(button),
                        _ => ContextKind::None,
                    },
                };
            }
            NodeDescriptor::Unmanaged => context.kind = ContextKind::Unmanaged,
        }
        context
    }

    /// Which border/corner of the view's decoration the point falls on,
    /// if any. Corner zones extend one titlebar-height into each edge.
    fn ssd_resize_context(&self, view: ViewId, x: f64, y: f64) -> Option<ResizeEdge> {
        let view = self.views.get(view).ok()?;
        let ssd = view.ssd?;
        let inner = view.current;
        let outer = inner.grow(&ssd.thickness);
        if !outer.contains(x, y) {
            return None;
        }

        let mut edges = ResizeEdge::empty();
        if x < inner.x as f64 {
            edges |= ResizeEdge::LEFT;
        } else if x >= inner.right() as f64 {
            edges |= ResizeEdge::RIGHT;
        }
        if y < inner.y as f64 {
            edges |= ResizeEdge::TOP;
        } else if y >= inner.bottom() as f64 {
            edges |= ResizeEdge::BOTTOM;
        }
        if edges.is_empty() {
            return None;
        }

        let corner = ssd.titlebar_height.max(1) as f64;
        if edges.intersects(ResizeEdge::LEFT | ResizeEdge::RIGHT) {
            if y < outer.y as f64 + corner {
                edges |= ResizeEdge::TOP;
            } else if y >= outer.bottom() as f64 - corner {
                edges |= ResizeEdge::BOTTOM;
            }
        }
        if edges.intersects(ResizeEdge::TOP | ResizeEdge::BOTTOM) {
            if x < outer.x as f64 + corner {
                edges |= ResizeEdge::LEFT;
            } else if x >= outer.right() as f64 - corner {
                edges |= ResizeEdge::RIGHT;
            }
        }
        Some(edges)
    }
}

/// Some clients (notably Qt) round fractional cursor coordinates in the
/// rightmost/bottom pixel up and out of the surface. Until toolkits are
/// fractional-pixel clean, clamp surface coordinates to (w-1, h-1).
fn avoid_edge_rounding_issues(context: &mut CursorContext, width: i32, height: i32) {
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    if context.sx > max_x && context.sx < width as f64 {
        context.sx = max_x;
    }
    if context.sy > max_y && context.sy < height as f64 {
        context.sy = max_y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LoadedConfig,
        geo::{Border, Rect},
        scene::NodeDescriptor,
        view::{Placement, Ssd, View},
        workspaces::WorkspaceId,
    };

    fn server_with_view() -> (Server, ViewId) {
        let mut server = Server::new_headless(LoadedConfig {
            path: None,
            config: Default::default(),
        });
        let mut view = View::new(Placement::Workspace(WorkspaceId(0)));
        view.ssd = Some(Ssd {
            thickness: Border::uniform(4),
            titlebar_height: 24,
        });
        let id = server.views.register(view);
        server.views.map(id).unwrap();
        server
            .views
            .move_resize(id, Rect::new(100, 100, 400, 300))
            .unwrap();
        (server, id)
    }

    #[test]
    fn root_context_when_nothing_is_hit() {
        let (mut server, _) = server_with_view();
        server.seat.pointer = (5000.0, 5000.0);
        assert_eq!(server.cursor_context().kind, ContextKind::Root);
    }

    #[test]
    fn client_surface_hit() {
        let (mut server, id) = server_with_view();
        let root = server.scene.root();
        server
            .scene
            .add_surface_node(root, Rect::new(100, 100, 400, 300), Some(NodeDescriptor::View(id)));
        server.seat.pointer = (150.0, 150.0);
        let context = server.cursor_context();
        assert_eq!(context.kind, ContextKind::Client);
        assert_eq!(context.view, Some(id));
        assert_eq!(context.sx, 50.0);
    }

    #[test]
    fn rounding_clamp_applies_in_last_pixel() {
        let (mut server, id) = server_with_view();
        let root = server.scene.root();
        server
            .scene
            .add_surface_node(root, Rect::new(100, 100, 400, 300), Some(NodeDescriptor::View(id)));
        server.seat.pointer = (100.0 + 399.5, 100.0 + 299.5);
        let context = server.cursor_context();
        assert_eq!(context.sx, 399.0);
        assert_eq!(context.sy, 299.0);
    }

    #[test]
    fn ssd_border_refines_to_resize_edges() {
        let (mut server, id) = server_with_view();
        let root = server.scene.root();
        let outer = Rect::new(100, 100, 400, 300).grow(&Border::uniform(4));
        server
            .scene
            .add_node(root, outer, Some(NodeDescriptor::SsdRoot(id)));

        // Left border, vertically centered: pure left edge.
        server.seat.pointer = (98.0, 250.0);
        assert_eq!(
            server.cursor_context().kind,
            ContextKind::Resize(ResizeEdge::LEFT)
        );

        // Bottom-right corner zone.
        server.seat.pointer = (502.0, 399.0);
        assert_eq!(
            server.cursor_context().kind,
            ContextKind::Resize(ResizeEdge::RIGHT | ResizeEdge::BOTTOM)
        );
    }

    #[test]
    fn titlebar_without_resize_edge_keeps_its_kind() {
        let (mut server, id) = server_with_view();
        let root = server.scene.root();
        server.scene.add_node(
            root,
            Rect::new(100, 100, 400, 24),
            Some(NodeDescriptor::SsdTitlebar(id)),
        );
        server.seat.pointer = (300.0, 110.0);
        assert_eq!(server.cursor_context().kind, ContextKind::Titlebar);
    }
}

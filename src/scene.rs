//! Minimal scene-node model.
//!
//! The real scene graph lives in the display-server library; the core only
//! needs node geometry, enabled state, parent links and the descriptor tag
//! stored in each node's opaque slot so the cursor context can be
//! classified. The glue mirrors its scene into this tree.

use crate::{geo::Rect, view::ViewId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Descriptor tag identifying what a scene node belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeDescriptor {
    View(ViewId),
    XdgPopup(ViewId),
    LayerSurface,
    LayerPopup,
    SessionLockSurface,
    ImePopup,
    MenuItem,
    CycleOsdItem,
    SsdRoot(ViewId),
    SsdTitlebar(ViewId),
    SsdTitle(ViewId),
    SsdButton(ViewId, SsdButton),
    /// Override-redirect X surface outside the managed tree.
    Unmanaged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SsdButton {
    Iconify,
    Maximize,
    Close,
}

#[derive(Clone, Debug)]
pub struct SceneNode {
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Absolute rectangle in layout coordinates.
    pub rect: Rect,
    pub enabled: bool,
    pub descriptor: Option<NodeDescriptor>,
    /// Present when the node carries a client surface; the size is used
    /// for the edge-rounding clamp.
    pub surface_size: Option<(i32, i32)>,
}

#[derive(Debug)]
pub struct Scene {
    nodes: Vec<SceneNode>,
    root: NodeId,
}

impl Default for Scene {
    fn default() -> Self {
        let root = SceneNode {
            parent: None,
            children: Vec::new(),
            rect: Rect::default(),
            enabled: true,
            descriptor: None,
            surface_size: None,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }
}

impl Scene {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn add_node(
        &mut self,
        parent: NodeId,
        rect: Rect,
        descriptor: Option<NodeDescriptor>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SceneNode {
            parent: Some(parent),
            children: Vec::new(),
            rect,
            enabled: true,
            descriptor,
            surface_size: None,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn add_surface_node(
        &mut self,
        parent: NodeId,
        rect: Rect,
        descriptor: Option<NodeDescriptor>,
    ) -> NodeId {
        let id = self.add_node(parent, rect, descriptor);
        self.nodes[id.0].surface_size = Some((rect.width, rect.height));
        id
    }

    pub fn get(&self, id: NodeId) -> &SceneNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut SceneNode {
        &mut self.nodes[id.0]
    }

    pub fn clear(&mut self) {
        *self = Scene::default();
    }

    /// Topmost enabled node containing the point. Later siblings render on
    /// top, so the search walks children in reverse; a node without
    /// children wins over its ancestors.
    pub fn node_at(&self, x: f64, y: f64) -> Option<NodeId> {
        self.hit(self.root, x, y)
    }

    fn hit(&self, id: NodeId, x: f64, y: f64) -> Option<NodeId> {
        let node = self.get(id);
        if !node.enabled {
            return None;
        }
        for child in node.children.iter().rev() {
            if let Some(found) = self.hit(*child, x, y) {
                return Some(found);
            }
        }
        if id != self.root && !node.rect.is_empty() && node.rect.contains(x, y) {
            return Some(id);
        }
        None
    }

    /// Walk from a node towards the root until a descriptor tag is found.
    pub fn descriptor_at(&self, id: NodeId) -> Option<(NodeId, NodeDescriptor)> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id);
            if let Some(descriptor) = node.descriptor {
                return Some((node_id, descriptor));
            }
            current = node.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_test_prefers_topmost_child() {
        let mut scene = Scene::default();
        let below = scene.add_node(scene.root(), Rect::new(0, 0, 100, 100), None);
        let above = scene.add_node(scene.root(), Rect::new(50, 0, 100, 100), None);
        assert_eq!(scene.node_at(60.0, 10.0), Some(above));
        assert_eq!(scene.node_at(10.0, 10.0), Some(below));
        assert_eq!(scene.node_at(500.0, 500.0), None);
    }

    #[test]
    fn disabled_subtrees_are_skipped() {
        let mut scene = Scene::default();
        let node = scene.add_node(scene.root(), Rect::new(0, 0, 100, 100), None);
        scene.get_mut(node).enabled = false;
        assert_eq!(scene.node_at(10.0, 10.0), None);
    }

    #[test]
    fn descriptor_walks_up_to_tagged_ancestor() {
        let mut scene = Scene::default();
        let tagged = scene.add_node(
            scene.root(),
            Rect::new(0, 0, 100, 100),
            Some(NodeDescriptor::LayerSurface),
        );
        let child = scene.add_node(tagged, Rect::new(10, 10, 10, 10), None);
        let (found, descriptor) = scene.descriptor_at(child).unwrap();
        assert_eq!(found, tagged);
        assert_eq!(descriptor, NodeDescriptor::LayerSurface);
    }
}

//! Outputs (displays) and their usable areas.

use crate::geo::Rect;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputId(pub usize);

impl OutputId {
    /// Bit for the per-view `outputs` intersection mask.
    pub fn bit(self) -> u64 {
        1u64 << (self.0 as u64 % 64)
    }
}

#[derive(Clone, Debug)]
pub struct Output {
    pub name: String,
    /// Full rectangle in layout coordinates.
    pub geometry: Rect,
    /// Geometry minus layer-shell exclusive reservations.
    pub usable: Rect,
    pub enabled: bool,
    /// Whether the layer-shell "top" layer is shown on this output.
    pub top_layer_enabled: bool,
}

impl Output {
    pub fn new(name: &str, geometry: Rect) -> Self {
        Self {
            name: name.to_owned(),
            geometry,
            usable: geometry,
            enabled: true,
            top_layer_enabled: true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.enabled && !self.geometry.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Outputs {
    list: Vec<Option<Output>>,
}

impl Outputs {
    pub fn add(&mut self, output: Output) -> OutputId {
        if let Some(slot) = self.list.iter().position(Option::is_none) {
            self.list[slot] = Some(output);
            return OutputId(slot);
        }
        self.list.push(Some(output));
        OutputId(self.list.len() - 1)
    }

    pub fn remove(&mut self, id: OutputId) -> Option<Output> {
        self.list.get_mut(id.0).and_then(Option::take)
    }

    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.list.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.list.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OutputId, &Output)> + '_ {
        self.list
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|output| (OutputId(index), output)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (OutputId, &mut Output)> + '_ {
        self.list
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|output| (OutputId(index), output)))
    }

    pub fn usable_iter(&self) -> impl Iterator<Item = (OutputId, &Output)> + '_ {
        self.iter().filter(|(_, output)| output.is_usable())
    }

    /// The output containing a layout-coordinate point.
    pub fn at(&self, x: f64, y: f64) -> Option<OutputId> {
        self.usable_iter()
            .find(|(_, output)| output.geometry.contains(x, y))
            .map(|(id, _)| id)
    }

    pub fn first_usable(&self) -> Option<OutputId> {
        self.usable_iter().next().map(|(id, _)| id)
    }
}

//! Automatic tiling.
//!
//! Arranges all tileable views on the current workspace into a per-output
//! grid. A manually resized "anchor" view keeps its geometry: only views
//! adjacent to it are re-tiled into the remaining strip, and leftover
//! space is filled proactively. Grid mode switches both refinements off
//! and snaps everything to the plain grid.

use crate::{
    config::TileDirection,
    errors::Error,
    geo::Rect,
    output::OutputId,
    server::Server,
    view::{ViewCriteria, ViewId},
};

/// Passes of the proactive space-filling loop.
const FILL_MAX_ITERATIONS: usize = 10;

/// Edge-alignment fudge used by both the adjacency test and the fill
/// pass, in pixels on top of the configured gap.
const EDGE_TOLERANCE: i32 = 5;

/// A user-resized view whose geometry tiling preserves.
#[derive(Clone, Copy, Debug)]
pub struct Anchor {
    pub view: ViewId,
    pub geometry: Rect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GridShape {
    pub cols: i32,
    pub rows: i32,
    /// The n=3 "1 left + 2 right" layout.
    pub vertical_split: bool,
}

/// Grid shape for `n` views on a full output.
pub(crate) fn choose_grid(
    n: i32,
    aspect: f64,
    prefer_vertical: bool,
    prefer_horizontal: bool,
) -> GridShape {
    let mut shape = GridShape {
        cols: 3,
        rows: (n + 2) / 3,
        vertical_split: false,
    };
    match n {
        1 => {
            shape.cols = 1;
            shape.rows = 1;
        }
        2 => {
            shape.cols = 2;
            shape.rows = 1;
        }
        3 => {
            shape.cols = 2;
            shape.rows = 2;
            if prefer_vertical && !prefer_horizontal {
                shape.vertical_split = true;
            } else if prefer_horizontal && !prefer_vertical {
                shape.vertical_split = false;
            } else {
                // Wide screens put 2 on top and 1 below; tall screens put
                // 1 left and 2 right.
                shape.vertical_split = aspect <= 1.5;
            }
        }
        4 => {
            shape.cols = 2;
            shape.rows = 2;
        }
        5 => {
            if prefer_vertical && !prefer_horizontal {
                shape.cols = 2;
                shape.rows = 3;
            } else if prefer_horizontal && !prefer_vertical {
                shape.cols = 3;
                shape.rows = 2;
            } else if aspect > 1.3 {
                shape.cols = 3;
                shape.rows = 2;
            } else {
                shape.cols = 2;
                shape.rows = 3;
            }
        }
        6 => {
            shape.cols = 3;
            shape.rows = 2;
        }
        _ => {}
    }
    shape
}

/// Grid shape for the adjacent group laid out in the strip next to the
/// anchor. Follows the plain table, flipped for tall strips so e.g. two
/// views in a left-over side strip stack vertically.
pub(crate) fn choose_strip_grid(n: i32, aspect: f64) -> GridShape {
    let mut shape = match n {
        1 => GridShape {
            cols: 1,
            rows: 1,
            vertical_split: false,
        },
        2 => GridShape {
            cols: 2,
            rows: 1,
            vertical_split: false,
        },
        3 | 4 => GridShape {
            cols: 2,
            rows: 2,
            vertical_split: false,
        },
        _ => GridShape {
            cols: 3,
            rows: (n + 2) / 3,
            vertical_split: false,
        },
    };
    if aspect < 1.0 {
        std::mem::swap(&mut shape.cols, &mut shape.rows);
    }
    shape
}

struct OutputPass {
    output: OutputId,
    usable: Rect,
    views: Vec<ViewId>,
}

impl Server {
    /// Re-run the tiling layout. Never fails: per-view commit problems are
    /// logged and skipped so the handler always returns to the loop.
    pub fn arrange_tiled(&mut self) {
        if !self.tiling_enabled {
            return;
        }
        let current = self.workspaces.current();
        let tileable = self.views.matching(ViewCriteria::Tileable, current);
        if tileable.is_empty() {
            return;
        }

        let passes: Vec<OutputPass> = self
            .outputs
            .usable_iter()
            .map(|(id, output)| OutputPass {
                output: id,
                usable: output.usable,
                views: Vec::new(),
            })
            .collect();

        for mut pass in passes {
            pass.views = tileable
                .iter()
                .copied()
                .filter(|id| {
                    self.views
                        .get(*id)
                        .is_ok_and(|view| view.output == Some(pass.output))
                })
                .collect();
            if pass.views.is_empty() {
                continue;
            }
            self.arrange_output(&pass);
        }

        if !self.tiling_grid_mode {
            self.fill_empty_space();
        }
    }

    fn arrange_output(&mut self, pass: &OutputPass) {
        let gap = self.config.gap;
        let usable = pass.usable;

        let mut prefer_vertical = false;
        let mut prefer_horizontal = false;
        for id in &pass.views {
            match self.views.get(*id).ok().and_then(|view| view.rules.tile_direction) {
                Some(TileDirection::Vertical) => prefer_vertical = true,
                Some(TileDirection::Horizontal) => prefer_horizontal = true,
                None => {}
            }
        }

        let aspect = usable.width as f64 / usable.height.max(1) as f64;

        // A manually resized view is preserved unless grid mode snaps
        // everything back to the plain grid.
        let anchor = self.active_anchor(pass);
        let mut count = pass.views.len() as i32;
        if anchor.is_some() {
            count -= 1;
        }

        if count == 0 {
            if let Some(anchor) = anchor {
                let geometry = anchor.geometry.clamp_to(&usable);
                self.commit_anchor(anchor.view, geometry);
            }
            return;
        }

        let mut shape = choose_grid(count, aspect, prefer_vertical, prefer_horizontal);
        let mut area = usable;
        let mut adjacent: Vec<ViewId> = Vec::new();

        if let Some(anchor) = anchor {
            let anchor_full = self.full_geometry(anchor.view, anchor.geometry).clamp_to(&usable);
            adjacent = self.adjacent_views(pass, anchor.view, &anchor_full);

            if !adjacent.is_empty() {
                let strip = self.remaining_strip(&usable, &anchor_full, &adjacent);
                let strip_aspect = strip.width as f64 / strip.height.max(1) as f64;
                shape = choose_strip_grid(adjacent.len() as i32, strip_aspect);
                if !strip.is_empty() {
                    area = strip;
                }
            }

            let adjusted = self.adjust_anchor_geometry(pass, anchor, &adjacent, &usable);
            self.commit_anchor(anchor.view, adjusted);
            if adjusted != anchor.geometry {
                self.anchor = Some(Anchor {
                    view: anchor.view,
                    geometry: adjusted,
                });
            }
        }

        let tiled: Vec<ViewId> = match (&anchor, adjacent.is_empty()) {
            // Only the adjacent group is re-tiled; everything else keeps
            // its geometry.
            (Some(_), false) => adjacent.clone(),
            (Some(anchor), true) => pass
                .views
                .iter()
                .copied()
                .filter(|id| *id != anchor.view)
                .collect(),
            (None, _) => pass.views.clone(),
        };

        let n = tiled.len() as i32;
        if n == 0 {
            return;
        }

        if shape.vertical_split && n == 3 && anchor.is_none() {
            self.arrange_vertical_split(&tiled, &area, gap);
        } else {
            self.arrange_grid(&tiled, &area, gap, shape, n);
        }
    }

    fn active_anchor(&self, pass: &OutputPass) -> Option<Anchor> {
        if self.tiling_grid_mode {
            return None;
        }
        let anchor = self.anchor?;
        let view = self.views.get(anchor.view).ok()?;
        let eligible = view.output == Some(pass.output)
            && view.workspace() == Some(self.workspaces.current())
            && view.mapped
            && !view.minimized
            && pass.views.contains(&anchor.view);
        eligible.then_some(anchor)
    }

    /// View geometry including SSD margins.
    fn full_geometry(&self, id: ViewId, geometry: Rect) -> Rect {
        let margin = self
            .views
            .get(id)
            .map(|view| view.ssd_thickness())
            .unwrap_or_default();
        geometry.grow(&margin)
    }

    /// Views sharing an edge with the anchor within `gap + 5`, or
    /// overlapping it on one axis.
    fn adjacent_views(&self, pass: &OutputPass, anchor: ViewId, anchor_full: &Rect) -> Vec<ViewId> {
        let tolerance = self.config.gap + EDGE_TOLERANCE;
        pass.views
            .iter()
            .copied()
            .filter(|id| *id != anchor)
            .filter(|id| {
                let Ok(view) = self.views.get(*id) else {
                    return false;
                };
                let full = view.current.grow(&view.ssd_thickness());

                let shares_horizontal = (full.y - anchor_full.bottom()).abs() <= tolerance
                    || (full.bottom() - anchor_full.y).abs() <= tolerance
                    || (full.y < anchor_full.bottom() && full.bottom() > anchor_full.y);
                let shares_vertical = (full.x - anchor_full.right()).abs() <= tolerance
                    || (full.right() - anchor_full.x).abs() <= tolerance
                    || (full.x < anchor_full.right() && full.right() > anchor_full.x);

                shares_horizontal || shares_vertical
            })
            .collect()
    }

    /// The strip the adjacent group is re-tiled into: the side of the
    /// anchor the group lies on, or the largest free strip by area when
    /// the group surrounds the anchor. The strip runs right up to the
    /// anchor edge; the grid math provides the gap.
    fn remaining_strip(&self, usable: &Rect, anchor_full: &Rect, adjacent: &[ViewId]) -> Rect {
        let gap = self.config.gap;
        let tolerance = gap + EDGE_TOLERANCE;

        let left_space = anchor_full.x - usable.x;
        let right_space = usable.right() - anchor_full.right();
        let top_space = anchor_full.y - usable.y;
        let bottom_space = usable.bottom() - anchor_full.bottom();

        let mut on_right = false;
        let mut on_left = false;
        let mut on_bottom = false;
        let mut on_top = false;
        for id in adjacent {
            let Ok(view) = self.views.get(*id) else {
                continue;
            };
            let full = view.current.grow(&view.ssd_thickness());
            if full.x >= anchor_full.right() - tolerance {
                on_right = true;
            }
            if full.right() <= anchor_full.x + tolerance {
                on_left = true;
            }
            if full.y >= anchor_full.bottom() - tolerance {
                on_bottom = true;
            }
            if full.bottom() <= anchor_full.y + tolerance {
                on_top = true;
            }
        }

        let left_strip = Rect::new(usable.x, usable.y, left_space, usable.height);
        let right_strip = Rect::new(anchor_full.right(), usable.y, right_space, usable.height);
        let top_strip = Rect::new(usable.x, usable.y, usable.width, top_space);
        let bottom_strip = Rect::new(usable.x, anchor_full.bottom(), usable.width, bottom_space);

        if on_right && !on_left {
            return right_strip;
        }
        if on_left && !on_right {
            return left_strip;
        }
        if on_bottom && !on_top {
            return bottom_strip;
        }
        if on_top && !on_bottom {
            return top_strip;
        }

        let left_area = left_space.max(0) * usable.height;
        let right_area = right_space.max(0) * usable.height;
        let top_area = top_space.max(0) * usable.width;
        let bottom_area = bottom_space.max(0) * usable.width;
        if right_area >= left_area
            && right_area >= top_area
            && right_area >= bottom_area
            && right_space > gap
        {
            right_strip
        } else if left_area >= top_area && left_area >= bottom_area && left_space > gap {
            left_strip
        } else if bottom_area >= top_area && bottom_space > gap {
            bottom_strip
        } else if top_space > gap {
            top_strip
        } else {
            *usable
        }
    }

    /// The anchor keeps its stored geometry, shrunk away from any
    /// non-adjacent view it would overlap, then expanded into free space
    /// when no adjacent view blocks that direction (horizontal first),
    /// and finally clamped to the usable area. The adjusted rectangle
    /// becomes the new stored anchor geometry.
    fn adjust_anchor_geometry(
        &self,
        pass: &OutputPass,
        anchor: Anchor,
        adjacent: &[ViewId],
        usable: &Rect,
    ) -> Rect {
        let gap = self.config.gap;
        let margin = self
            .views
            .get(anchor.view)
            .map(|view| view.ssd_thickness())
            .unwrap_or_default();
        let mut geometry = anchor.geometry;
        let full = geometry.grow(&margin);

        let empty_left = full.x - usable.x;
        let empty_right = usable.right() - full.right();
        let empty_top = full.y - usable.y;
        let empty_bottom = usable.bottom() - full.bottom();
        let has_empty_space =
            empty_left > gap || empty_right > gap || empty_top > gap || empty_bottom > gap;

        let mut adjusted = false;
        for id in &pass.views {
            if *id == anchor.view || adjacent.contains(id) {
                continue;
            }
            let Ok(other) = self.views.get(*id) else {
                continue;
            };
            let other_full = other.current.grow(&other.ssd_thickness());
            if !full.intersects(&other_full) {
                continue;
            }
            if full.x < other_full.right() && full.right() > other_full.x {
                if full.x < other_full.x {
                    geometry.width = other_full.x - full.x - margin.left - margin.right;
                } else {
                    let new_x = other_full.right() + gap;
                    geometry.x = new_x + margin.left;
                    geometry.width = full.right() - new_x - margin.left - margin.right;
                }
                adjusted = true;
            }
            if full.y < other_full.bottom() && full.bottom() > other_full.y {
                if full.y < other_full.y {
                    geometry.height = other_full.y - full.y - margin.top - margin.bottom;
                } else {
                    let new_y = other_full.bottom() + gap;
                    geometry.y = new_y + margin.top;
                    geometry.height = full.bottom() - new_y - margin.top - margin.bottom;
                }
                adjusted = true;
            }
        }

        if has_empty_space && !adjusted {
            let mut can_left = true;
            let mut can_right = true;
            let mut can_top = true;
            let mut can_bottom = true;
            for id in adjacent {
                let Ok(view) = self.views.get(*id) else {
                    continue;
                };
                let adj_full = view.current.grow(&view.ssd_thickness());
                if adj_full.right() <= full.x + gap {
                    can_left = false;
                }
                if adj_full.x >= full.right() - gap {
                    can_right = false;
                }
                if adj_full.bottom() <= full.y + gap {
                    can_top = false;
                }
                if adj_full.y >= full.bottom() - gap {
                    can_bottom = false;
                }
            }

            if can_left
                && empty_left >= empty_right
                && empty_left >= empty_top
                && empty_left >= empty_bottom
                && empty_left > gap
            {
                geometry.x = usable.x + margin.left;
                geometry.width += empty_left - margin.left - margin.right;
            } else if can_right
                && empty_right >= empty_top
                && empty_right >= empty_bottom
                && empty_right > gap
            {
                geometry.width += empty_right - margin.left - margin.right;
            } else if can_top && empty_top >= empty_bottom && empty_top > gap {
                geometry.y = usable.y + margin.top;
                geometry.height += empty_top - margin.top - margin.bottom;
            } else if can_bottom && empty_bottom > gap {
                geometry.height += empty_bottom - margin.top - margin.bottom;
            }
        }

        geometry.clamp_to(usable)
    }

    fn commit_anchor(&mut self, id: ViewId, geometry: Rect) {
        if geometry.is_empty() {
            return;
        }
        match self.views.move_resize(id, geometry) {
            Ok(()) | Err(Error::NotMapped) => {}
            Err(err) => tracing::debug!("anchor commit failed: {err}"),
        }
    }

    fn commit_tiled(&mut self, id: ViewId, geometry: Rect) {
        if geometry.is_empty() {
            tracing::debug!(?id, "skipping tile commit with degenerate geometry");
            return;
        }
        match self.views.move_resize_tiled(id, geometry) {
            Ok(()) | Err(Error::NotMapped) => {}
            Err(err) => tracing::debug!("tile commit failed: {err}"),
        }
    }

    /// The n=3 vertical split: one full-height cell on the left, two
    /// half-height cells on the right.
    fn arrange_vertical_split(&mut self, views: &[ViewId], area: &Rect, gap: i32) {
        let half_width = (area.width - 3 * gap) / 2;
        let half_height = (area.height - 3 * gap) / 2;
        for (idx, id) in views.iter().enumerate() {
            let margin = self
                .views
                .get(*id)
                .map(|view| view.ssd_thickness())
                .unwrap_or_default();
            let geometry = if idx == 0 {
                Rect::new(
                    area.x + gap + margin.left,
                    area.y + gap + margin.top,
                    half_width - margin.left - margin.right,
                    area.height - 2 * gap - margin.top - margin.bottom,
                )
            } else {
                let row = idx as i32 - 1;
                Rect::new(
                    area.x + 2 * gap + half_width + margin.left,
                    area.y + (row + 1) * gap + row * half_height + margin.top,
                    half_width - margin.left - margin.right,
                    half_height - margin.top - margin.bottom,
                )
            };
            self.commit_tiled(*id, geometry);
        }
    }

    fn arrange_grid(&mut self, views: &[ViewId], area: &Rect, gap: i32, shape: GridShape, n: i32) {
        let cols = shape.cols.max(1);
        let rows = shape.rows.max(1);
        let cell_width = (area.width - (cols + 1) * gap) / cols;
        let cell_height = (area.height - (rows + 1) * gap) / rows;
        let last_row_count = match n % cols {
            0 => cols,
            count => count,
        };

        for (idx, id) in views.iter().enumerate() {
            let idx = idx as i32;
            let col = idx % cols;
            let row = idx / cols;
            let margin = self
                .views
                .get(*id)
                .map(|view| view.ssd_thickness())
                .unwrap_or_default();

            let is_last_row = row == rows - 1;
            let last_row_incomplete = last_row_count < cols;

            let (mut width, x_pos) = if is_last_row && last_row_incomplete {
                // Fewer cells in the last row widen to fill the row.
                let width = (area.width - (last_row_count + 1) * gap) / last_row_count;
                (width, area.x + (col + 1) * gap + col * width)
            } else {
                (cell_width, area.x + (col + 1) * gap + col * cell_width)
            };
            let mut height = cell_height;

            // The last column absorbs the integer-division remainder so it
            // reaches the far edge of the area; the last row does the same
            // in height.
            let is_last_col = col == cols - 1;
            if is_last_col && !is_last_row {
                let expected_right = area.right() - gap;
                if x_pos + width < expected_right {
                    width += expected_right - (x_pos + width);
                }
            }
            let y_pos = area.y + (row + 1) * gap + row * cell_height;
            if is_last_row {
                let expected_bottom = area.bottom() - gap;
                if y_pos + height < expected_bottom {
                    height += expected_bottom - (y_pos + height);
                }
            }

            let geometry = Rect::new(
                x_pos + margin.left,
                y_pos + margin.top,
                width - margin.left - margin.right,
                height - margin.top - margin.bottom,
            );
            self.commit_tiled(*id, geometry);
        }
    }

    /// Grow views whose outer edge lines up with the occupied bounding
    /// box towards any free side of the output, a few passes until
    /// nothing moves. Views are visited in stacking order, back to front;
    /// the bounding box is updated after each expansion.
    fn fill_empty_space(&mut self) {
        let gap = self.config.gap;
        let tolerance = gap + EDGE_TOLERANCE;
        let current = self.workspaces.current();

        for _ in 0..FILL_MAX_ITERATIONS {
            let mut expanded_any = false;

            let outputs: Vec<(OutputId, Rect)> = self
                .outputs
                .usable_iter()
                .map(|(id, output)| (id, output.usable))
                .collect();
            for (output_id, usable) in outputs {
                let views: Vec<ViewId> = self
                    .views
                    .matching(ViewCriteria::Tileable, current)
                    .into_iter()
                    .filter(|id| {
                        self.views
                            .get(*id)
                            .is_ok_and(|view| view.output == Some(output_id))
                    })
                    .collect();
                if views.is_empty() {
                    continue;
                }

                let mut occupied = Rect::default();
                for id in &views {
                    let Ok(view) = self.views.get(*id) else {
                        continue;
                    };
                    occupied = occupied.union(&view.current.grow(&view.ssd_thickness()));
                }

                let mut empty_left = occupied.x - usable.x;
                let mut empty_right = usable.right() - occupied.right();
                let mut empty_top = occupied.y - usable.y;
                let mut empty_bottom = usable.bottom() - occupied.bottom();
                if empty_left <= gap && empty_right <= gap && empty_top <= gap && empty_bottom <= gap
                {
                    continue;
                }

                for id in views {
                    if self.anchor.is_some_and(|anchor| anchor.view == id) {
                        continue;
                    }
                    let Ok(view) = self.views.get(id) else {
                        continue;
                    };
                    let margin = view.ssd_thickness();
                    let full = view.current.grow(&margin);
                    let mut geometry = view.current;
                    let mut expanded = false;

                    if empty_left > gap && (full.x - occupied.x).abs() <= tolerance {
                        geometry.x = usable.x + margin.left;
                        geometry.width += empty_left - gap;
                        expanded = true;
                    }
                    if empty_right > gap
                        && (full.right() - occupied.right()).abs() <= tolerance
                    {
                        geometry.width += empty_right - gap;
                        expanded = true;
                    }
                    if empty_top > gap && (full.y - occupied.y).abs() <= tolerance {
                        geometry.y = usable.y + margin.top;
                        geometry.height += empty_top - gap;
                        expanded = true;
                    }
                    if empty_bottom > gap
                        && (full.bottom() - occupied.bottom()).abs() <= tolerance
                    {
                        geometry.height += empty_bottom - gap;
                        expanded = true;
                    }
                    if !expanded {
                        continue;
                    }

                    let geometry = geometry.clamp_to(&usable.shrink(&margin));
                    if geometry.is_empty() {
                        continue;
                    }
                    self.commit_tiled(id, geometry);
                    expanded_any = true;

                    let new_full = geometry.grow(&margin);
                    occupied = occupied.union(&new_full);
                    empty_left = occupied.x - usable.x;
                    empty_right = usable.right() - occupied.right();
                    empty_top = occupied.y - usable.y;
                    empty_bottom = usable.bottom() - occupied.bottom();
                }
            }

            if !expanded_any {
                break;
            }
        }
    }

    /// Record a user resize so the next layout run preserves it.
    pub fn note_user_resize(&mut self, view: ViewId, geometry: Rect) {
        self.anchor = Some(Anchor { view, geometry });
    }

    pub fn clear_anchor(&mut self) {
        self.anchor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_table_matches_the_layout_rules() {
        let wide = 1000.0 / 600.0;
        assert_eq!(
            choose_grid(1, wide, false, false),
            GridShape { cols: 1, rows: 1, vertical_split: false }
        );
        assert_eq!(
            choose_grid(2, wide, false, false),
            GridShape { cols: 2, rows: 1, vertical_split: false }
        );
        // Wide screen, no preference: 2 on top, 1 below.
        assert_eq!(
            choose_grid(3, wide, false, false),
            GridShape { cols: 2, rows: 2, vertical_split: false }
        );
        // Tall screen flips to the 1-left / 2-right split.
        assert!(choose_grid(3, 1.2, false, false).vertical_split);
        // Preference beats aspect.
        assert!(choose_grid(3, wide, true, false).vertical_split);
        assert!(!choose_grid(3, 1.2, false, true).vertical_split);

        assert_eq!(
            choose_grid(4, wide, false, false),
            GridShape { cols: 2, rows: 2, vertical_split: false }
        );
        assert_eq!(choose_grid(5, 1.67, false, false).cols, 3);
        assert_eq!(choose_grid(5, 1.2, false, false).cols, 2);
        assert_eq!(choose_grid(5, 1.67, true, false).cols, 2);
        assert_eq!(
            choose_grid(6, wide, false, false),
            GridShape { cols: 3, rows: 2, vertical_split: false }
        );
        assert_eq!(choose_grid(7, wide, false, false).rows, 3);
        assert_eq!(choose_grid(9, wide, false, false).rows, 3);
        assert_eq!(choose_grid(10, wide, false, false).rows, 4);
    }

    #[test]
    fn strip_grid_flips_for_tall_strips() {
        assert_eq!(
            choose_strip_grid(2, 0.8),
            GridShape { cols: 1, rows: 2, vertical_split: false }
        );
        assert_eq!(
            choose_strip_grid(2, 1.6),
            GridShape { cols: 2, rows: 1, vertical_split: false }
        );
    }
}

//! End-to-end tiling layouts on a 1000x600 output with a 10px gap and no
//! SSD margins.

use labwc::{
    config::{Config, LoadedConfig},
    geo::Rect,
    server::Server,
    view::{FocusPolicy, Placement, View, ViewId},
    workspaces::WorkspaceId,
};

const USABLE: Rect = Rect {
    x: 0,
    y: 0,
    width: 1000,
    height: 600,
};

fn server_with_output() -> Server {
    let mut config = Config::default();
    config.gap = 10;
    config.tiling_enabled = true;
    let mut server = Server::new_headless(LoadedConfig { path: None, config });
    server.add_output("HEADLESS-1", USABLE);
    server
}

fn map_view(server: &mut Server) -> ViewId {
    let mut view = View::new(Placement::Workspace(WorkspaceId(0)));
    view.wants_focus = FocusPolicy::Always;
    view.pending = Rect::new(0, 0, 640, 480);
    let id = server.views.register(view);
    server.view_mapped(id);
    id
}

fn geometry(server: &Server, id: ViewId) -> Rect {
    server.views.get(id).unwrap().current
}

fn assert_tiled_invariants(server: &Server, ids: &[ViewId]) {
    for (index, a) in ids.iter().enumerate() {
        let rect = geometry(server, *a);
        assert!(
            rect.x >= USABLE.x
                && rect.y >= USABLE.y
                && rect.right() <= USABLE.right()
                && rect.bottom() <= USABLE.bottom(),
            "view {index} escapes the usable area: {rect:?}"
        );
        for b in &ids[index + 1..] {
            let other = geometry(server, *b);
            assert!(
                !rect.intersects(&other),
                "views overlap: {rect:?} vs {other:?}"
            );
        }
    }
}

#[test]
fn two_views_split_side_by_side() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    let b = map_view(&mut server);
    server.arrange_tiled();

    assert_eq!(geometry(&server, a), Rect::new(10, 10, 485, 580));
    assert_eq!(geometry(&server, b), Rect::new(505, 10, 485, 580));
    assert_tiled_invariants(&server, &[a, b]);
}

#[test]
fn three_views_on_a_wide_screen_widen_the_last_row() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    let b = map_view(&mut server);
    let c = map_view(&mut server);
    server.arrange_tiled();

    assert_eq!(geometry(&server, a), Rect::new(10, 10, 485, 285));
    assert_eq!(geometry(&server, b), Rect::new(505, 10, 485, 285));
    assert_eq!(geometry(&server, c), Rect::new(10, 305, 980, 285));
    assert_tiled_invariants(&server, &[a, b, c]);
}

#[test]
fn anchor_keeps_its_rectangle_and_neighbors_stack_beside_it() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    let b = map_view(&mut server);
    let c = map_view(&mut server);
    server.arrange_tiled();

    // The user drags B out to the full right half.
    let resized = Rect::new(505, 10, 485, 580);
    server.views.move_resize(b, resized).unwrap();
    server.note_user_resize(b, resized);
    server.arrange_tiled();

    assert_eq!(geometry(&server, b), resized);
    assert_eq!(geometry(&server, a), Rect::new(10, 10, 485, 285));
    assert_eq!(geometry(&server, c), Rect::new(10, 305, 485, 285));
    assert_tiled_invariants(&server, &[a, b, c]);
}

#[test]
fn single_view_fills_the_usable_area_minus_gaps() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    server.arrange_tiled();
    assert_eq!(geometry(&server, a), Rect::new(10, 10, 980, 580));
}

#[test]
fn no_tileable_views_means_no_mutation() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    server.views.minimize(a, true).unwrap();
    let before = geometry(&server, a);
    server.arrange_tiled();
    assert_eq!(geometry(&server, a), before);
}

#[test]
fn anchor_filling_the_output_leaves_everything_alone() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    let full = Rect::new(0, 0, 1000, 600);
    server.views.move_resize(a, full).unwrap();
    server.note_user_resize(a, full);
    server.arrange_tiled();
    assert_eq!(geometry(&server, a), full);
}

#[test]
fn grid_mode_ignores_the_anchor() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    let b = map_view(&mut server);
    server.arrange_tiled();

    let resized = Rect::new(505, 10, 485, 580);
    server.views.move_resize(b, resized).unwrap();
    server.note_user_resize(b, resized);
    server.set_tiling_grid_mode(true);

    assert_eq!(geometry(&server, a), Rect::new(10, 10, 485, 580));
    assert_eq!(geometry(&server, b), Rect::new(505, 10, 485, 580));
}

#[test]
fn disable_then_enable_matches_a_fresh_recalculate() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    let b = map_view(&mut server);
    let c = map_view(&mut server);
    server.arrange_tiled();
    let reference: Vec<Rect> = [a, b, c]
        .iter()
        .map(|id| geometry(&server, *id))
        .collect();

    server.set_tiling_enabled(false);
    // Windows drift while stacking mode is active.
    server
        .views
        .move_resize(a, Rect::new(50, 60, 300, 200))
        .unwrap();
    server.set_tiling_enabled(true);

    let after: Vec<Rect> = [a, b, c]
        .iter()
        .map(|id| geometry(&server, *id))
        .collect();
    assert_eq!(reference, after);
}

#[test]
fn larger_counts_stay_disjoint_and_contained() {
    for n in 1..=8 {
        let mut server = server_with_output();
        let ids: Vec<ViewId> = (0..n).map(|_| map_view(&mut server)).collect();
        server.arrange_tiled();
        assert_tiled_invariants(&server, &ids);
    }
}

#[test]
fn fullscreen_and_minimized_views_are_skipped() {
    let mut server = server_with_output();
    let a = map_view(&mut server);
    let b = map_view(&mut server);
    let c = map_view(&mut server);
    server.views.minimize(c, true).unwrap();
    server
        .views
        .set_fullscreen(b, true, Some(USABLE))
        .unwrap();
    server.arrange_tiled();

    // Only `a` is tileable: it gets the whole area.
    assert_eq!(geometry(&server, a), Rect::new(10, 10, 980, 580));
    assert_eq!(geometry(&server, b), USABLE);
}

#[test]
fn tile_direction_rule_forces_the_vertical_split() {
    let mut config = Config::default();
    config.gap = 10;
    config.tiling_enabled = true;
    let mut server = Server::new_headless(LoadedConfig { path: None, config });
    server.add_output("HEADLESS-1", USABLE);

    let ids: Vec<ViewId> = (0..3)
        .map(|_| {
            let mut view = View::new(Placement::Workspace(WorkspaceId(0)));
            view.wants_focus = FocusPolicy::Always;
            view.pending = Rect::new(0, 0, 640, 480);
            view.rules.tile_direction = Some(labwc::config::TileDirection::Vertical);
            let id = server.views.register(view);
            server.views.map(id).unwrap();
            id
        })
        .collect();
    server.update_view_output_bindings();
    server.arrange_tiled();

    // 1 left + 2 right: the first view spans the full height.
    assert_eq!(geometry(&server, ids[0]), Rect::new(10, 10, 485, 580));
    assert_eq!(geometry(&server, ids[1]), Rect::new(505, 10, 485, 285));
    assert_eq!(geometry(&server, ids[2]), Rect::new(505, 305, 485, 285));
    assert_tiled_invariants(&server, &ids);
}

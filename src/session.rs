use crate::config::PlacementConfig;
use crate::placement::{Placement, SymbolLayer, Tile};
use crate::scene::Scene;
use crate::transform::Transform;
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::{debug, info};

/// Drives successive placement passes and keeps the last committed one.
#[derive(Debug)]
pub struct PlacementSession {
    config: PlacementConfig,
    current: Option<Placement>,
}

impl PlacementSession {
    pub fn new(config: PlacementConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Last committed placement, if any pass ran.
    pub fn placement(&self) -> Option<&Placement> {
        self.current.as_ref()
    }

    /// Run one full pass at `now`: place every layer (topmost first), commit,
    /// then rebuild every bucket's opacities.
    ///
    /// `tiles` is reordered: highest overscaled zoom first, so the most
    /// detailed copy of a label shared between tiles is the one placed.
    pub fn update(
        &mut self,
        transform: &Transform,
        layers: &[SymbolLayer],
        tiles: &mut [Tile],
        now: f64,
    ) -> &Placement {
        for tile in tiles.iter_mut() {
            if tile.holding_for_fade() && tile.symbol_fade_finished(now) {
                debug!(tile = %tile.tile_id, "fade hold released");
                tile.clear_fade_hold();
            }
        }
        tiles.sort_by_key(|tile| (Reverse(tile.tile_id.overscaled_z), tile.tile_id.canonical, tile.tile_id.wrap));

        let mut placement = Placement::new(transform, &self.config, self.current.take());
        for layer in layers.iter().rev() {
            let mut seen_cross_tile_ids = HashSet::new();
            for tile in tiles.iter_mut() {
                placement.place_layer_tile(
                    layer,
                    tile,
                    self.config.show_collision_boxes,
                    &mut seen_cross_tile_ids,
                );
            }
        }
        placement.commit(now);
        for layer in layers {
            placement.update_layer_opacities(layer, tiles);
        }

        info!(
            now,
            layers = layers.len(),
            tiles = tiles.len(),
            labels = placement.opacities().len(),
            "placement pass complete"
        );
        self.current.insert(placement)
    }

    /// Run every frame of `scene` in order; returns the final placement.
    pub fn run_scene(&mut self, scene: &mut Scene) -> Option<&Placement> {
        for frame in scene.frames() {
            let transform = frame.transform.unwrap_or_else(|| scene.transform.clone());
            self.update(&transform, &scene.layers, &mut scene.tiles, frame.time);
        }
        self.current.as_ref()
    }

    pub fn has_transitions(&self, now: f64) -> bool {
        self.current.as_ref().is_some_and(|p| p.has_transitions(now))
    }

    pub fn symbol_fade_change(&self, now: f64) -> f64 {
        self.current.as_ref().map_or(1.0, |p| p.symbol_fade_change(now))
    }

    /// Force the next frame to keep animating, e.g. after tiles changed.
    pub fn mark_stale(&mut self) {
        if let Some(placement) = self.current.as_mut() {
            placement.set_stale();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::tile::OverscaledTileId;

    #[test]
    fn empty_session_has_no_transitions() {
        let mut session = PlacementSession::new(PlacementConfig::default());
        assert!(session.placement().is_none());
        assert!(!session.has_transitions(0.0));
        assert_eq!(session.symbol_fade_change(0.0), 1.0);
        session.mark_stale();
        assert!(!session.has_transitions(0.0));
    }

    #[test]
    fn update_orders_tiles_by_detail() {
        let mut session = PlacementSession::new(PlacementConfig::default());
        let mut tiles = vec![
            Tile::new(OverscaledTileId::new(1, 0, 1, 1, 0)),
            Tile::new(OverscaledTileId::new(2, 0, 2, 0, 0)),
            Tile::new(OverscaledTileId::new(1, 0, 1, 0, 0)),
        ];
        session.update(&Transform::default(), &[], &mut tiles, 0.0);
        let order: Vec<String> = tiles.iter().map(|t| t.tile_id.to_string()).collect();
        assert_eq!(order, vec!["2/0/0", "1/0/0", "1/1/0"]);
    }

    #[test]
    fn finished_fade_holds_are_released() {
        let mut session = PlacementSession::new(PlacementConfig::default());
        let mut tiles = vec![Tile::new(OverscaledTileId::new(0, 0, 0, 0, 0))];
        tiles[0].set_hold_duration(0.0, 300.0);
        session.update(&Transform::default(), &[], &mut tiles, 100.0);
        assert!(tiles[0].holding_for_fade());
        session.update(&Transform::default(), &[], &mut tiles, 400.0);
        assert!(!tiles[0].holding_for_fade());
    }

    #[test]
    fn successive_updates_keep_one_previous_placement() {
        let mut session = PlacementSession::new(PlacementConfig::default());
        let mut tiles = Vec::new();
        session.update(&Transform::default(), &[], &mut tiles, 0.0);
        session.update(&Transform::default(), &[], &mut tiles, 16.0);
        let placement = session.update(&Transform::default(), &[], &mut tiles, 32.0);
        assert_eq!(placement.commit_time(), 32.0);
        let prev = placement.prev_placement().expect("previous pass retained");
        assert_eq!(prev.commit_time(), 16.0);
        assert!(prev.prev_placement().is_none());
    }
}

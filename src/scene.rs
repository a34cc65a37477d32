// Scene files: a camera, the symbol layers, their tiles, and the frame
// times at which placement runs.

use crate::config::parse_lenient;
use crate::error::PlacementError;
use crate::placement::{CrossTileId, SymbolLayer, Tile, UNUSED_CROSS_TILE_ID};
use crate::transform::Transform;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Milliseconds on the placement clock.
    pub time: f64,
    /// Camera for this frame; the scene transform when absent.
    #[serde(default)]
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default)]
    pub transform: Transform,
    /// Bottom to top, in draw order.
    pub layers: Vec<SymbolLayer>,
    #[serde(default)]
    pub tiles: Vec<Tile>,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

impl Scene {
    /// Parse and validate a scene from JSON or JSON5 text.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let scene: Scene = parse_lenient(contents)?;
        scene.validate()?;
        Ok(scene)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Frames to run; a scene without frames runs once at time 0.
    pub fn frames(&self) -> Vec<Frame> {
        if self.frames.is_empty() {
            return vec![Frame {
                time: 0.0,
                transform: None,
            }];
        }
        self.frames.clone()
    }

    /// Override the viewport size of the scene camera and every frame camera.
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.transform.width = width;
        self.transform.height = height;
        for transform in self.frames.iter_mut().filter_map(|f| f.transform.as_mut()) {
            transform.width = width;
            transform.height = height;
        }
    }

    pub fn validate(&self) -> Result<(), PlacementError> {
        let layer_ids: HashSet<&str> = self.layers.iter().map(|l| l.id.as_str()).collect();
        let mut bucket_ids = HashSet::new();

        for tile in &self.tiles {
            let records = tile.collision_box_array.len();
            for bucket in &tile.buckets {
                let bucket_id = bucket.bucket_instance_id;
                if bucket_id == 0 {
                    return Err(PlacementError::ZeroBucketInstanceId { tile: tile.tile_id });
                }
                if !bucket_ids.insert(bucket_id) {
                    return Err(PlacementError::DuplicateBucketInstanceId(bucket_id));
                }
                if bucket.layer_ids.is_empty() {
                    return Err(PlacementError::BucketWithoutLayers {
                        tile: tile.tile_id,
                        bucket: bucket_id,
                    });
                }
                if let Some(unknown) = bucket
                    .layer_ids
                    .iter()
                    .find(|id| !layer_ids.contains(id.as_str()))
                {
                    return Err(PlacementError::UnknownLayer {
                        tile: tile.tile_id,
                        bucket: bucket_id,
                        layer: unknown.clone(),
                    });
                }

                let mut cross_tile_ids: HashSet<CrossTileId> = HashSet::new();
                for (symbol, instance) in bucket.symbol_instances.iter().enumerate() {
                    if instance.cross_tile_id == UNUSED_CROSS_TILE_ID {
                        return Err(PlacementError::ZeroCrossTileId {
                            tile: tile.tile_id,
                            bucket: bucket_id,
                            symbol,
                        });
                    }
                    if !cross_tile_ids.insert(instance.cross_tile_id) {
                        return Err(PlacementError::DuplicateCrossTileId(instance.cross_tile_id));
                    }
                    for range in [instance.text_box, instance.vertical_text_box, instance.icon_box] {
                        if range.start > range.end || range.end > records {
                            return Err(PlacementError::CollisionRangeOutOfBounds {
                                tile: tile.tile_id,
                                bucket: bucket_id,
                                symbol,
                                start: range.start,
                                end: range.end,
                                len: records,
                            });
                        }
                    }

                    let text_indexes = instance
                        .horizontal_text_symbol_indexes()
                        .into_iter()
                        .chain([instance.vertical_placed_text_symbol_index])
                        .flatten()
                        .map(|index| (index, bucket.text.placed_symbols.len()));
                    let icon_indexes = instance
                        .placed_icon_symbol_index
                        .map(|index| (index, bucket.icon.placed_symbols.len()));
                    if let Some((index, _)) = text_indexes
                        .chain(icon_indexes)
                        .find(|(index, len)| index >= len)
                    {
                        return Err(PlacementError::PlacedSymbolOutOfBounds {
                            tile: tile.tile_id,
                            bucket: bucket_id,
                            symbol,
                            index,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"{
        "transform": {"width": 400, "height": 300},
        "layers": [{"id": "poi", "layout": {"text-allow-overlap": true}}],
        "tiles": [{
            "tileId": {"overscaledZ": 0, "canonical": {"z": 0, "x": 0, "y": 0}},
            "latestFeatureIndex": {"features": [{"id": 1, "properties": {"name": "Cafe"}}]},
            "collisionBoxArray": [{"anchorPointX": 4096, "anchorPointY": 4096, "x1": -160, "y1": -40, "x2": 160, "y2": 40}],
            "buckets": [{
                "bucketInstanceId": 1,
                "layerIds": ["poi"],
                "sourceId": "places",
                "symbolInstances": [{
                    "crossTileId": 11,
                    "anchor": {"x": 4096, "y": 4096},
                    "numHorizontalGlyphVertices": 16,
                    "centerJustifiedTextSymbolIndex": 0,
                    "textBox": {"start": 0, "end": 1}
                }],
                "text": {"placedSymbols": [{}]}
            }]
        }],
        "frames": [{"time": 0}, {"time": 100, "transform": {"zoom": 0.5}}]
    }"#;

    #[test]
    fn parses_scene_with_defaults() {
        let scene = Scene::parse(SCENE).expect("scene parses");
        assert_eq!(scene.transform.width, 400.0);
        assert_eq!(scene.transform.tile_size, 512.0);
        assert!(scene.layers[0].layout.text_allow_overlap);
        let bucket = &scene.tiles[0].buckets[0];
        assert_eq!(bucket.symbol_instances[0].text_box_scale, 1.0);
        assert_eq!(scene.frames().len(), 2);
    }

    #[test]
    fn set_viewport_updates_frame_cameras() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        scene.set_viewport(800.0, 600.0);
        assert_eq!(scene.transform.width, 800.0);
        let second = scene.frames[1].transform.as_ref().expect("frame camera");
        assert_eq!(second.height, 600.0);
        assert_eq!(second.zoom, 0.5);
    }

    #[test]
    fn scene_without_frames_runs_once() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        scene.frames.clear();
        assert_eq!(
            scene.frames(),
            vec![Frame {
                time: 0.0,
                transform: None
            }]
        );
    }

    #[test]
    fn rejects_zero_cross_tile_id() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        scene.tiles[0].buckets[0].symbol_instances[0].cross_tile_id = 0;
        assert!(matches!(
            scene.validate(),
            Err(PlacementError::ZeroCrossTileId { symbol: 0, .. })
        ));
    }

    #[test]
    fn rejects_unknown_layer() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        scene.tiles[0].buckets[0].layer_ids = vec!["roads".to_string()];
        assert_eq!(
            scene.validate(),
            Err(PlacementError::UnknownLayer {
                tile: scene.tiles[0].tile_id,
                bucket: 1,
                layer: "roads".to_string(),
            })
        );
    }

    #[test]
    fn rejects_collision_range_past_array() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        scene.tiles[0].buckets[0].symbol_instances[0].icon_box.end = 3;
        assert!(matches!(
            scene.validate(),
            Err(PlacementError::CollisionRangeOutOfBounds { end: 3, len: 1, .. })
        ));
    }

    #[test]
    fn rejects_missing_placed_symbol() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        scene.tiles[0].buckets[0].symbol_instances[0].left_justified_text_symbol_index = Some(2);
        assert!(matches!(
            scene.validate(),
            Err(PlacementError::PlacedSymbolOutOfBounds { index: 2, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_bucket_ids() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        let copy = scene.tiles[0].clone();
        scene.tiles.push(copy);
        assert_eq!(scene.validate(), Err(PlacementError::DuplicateBucketInstanceId(1)));
    }

    #[test]
    fn accepts_json5() {
        let scene = Scene::parse("{layers: [{id: 'a'}], /* no tiles yet */ }").expect("json5 scene");
        assert!(scene.tiles.is_empty());
    }
}

use super::anchor::{Justification, TextAnchor, TextOffset, WritingMode, anchor_justification};
use crate::transform::Point;
use serde::{Deserialize, Serialize};

/// Label identity stable across tiles and zoom levels.
pub type CrossTileId = u64;

/// Marks a pre-rendered text variant that is not live in the current pass.
pub const UNUSED_CROSS_TILE_ID: CrossTileId = 0;

/// One record of a tile's shared collision geometry. Records with a zero
/// radius are boxes; the rest are circles along a line label.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollisionBoxRecord {
    pub anchor_point_x: f32,
    pub anchor_point_y: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub radius: f32,
    pub feature_index: u32,
}

/// Box in tile units relative to its anchor point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionBox {
    pub anchor_point_x: f32,
    pub anchor_point_y: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl CollisionBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<&CollisionBoxRecord> for CollisionBox {
    fn from(record: &CollisionBoxRecord) -> Self {
        Self {
            anchor_point_x: record.anchor_point_x,
            anchor_point_y: record.anchor_point_y,
            x1: record.x1,
            y1: record.y1,
            x2: record.x2,
            y2: record.y2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionCircle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Set by the last placement attempt: whether the circle fell inside the grid.
    pub used: bool,
}

/// Collision geometry of one symbol instance, unpacked from the tile array.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollisionArrays {
    pub text_box: Option<CollisionBox>,
    pub vertical_text_box: Option<CollisionBox>,
    pub icon_box: Option<CollisionBox>,
    pub text_circles: Vec<CollisionCircle>,
    pub text_feature_index: u32,
    pub vertical_text_feature_index: u32,
    pub icon_feature_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

fn default_text_box_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInstance {
    pub cross_tile_id: CrossTileId,
    /// Anchor in tile units.
    pub anchor: Point,
    #[serde(default)]
    pub feature_index: u32,
    #[serde(default)]
    pub num_horizontal_glyph_vertices: usize,
    #[serde(default)]
    pub num_vertical_glyph_vertices: usize,
    #[serde(default)]
    pub num_icon_vertices: usize,
    #[serde(default)]
    pub right_justified_text_symbol_index: Option<usize>,
    #[serde(default)]
    pub center_justified_text_symbol_index: Option<usize>,
    #[serde(default)]
    pub left_justified_text_symbol_index: Option<usize>,
    #[serde(default)]
    pub vertical_placed_text_symbol_index: Option<usize>,
    #[serde(default)]
    pub placed_icon_symbol_index: Option<usize>,
    #[serde(default)]
    pub text_offset: TextOffset,
    #[serde(default = "default_text_box_scale")]
    pub text_box_scale: f32,
    #[serde(default)]
    pub text_box: IndexRange,
    #[serde(default)]
    pub vertical_text_box: IndexRange,
    #[serde(default)]
    pub icon_box: IndexRange,
}

impl SymbolInstance {
    pub fn has_text(&self) -> bool {
        self.num_horizontal_glyph_vertices > 0 || self.num_vertical_glyph_vertices > 0
    }

    pub fn has_icon(&self) -> bool {
        self.num_icon_vertices > 0
    }

    pub fn horizontal_text_symbol_indexes(&self) -> [Option<usize>; 3] {
        [
            self.right_justified_text_symbol_index,
            self.center_justified_text_symbol_index,
            self.left_justified_text_symbol_index,
        ]
    }
}

/// Per-variant render state of a pre-shaped text or icon.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacedSymbol {
    pub cross_tile_id: CrossTileId,
    pub hidden: bool,
    pub placed_orientation: Option<WritingMode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolBuffers {
    #[serde(default)]
    pub placed_symbols: Vec<PlacedSymbol>,
    /// One packed opacity per glyph quad, rebuilt on every opacity update.
    #[serde(skip)]
    pub opacity_vertices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionVertex {
    pub placed: bool,
    pub not_used: bool,
    pub shift: Point,
}

/// Debug overlay vertices, four per collision box or circle.
#[derive(Debug, Clone, Default)]
pub struct CollisionDebugArrays {
    pub text_box: Vec<CollisionVertex>,
    pub icon_box: Vec<CollisionVertex>,
    pub text_circle: Vec<CollisionVertex>,
}

impl CollisionDebugArrays {
    pub fn clear(&mut self) {
        self.text_box.clear();
        self.icon_box.clear();
        self.text_circle.clear();
    }
}

pub(crate) fn push_collision_quad(
    vertices: &mut Vec<CollisionVertex>,
    placed: bool,
    not_used: bool,
    shift: Point,
) {
    let vertex = CollisionVertex {
        placed,
        not_used,
        shift,
    };
    vertices.extend(std::iter::repeat_n(vertex, 4));
}

fn default_writing_modes() -> Vec<WritingMode> {
    vec![WritingMode::Horizontal]
}

/// Symbol data of one layer group within one tile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolBucket {
    pub bucket_instance_id: u32,
    /// Layers sharing this bucket; the first one drives placement.
    pub layer_ids: Vec<String>,
    pub source_id: String,
    #[serde(default)]
    pub source_layer_index: u32,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub allow_vertical_placement: bool,
    #[serde(default = "default_writing_modes")]
    pub writing_modes: Vec<WritingMode>,
    pub symbol_instances: Vec<SymbolInstance>,
    #[serde(default)]
    pub text: SymbolBuffers,
    #[serde(default)]
    pub icon: SymbolBuffers,
    #[serde(default)]
    pub just_reloaded: bool,
    #[serde(skip)]
    pub collision_arrays: Option<Vec<CollisionArrays>>,
    #[serde(skip)]
    pub collision_debug: Option<CollisionDebugArrays>,
    #[serde(skip)]
    pub feature_sort_order: Option<Vec<u32>>,
}

impl SymbolBucket {
    pub fn is_primary_layer(&self, layer_id: &str) -> bool {
        self.layer_ids.first().map(String::as_str) == Some(layer_id)
    }

    pub fn has_text_data(&self) -> bool {
        !self.text.placed_symbols.is_empty()
    }

    pub fn has_icon_data(&self) -> bool {
        !self.icon.placed_symbols.is_empty()
    }

    pub fn enable_collision_debug(&mut self) {
        if self.collision_debug.is_none() {
            self.collision_debug = Some(CollisionDebugArrays::default());
        }
    }

    /// Unpack each instance's ranges of the shared collision box array.
    pub fn deserialize_collision_boxes(&mut self, records: &[CollisionBoxRecord]) {
        let arrays = self
            .symbol_instances
            .iter()
            .map(|instance| {
                let mut arrays = CollisionArrays::default();
                for record in instance.text_box.indices().filter_map(|k| records.get(k)) {
                    if record.radius == 0.0 {
                        arrays.text_box = Some(record.into());
                    } else {
                        arrays.text_circles.push(CollisionCircle {
                            x: record.anchor_point_x,
                            y: record.anchor_point_y,
                            radius: record.radius,
                            used: true,
                        });
                    }
                    arrays.text_feature_index = record.feature_index;
                }
                for record in instance.vertical_text_box.indices().filter_map(|k| records.get(k)) {
                    arrays.vertical_text_box = Some(record.into());
                    arrays.vertical_text_feature_index = record.feature_index;
                }
                for record in instance.icon_box.indices().filter_map(|k| records.get(k)) {
                    arrays.icon_box = Some(record.into());
                    arrays.icon_feature_index = record.feature_index;
                }
                arrays
            })
            .collect();
        self.collision_arrays = Some(arrays);
    }

    /// Instance indexes ordered by rotated viewport y, ties by feature index.
    pub fn sorted_symbol_indexes(&self, angle: f32) -> Vec<usize> {
        let (sin, cos) = angle.sin_cos();
        let rotated_ys: Vec<i64> = self
            .symbol_instances
            .iter()
            .map(|s| (sin * s.anchor.x + cos * s.anchor.y).round() as i64)
            .collect();
        let mut order: Vec<usize> = (0..self.symbol_instances.len()).collect();
        order.sort_by(|&a, &b| {
            rotated_ys[a]
                .cmp(&rotated_ys[b])
                .then(self.symbol_instances[a].feature_index.cmp(&self.symbol_instances[b].feature_index))
        });
        order
    }

    /// Record draw order of features for query results.
    pub fn sort_features(&mut self, angle: f32, by_viewport_y: bool) {
        if !by_viewport_y {
            return;
        }
        let order = self
            .sorted_symbol_indexes(angle)
            .into_iter()
            .map(|i| self.symbol_instances[i].feature_index)
            .collect();
        self.feature_sort_order = Some(order);
    }

    /// Make exactly one justified variant of `instance` live.
    pub fn mark_used_justification(
        &mut self,
        anchor: TextAnchor,
        instance: &SymbolInstance,
        orientation: Option<WritingMode>,
    ) {
        let auto_index = if orientation == Some(WritingMode::Vertical) {
            instance.vertical_placed_text_symbol_index
        } else {
            match anchor_justification(anchor) {
                Justification::Left => instance.left_justified_text_symbol_index,
                Justification::Center => instance.center_justified_text_symbol_index,
                Justification::Right => instance.right_justified_text_symbol_index,
            }
        };

        let indexes = [
            instance.left_justified_text_symbol_index,
            instance.center_justified_text_symbol_index,
            instance.right_justified_text_symbol_index,
            instance.vertical_placed_text_symbol_index,
        ];
        for index in indexes.into_iter().flatten() {
            if let Some(symbol) = self.text.placed_symbols.get_mut(index) {
                symbol.cross_tile_id = match auto_index {
                    Some(auto) if auto != index => UNUSED_CROSS_TILE_ID,
                    _ => instance.cross_tile_id,
                };
            }
        }
    }

    pub fn mark_used_orientation(&mut self, orientation: WritingMode, instance: &SymbolInstance) {
        let horizontal = orientation.is_horizontal().then_some(orientation);
        let vertical = (orientation == WritingMode::Vertical).then_some(orientation);

        for index in instance.horizontal_text_symbol_indexes().into_iter().flatten() {
            if let Some(symbol) = self.text.placed_symbols.get_mut(index) {
                symbol.placed_orientation = horizontal;
            }
        }
        if let Some(symbol) = instance
            .vertical_placed_text_symbol_index
            .and_then(|index| self.text.placed_symbols.get_mut(index))
        {
            symbol.placed_orientation = vertical;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: CrossTileId, x: f32, y: f32, feature_index: u32) -> SymbolInstance {
        SymbolInstance {
            cross_tile_id: id,
            anchor: Point::new(x, y),
            feature_index,
            num_horizontal_glyph_vertices: 8,
            num_vertical_glyph_vertices: 0,
            num_icon_vertices: 0,
            right_justified_text_symbol_index: Some(0),
            center_justified_text_symbol_index: Some(1),
            left_justified_text_symbol_index: Some(2),
            vertical_placed_text_symbol_index: Some(3),
            placed_icon_symbol_index: None,
            text_offset: TextOffset::default(),
            text_box_scale: 1.0,
            text_box: IndexRange { start: 0, end: 1 },
            vertical_text_box: IndexRange::default(),
            icon_box: IndexRange::default(),
        }
    }

    fn bucket(instances: Vec<SymbolInstance>) -> SymbolBucket {
        SymbolBucket {
            bucket_instance_id: 1,
            layer_ids: vec!["labels".to_string(), "labels-copy".to_string()],
            source_id: "places".to_string(),
            source_layer_index: 0,
            index: 0,
            allow_vertical_placement: true,
            writing_modes: default_writing_modes(),
            symbol_instances: instances,
            text: SymbolBuffers {
                placed_symbols: vec![PlacedSymbol::default(); 4],
                opacity_vertices: Vec::new(),
            },
            icon: SymbolBuffers::default(),
            just_reloaded: false,
            collision_arrays: None,
            collision_debug: None,
            feature_sort_order: None,
        }
    }

    #[test]
    fn primary_layer_is_first() {
        let b = bucket(Vec::new());
        assert!(b.is_primary_layer("labels"));
        assert!(!b.is_primary_layer("labels-copy"));
    }

    #[test]
    fn deserialize_splits_boxes_and_circles() {
        let mut inst = instance(7, 0.0, 0.0, 0);
        inst.text_box = IndexRange { start: 0, end: 2 };
        inst.icon_box = IndexRange { start: 2, end: 3 };
        let mut b = bucket(vec![inst]);
        let records = [
            CollisionBoxRecord {
                x2: 10.0,
                y2: 5.0,
                feature_index: 4,
                ..Default::default()
            },
            CollisionBoxRecord {
                anchor_point_x: 3.0,
                radius: 2.0,
                feature_index: 4,
                ..Default::default()
            },
            CollisionBoxRecord {
                x2: 6.0,
                y2: 6.0,
                feature_index: 5,
                ..Default::default()
            },
        ];
        b.deserialize_collision_boxes(&records);
        let arrays = &b.collision_arrays.as_ref().unwrap()[0];
        assert_eq!(arrays.text_box.unwrap().width(), 10.0);
        assert_eq!(arrays.text_circles.len(), 1);
        assert_eq!(arrays.text_circles[0].x, 3.0);
        assert_eq!(arrays.icon_feature_index, 5);
        assert!(arrays.vertical_text_box.is_none());
    }

    #[test]
    fn sorted_indexes_by_y_then_feature() {
        let b = bucket(vec![
            instance(1, 0.0, 30.0, 0),
            instance(2, 0.0, 10.0, 2),
            instance(3, 5.0, 10.0, 1),
        ]);
        assert_eq!(b.sorted_symbol_indexes(0.0), vec![2, 1, 0]);
    }

    #[test]
    fn justification_marks_single_live_variant() {
        let inst = instance(9, 0.0, 0.0, 0);
        let mut b = bucket(vec![inst]);
        b.mark_used_justification(TextAnchor::Left, &inst, Some(WritingMode::Horizontal));
        let ids: Vec<CrossTileId> = b.text.placed_symbols.iter().map(|s| s.cross_tile_id).collect();
        assert_eq!(ids, vec![0, 0, 9, 0]);

        b.mark_used_justification(TextAnchor::Center, &inst, Some(WritingMode::Vertical));
        let ids: Vec<CrossTileId> = b.text.placed_symbols.iter().map(|s| s.cross_tile_id).collect();
        assert_eq!(ids, vec![0, 0, 0, 9]);
    }

    #[test]
    fn orientation_marks_variants() {
        let inst = instance(9, 0.0, 0.0, 0);
        let mut b = bucket(vec![inst]);
        b.mark_used_orientation(WritingMode::Vertical, &inst);
        assert_eq!(b.text.placed_symbols[0].placed_orientation, None);
        assert_eq!(b.text.placed_symbols[3].placed_orientation, Some(WritingMode::Vertical));
    }
}

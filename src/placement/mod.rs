// Symbol placement: collision resolution for one frozen camera transform,
// plus the fade state carried from one placement pass to the next.

pub mod anchor;
pub mod bucket;
pub mod collision_groups;
pub mod collision_index;
pub mod layer;
pub mod opacity;
pub mod tile;

pub use anchor::{TextAnchor, TextOffset, WritingMode};
pub use bucket::{CrossTileId, SymbolBucket, SymbolInstance, UNUSED_CROSS_TILE_ID};
pub use collision_groups::{CollisionGroup, CollisionGroups};
pub use collision_index::{Bbox, CollisionIndex, FeatureKey};
pub use layer::{SymbolLayer, SymbolLayout};
pub use opacity::{JointOpacityState, JointPlacement, OpacityState, pack_opacity};
pub use tile::{FeatureIndex, IndexedFeature, OverscaledTileId, Tile};

use crate::config::PlacementConfig;
use crate::transform::{EXTENT, Mat2d, Point, Transform, pixels_to_tile_units};
use anchor::{
    calculate_variable_layout_shift, rotate_shift, shift_variable_collision_box,
};
use bucket::{CollisionArrays, CollisionBox, CollisionBoxRecord, push_collision_quad};
use collision_index::{PlacedBox, PlacedCircles};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{debug, trace};

/// Anchor choice and geometry of a variable-anchor label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariableOffset {
    pub text_offset: TextOffset,
    pub width: f32,
    pub height: f32,
    pub anchor: TextAnchor,
    pub text_box_scale: f32,
    /// Anchor used by the previous pass, kept for animated anchor transitions.
    pub prev_anchor: Option<TextAnchor>,
}

/// Query data of a bucket, held for as long as the placement that placed it.
#[derive(Debug, Clone)]
pub struct RetainedQueryData {
    pub bucket_instance_id: u32,
    pub feature_index: Rc<FeatureIndex>,
    pub source_layer_index: u32,
    pub bucket_index: u32,
    pub tile_id: OverscaledTileId,
    pub feature_sort_order: Option<Vec<u32>>,
    pub text_label_plane_matrix: Mat2d,
    pub icon_label_plane_matrix: Mat2d,
}

/// Projection state for placing one bucket of one tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileMatrices {
    pub pos_matrix: Mat2d,
    pub text_label_plane_matrix: Mat2d,
    pub icon_label_plane_matrix: Mat2d,
    /// Screen pixels per tile unit at the tile's own zoom.
    pub text_pixel_ratio: f32,
}

/// A feature hit by a rendered-symbol query.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSymbol {
    pub tile_id: OverscaledTileId,
    pub bucket_instance_id: u32,
    pub source_layer_index: u32,
    pub feature_index: u32,
    pub feature: Option<IndexedFeature>,
}

struct BucketContext<'a> {
    layout: &'a SymbolLayout,
    matrices: TileMatrices,
    holding_for_fade: bool,
    collision_group: CollisionGroup,
    always_show_text: bool,
    always_show_icon: bool,
    rotate_with_map: bool,
    pitch_with_map: bool,
    has_icon_text_fit: bool,
}

/// Candidate anchors with the previous pass's anchor moved to the front,
/// when it is still among the configured anchors.
pub fn candidate_anchors(configured: &[TextAnchor], previous: Option<TextAnchor>) -> Vec<TextAnchor> {
    let mut anchors = configured.to_vec();
    if let Some(prev) = previous {
        if let Some(pos) = anchors.iter().position(|a| *a == prev) {
            if pos > 0 {
                anchors.remove(pos);
                anchors.insert(0, prev);
            }
        }
    }
    anchors
}

/// Combine independent text/icon outcomes according to the optional flags.
///
/// A modality that is neither optional nor absent requires the other one.
pub fn couple_text_and_icon(
    text_optional: bool,
    icon_optional: bool,
    instance: &SymbolInstance,
    place_text: bool,
    place_icon: bool,
) -> (bool, bool) {
    let icon_without_text = text_optional || !instance.has_text();
    let text_without_icon = icon_optional || !instance.has_icon();
    if !icon_without_text && !text_without_icon {
        let both = place_text && place_icon;
        (both, both)
    } else if !text_without_icon {
        (place_text && place_icon, place_icon)
    } else if !icon_without_text {
        (place_text, place_icon && place_text)
    } else {
        (place_text, place_icon)
    }
}

#[derive(Debug)]
pub struct Placement {
    transform: Transform,
    collision_index: CollisionIndex,
    placements: HashMap<CrossTileId, JointPlacement>,
    opacities: HashMap<CrossTileId, JointOpacityState>,
    variable_offsets: HashMap<CrossTileId, VariableOffset>,
    placed_orientations: HashMap<CrossTileId, WritingMode>,
    commit_time: f64,
    last_placement_change_time: Option<f64>,
    stale: bool,
    fade_duration: f64,
    retained_query_data: HashMap<u32, RetainedQueryData>,
    collision_groups: CollisionGroups,
    prev_placement: Option<Box<Placement>>,
}

impl Placement {
    /// Start a placement pass. `prev` becomes the only ancestor: its own
    /// previous placement is released.
    pub fn new(transform: &Transform, config: &PlacementConfig, prev: Option<Placement>) -> Self {
        let transform = transform.clone();
        let collision_index =
            CollisionIndex::new(&transform, config.viewport_padding, config.grid_cell_size);
        let prev_placement = prev.map(|mut prev| {
            prev.prev_placement = None;
            Box::new(prev)
        });
        Self {
            transform,
            collision_index,
            placements: HashMap::new(),
            opacities: HashMap::new(),
            variable_offsets: HashMap::new(),
            placed_orientations: HashMap::new(),
            commit_time: 0.0,
            last_placement_change_time: None,
            stale: false,
            fade_duration: config.fade_duration,
            retained_query_data: HashMap::new(),
            collision_groups: CollisionGroups::new(config.cross_source_collisions),
            prev_placement,
        }
    }

    /// Discard an unfinished pass, handing back the placement it superseded.
    pub fn abandon(self) -> Option<Placement> {
        self.prev_placement.map(|prev| *prev)
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn collision_index(&self) -> &CollisionIndex {
        &self.collision_index
    }

    pub fn prev_placement(&self) -> Option<&Placement> {
        self.prev_placement.as_deref()
    }

    pub fn placements(&self) -> &HashMap<CrossTileId, JointPlacement> {
        &self.placements
    }

    pub fn opacities(&self) -> &HashMap<CrossTileId, JointOpacityState> {
        &self.opacities
    }

    pub fn variable_offsets(&self) -> &HashMap<CrossTileId, VariableOffset> {
        &self.variable_offsets
    }

    pub fn placed_orientations(&self) -> &HashMap<CrossTileId, WritingMode> {
        &self.placed_orientations
    }

    pub fn retained_query_data(&self) -> &HashMap<u32, RetainedQueryData> {
        &self.retained_query_data
    }

    pub fn commit_time(&self) -> f64 {
        self.commit_time
    }

    pub fn last_placement_change_time(&self) -> Option<f64> {
        self.last_placement_change_time
    }

    pub fn fade_duration(&self) -> f64 {
        self.fade_duration
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn set_stale(&mut self) {
        self.stale = true;
    }

    pub fn place_layer_tile(
        &mut self,
        layer: &SymbolLayer,
        tile: &mut Tile,
        show_collision_boxes: bool,
        seen_cross_tile_ids: &mut HashSet<CrossTileId>,
    ) {
        let holding_for_fade = tile.holding_for_fade();
        let Tile {
            tile_id,
            tile_size,
            buckets,
            collision_box_array,
            latest_feature_index,
            ..
        } = tile;
        let Some(feature_index) = latest_feature_index.as_ref() else {
            return;
        };
        let Some(bucket) = buckets
            .iter_mut()
            .find(|b| b.layer_ids.iter().any(|id| *id == layer.id))
        else {
            return;
        };
        if !bucket.is_primary_layer(&layer.id) {
            return;
        }

        let layout = &layer.layout;
        let pos_matrix = self.transform.calculate_pos_matrix(&tile_id.to_unwrapped());
        let units_per_pixel =
            pixels_to_tile_units(*tile_size, tile_id.overscaled_z, 1.0, self.transform.zoom);
        let matrices = TileMatrices {
            pos_matrix,
            text_label_plane_matrix: self.transform.label_plane_matrix(
                &pos_matrix,
                layout.text_pitch_with_map(),
                layout.text_rotate_with_map(),
                units_per_pixel,
            ),
            icon_label_plane_matrix: self.transform.label_plane_matrix(
                &pos_matrix,
                layout.icon_pitch_with_map(),
                layout.icon_rotate_with_map(),
                units_per_pixel,
            ),
            text_pixel_ratio: *tile_size / EXTENT,
        };

        self.retained_query_data.insert(
            bucket.bucket_instance_id,
            RetainedQueryData {
                bucket_instance_id: bucket.bucket_instance_id,
                feature_index: Rc::clone(feature_index),
                source_layer_index: bucket.source_layer_index,
                bucket_index: bucket.index,
                tile_id: *tile_id,
                feature_sort_order: None,
                text_label_plane_matrix: matrices.text_label_plane_matrix,
                icon_label_plane_matrix: matrices.icon_label_plane_matrix,
            },
        );

        self.place_layer_bucket(
            bucket,
            layout,
            &matrices,
            show_collision_boxes,
            holding_for_fade,
            seen_cross_tile_ids,
            Some(collision_box_array.as_slice()),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn place_layer_bucket(
        &mut self,
        bucket: &mut SymbolBucket,
        layout: &SymbolLayout,
        matrices: &TileMatrices,
        show_collision_boxes: bool,
        holding_for_fade: bool,
        seen_cross_tile_ids: &mut HashSet<CrossTileId>,
        collision_box_array: Option<&[CollisionBoxRecord]>,
    ) {
        // Labels whose allow-overlap settings guarantee visibility are shown
        // even when part of them fell outside the collision grid.
        let always_show_text = layout.text_allow_overlap
            && (layout.icon_allow_overlap || !bucket.has_icon_data() || layout.icon_optional);
        let always_show_icon = layout.icon_allow_overlap
            && (layout.text_allow_overlap || !bucket.has_text_data() || layout.text_optional);

        let ctx = BucketContext {
            layout,
            matrices: *matrices,
            holding_for_fade,
            collision_group: self.collision_groups.get(&bucket.source_id),
            always_show_text,
            always_show_icon,
            rotate_with_map: layout.text_rotate_with_map(),
            pitch_with_map: layout.text_pitch_with_map(),
            has_icon_text_fit: layout.has_icon_text_fit(),
        };

        if bucket.collision_arrays.is_none() {
            if let Some(records) = collision_box_array {
                bucket.deserialize_collision_boxes(records);
            }
        }
        if show_collision_boxes {
            bucket.enable_collision_debug();
        }
        let Some(mut collision_arrays) = bucket.collision_arrays.take() else {
            bucket.just_reloaded = false;
            return;
        };

        let order: Vec<usize> = if layout.places_by_viewport_y() {
            bucket
                .sorted_symbol_indexes(self.transform.angle)
                .into_iter()
                .rev()
                .collect()
        } else {
            (0..bucket.symbol_instances.len()).collect()
        };

        let placed_before = self.collision_index.placed_count();
        for symbol_index in order {
            let instance = bucket.symbol_instances[symbol_index];
            let Some(arrays) = collision_arrays.get_mut(symbol_index) else {
                continue;
            };
            self.place_symbol(&ctx, bucket, &instance, arrays, seen_cross_tile_ids);
        }

        debug!(
            bucket = bucket.bucket_instance_id,
            source = %bucket.source_id,
            symbols = bucket.symbol_instances.len(),
            inserted = self.collision_index.placed_count() - placed_before,
            holding_for_fade,
            "placed symbol bucket"
        );

        bucket.collision_arrays = Some(collision_arrays);
        bucket.just_reloaded = false;
    }

    fn place_symbol(
        &mut self,
        ctx: &BucketContext<'_>,
        bucket: &mut SymbolBucket,
        instance: &SymbolInstance,
        arrays: &mut CollisionArrays,
        seen_cross_tile_ids: &mut HashSet<CrossTileId>,
    ) {
        let id = instance.cross_tile_id;
        if seen_cross_tile_ids.contains(&id) {
            return;
        }
        if ctx.holding_for_fade {
            // Not marked as seen: a tile at another zoom may still hold the
            // copy of this label that should be placed.
            self.placements.insert(id, JointPlacement::new(false, false, false));
            return;
        }

        let layout = ctx.layout;
        let matrices = &ctx.matrices;
        let predicate = ctx.collision_group.predicate;

        let mut shift: Option<Point> = None;
        let mut placed = PlacedBox::default();
        let mut placed_vertically = false;

        if let Some(text_box) = arrays.text_box {
            let vertical_box = if bucket.allow_vertical_placement
                && instance.num_vertical_glyph_vertices > 0
            {
                arrays.vertical_text_box
            } else {
                None
            };
            let modes = match vertical_box {
                Some(_) => bucket.writing_modes.clone(),
                None => vec![WritingMode::Horizontal],
            };
            let anchors = layout.text_variable_anchor.as_ref().map(|configured| {
                let previous = self
                    .prev_placement
                    .as_ref()
                    .and_then(|prev| prev.variable_offsets.get(&id))
                    .map(|offset| offset.anchor);
                candidate_anchors(configured, previous)
            });

            for mode in modes {
                let candidate = if mode == WritingMode::Vertical {
                    vertical_box
                } else {
                    Some(text_box)
                };
                let Some(candidate) = candidate else {
                    continue;
                };
                let (result, result_shift) = match &anchors {
                    None => (self.place_fixed_text(ctx, bucket, instance, &candidate, mode), None),
                    Some(anchors) => {
                        self.place_variable_text(ctx, bucket, instance, &candidate, mode, anchors)
                    }
                };
                placed = result;
                if placed.is_placed() {
                    shift = result_shift;
                    placed_vertically = mode == WritingMode::Vertical;
                    break;
                }
            }

            let prev_orientation =
                self.update_previous_orientation_if_not_placed(bucket, instance, placed.is_placed());

            // Unplaced variable-anchor labels keep their last position so
            // they fade out where they were.
            if anchors.is_some() && !placed.is_placed() {
                let prev_offset = self
                    .prev_placement
                    .as_ref()
                    .and_then(|prev| prev.variable_offsets.get(&id))
                    .copied();
                if let Some(prev_offset) = prev_offset {
                    self.variable_offsets.insert(id, prev_offset);
                    bucket.mark_used_justification(prev_offset.anchor, instance, Some(prev_orientation));
                }
            }
        }

        let mut place_text = placed.is_placed();
        let mut offscreen = placed.offscreen;

        let mut placed_circles: Option<PlacedCircles> = None;
        if !arrays.text_circles.is_empty() {
            let circles = self.collision_index.place_collision_circles(
                &mut arrays.text_circles,
                layout.text_allow_overlap,
                matrices.text_pixel_ratio,
                &matrices.pos_matrix,
                &matrices.text_label_plane_matrix,
                predicate,
            );
            place_text = layout.text_allow_overlap || !circles.circles.is_empty();
            offscreen = offscreen && circles.offscreen;
            placed_circles = Some(circles);
        }

        let mut place_icon = false;
        let mut placed_icon = PlacedBox::default();
        if let Some(icon_box) = arrays.icon_box {
            let icon_box = match shift {
                Some(shift) if ctx.has_icon_text_fit => shift_variable_collision_box(
                    &icon_box,
                    shift,
                    ctx.rotate_with_map,
                    ctx.pitch_with_map,
                    self.transform.angle,
                ),
                _ => icon_box,
            };
            placed_icon = self.collision_index.place_collision_box(
                &icon_box,
                layout.icon_allow_overlap,
                matrices.text_pixel_ratio,
                &matrices.pos_matrix,
                predicate,
            );
            place_icon = placed_icon.is_placed();
            offscreen = offscreen && placed_icon.offscreen;
        }

        let (place_text, place_icon) = couple_text_and_icon(
            layout.text_optional,
            layout.icon_optional,
            instance,
            place_text,
            place_icon,
        );

        assert!(id != UNUSED_CROSS_TILE_ID, "cross-tile id must be non-zero");
        assert!(bucket.bucket_instance_id != 0, "bucket instance id must be non-zero");
        let group_id = ctx.collision_group.id;

        if place_text {
            if let Some(bbox) = placed.bbox {
                let feature_index = if placed_vertically && arrays.vertical_text_feature_index != 0 {
                    arrays.vertical_text_feature_index
                } else {
                    arrays.text_feature_index
                };
                self.collision_index.insert_collision_box(
                    bbox,
                    layout.text_ignore_placement,
                    bucket.bucket_instance_id,
                    feature_index,
                    group_id,
                );
            }
            if let Some(circles) = &placed_circles {
                self.collision_index.insert_collision_circles(
                    &circles.circles,
                    layout.text_ignore_placement,
                    bucket.bucket_instance_id,
                    arrays.text_feature_index,
                    group_id,
                );
            }
        }
        if place_icon {
            if let Some(bbox) = placed_icon.bbox {
                self.collision_index.insert_collision_box(
                    bbox,
                    layout.icon_ignore_placement,
                    bucket.bucket_instance_id,
                    arrays.icon_feature_index,
                    group_id,
                );
            }
        }

        let decision = JointPlacement::new(
            place_text || ctx.always_show_text,
            place_icon || ctx.always_show_icon,
            offscreen || bucket.just_reloaded,
        );
        trace!(
            label = id,
            text = decision.text,
            icon = decision.icon,
            skip_fade = decision.skip_fade,
            "label placement"
        );
        self.placements.insert(id, decision);
        seen_cross_tile_ids.insert(id);
    }

    fn place_fixed_text(
        &mut self,
        ctx: &BucketContext<'_>,
        bucket: &mut SymbolBucket,
        instance: &SymbolInstance,
        text_box: &CollisionBox,
        orientation: WritingMode,
    ) -> PlacedBox {
        let placed = self.collision_index.place_collision_box(
            text_box,
            ctx.layout.text_allow_overlap,
            ctx.matrices.text_pixel_ratio,
            &ctx.matrices.pos_matrix,
            ctx.collision_group.predicate,
        );
        if placed.is_placed() {
            bucket.mark_used_orientation(orientation, instance);
            self.placed_orientations
                .insert(instance.cross_tile_id, orientation);
        }
        placed
    }

    /// Try each anchor without overlap, then, when the layer allows text
    /// overlap, each anchor again with overlap allowed.
    fn place_variable_text(
        &mut self,
        ctx: &BucketContext<'_>,
        bucket: &mut SymbolBucket,
        instance: &SymbolInstance,
        text_box: &CollisionBox,
        orientation: WritingMode,
        anchors: &[TextAnchor],
    ) -> (PlacedBox, Option<Point>) {
        let width = text_box.width();
        let height = text_box.height();
        let attempts = if ctx.layout.text_allow_overlap {
            anchors.len() * 2
        } else {
            anchors.len()
        };
        for i in 0..attempts {
            let anchor = anchors[i % anchors.len()];
            let allow_overlap = i >= anchors.len();
            if let Some((shift, placed)) = self.attempt_anchor_placement(
                ctx,
                bucket,
                instance,
                anchor,
                text_box,
                width,
                height,
                orientation,
                allow_overlap,
            ) {
                return (placed, Some(shift));
            }
        }
        (PlacedBox::default(), None)
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt_anchor_placement(
        &mut self,
        ctx: &BucketContext<'_>,
        bucket: &mut SymbolBucket,
        instance: &SymbolInstance,
        anchor: TextAnchor,
        text_box: &CollisionBox,
        width: f32,
        height: f32,
        orientation: WritingMode,
        allow_overlap: bool,
    ) -> Option<(Point, PlacedBox)> {
        let shift = calculate_variable_layout_shift(
            anchor,
            width,
            height,
            instance.text_offset,
            instance.text_box_scale,
        );
        let shifted = shift_variable_collision_box(
            text_box,
            shift,
            ctx.rotate_with_map,
            ctx.pitch_with_map,
            self.transform.angle,
        );
        let placed = self.collision_index.place_collision_box(
            &shifted,
            allow_overlap,
            ctx.matrices.text_pixel_ratio,
            &ctx.matrices.pos_matrix,
            ctx.collision_group.predicate,
        );
        if !placed.is_placed() {
            return None;
        }

        let id = instance.cross_tile_id;
        let prev_anchor = self.prev_placement.as_ref().and_then(|prev| {
            let offset = prev.variable_offsets.get(&id)?;
            prev.placements.get(&id).filter(|p| p.text)?;
            Some(offset.anchor)
        });
        assert!(id != UNUSED_CROSS_TILE_ID, "cross-tile id must be non-zero");
        self.variable_offsets.insert(
            id,
            VariableOffset {
                text_offset: instance.text_offset,
                width,
                height,
                anchor,
                text_box_scale: instance.text_box_scale,
                prev_anchor,
            },
        );
        bucket.mark_used_justification(anchor, instance, Some(orientation));
        if bucket.allow_vertical_placement {
            bucket.mark_used_orientation(orientation, instance);
            self.placed_orientations.insert(id, orientation);
        }
        Some((shift, placed))
    }

    fn update_previous_orientation_if_not_placed(
        &mut self,
        bucket: &mut SymbolBucket,
        instance: &SymbolInstance,
        is_placed: bool,
    ) -> WritingMode {
        if !bucket.allow_vertical_placement || is_placed {
            return WritingMode::Horizontal;
        }
        let id = instance.cross_tile_id;
        let Some(prev_orientation) = self
            .prev_placement
            .as_ref()
            .and_then(|prev| prev.placed_orientations.get(&id))
            .copied()
        else {
            return WritingMode::Horizontal;
        };
        self.placed_orientations.insert(id, prev_orientation);
        bucket.mark_used_orientation(prev_orientation, instance);
        prev_orientation
    }

    /// Freeze this pass into fade state, continuing from the previous pass.
    pub fn commit(&mut self, now: f64) {
        self.commit_time = now;
        let prev = self.prev_placement.as_deref();
        let mut placement_changed = false;

        let increment = match prev {
            Some(prev) if self.fade_duration != 0.0 => {
                ((now - prev.commit_time) / self.fade_duration) as f32
            }
            _ => 1.0,
        };

        for (id, decision) in &self.placements {
            match prev.and_then(|p| p.opacities.get(id)) {
                Some(prev_opacity) => {
                    self.opacities.insert(
                        *id,
                        JointOpacityState::new(
                            Some(prev_opacity),
                            increment,
                            decision.text,
                            decision.icon,
                            false,
                        ),
                    );
                    placement_changed = placement_changed
                        || decision.text != prev_opacity.text.placed
                        || decision.icon != prev_opacity.icon.placed;
                }
                None => {
                    self.opacities.insert(
                        *id,
                        JointOpacityState::new(
                            None,
                            increment,
                            decision.text,
                            decision.icon,
                            decision.skip_fade,
                        ),
                    );
                    placement_changed = placement_changed || decision.text || decision.icon;
                }
            }
        }

        let mut dropped = 0usize;
        if let Some(prev) = prev {
            for (id, prev_opacity) in &prev.opacities {
                if self.opacities.contains_key(id) {
                    continue;
                }
                let faded = JointOpacityState::new(Some(prev_opacity), increment, false, false, false);
                if faded.is_hidden() {
                    dropped += 1;
                } else {
                    self.opacities.insert(*id, faded);
                    placement_changed =
                        placement_changed || prev_opacity.text.placed || prev_opacity.icon.placed;
                }
            }

            let still_visible = |opacities: &HashMap<CrossTileId, JointOpacityState>, id: &CrossTileId| {
                opacities.get(id).is_some_and(|o| !o.is_hidden())
            };
            for (id, offset) in &prev.variable_offsets {
                if !self.variable_offsets.contains_key(id) && still_visible(&self.opacities, id) {
                    self.variable_offsets.insert(*id, *offset);
                }
            }
            for (id, orientation) in &prev.placed_orientations {
                if !self.placed_orientations.contains_key(id) && still_visible(&self.opacities, id) {
                    self.placed_orientations.insert(*id, *orientation);
                }
            }
        }

        if placement_changed {
            self.last_placement_change_time = Some(now);
        } else if self.last_placement_change_time.is_none() {
            self.last_placement_change_time =
                Some(prev.and_then(|p| p.last_placement_change_time).unwrap_or(now));
        }

        debug!(
            now,
            increment,
            labels = self.opacities.len(),
            dropped,
            placement_changed,
            "committed placement"
        );
    }

    /// Rebuild render attributes of every bucket of `layer` from committed state.
    pub fn update_layer_opacities(&mut self, layer: &SymbolLayer, tiles: &mut [Tile]) {
        let mut seen_cross_tile_ids = HashSet::new();
        for tile in tiles.iter_mut() {
            let Tile {
                buckets,
                collision_box_array,
                latest_feature_index,
                ..
            } = tile;
            if latest_feature_index.is_none() {
                continue;
            }
            let Some(bucket) = buckets
                .iter_mut()
                .find(|b| b.layer_ids.iter().any(|id| *id == layer.id))
            else {
                continue;
            };
            if bucket.is_primary_layer(&layer.id) {
                self.update_bucket_opacities(
                    bucket,
                    &layer.layout,
                    &mut seen_cross_tile_ids,
                    Some(collision_box_array.as_slice()),
                );
            }
        }
    }

    pub fn update_bucket_opacities(
        &mut self,
        bucket: &mut SymbolBucket,
        layout: &SymbolLayout,
        seen_cross_tile_ids: &mut HashSet<CrossTileId>,
        collision_box_array: Option<&[CollisionBoxRecord]>,
    ) {
        bucket.text.opacity_vertices.clear();
        bucket.icon.opacity_vertices.clear();
        if let Some(debug) = bucket.collision_debug.as_mut() {
            debug.clear();
        }

        let duplicate_state = JointOpacityState::new(None, 0.0, false, false, true);
        // Allow-overlap symbols can show before placement reaches them, unless
        // they depend on a paired modality that may still collide.
        let default_state = JointOpacityState::new(
            None,
            0.0,
            layout.text_allow_overlap
                && (layout.icon_allow_overlap || !bucket.has_icon_data() || layout.icon_optional),
            layout.icon_allow_overlap
                && (layout.text_allow_overlap || !bucket.has_text_data() || layout.text_optional),
            true,
        );
        let variable_placement = layout.text_variable_anchor.is_some();
        let rotate_with_map = layout.text_rotate_with_map();
        let pitch_with_map = layout.text_pitch_with_map();
        let has_icon_text_fit = layout.has_icon_text_fit();

        if bucket.collision_arrays.is_none() && bucket.collision_debug.is_some() {
            if let Some(records) = collision_box_array {
                bucket.deserialize_collision_boxes(records);
            }
        }

        for s in 0..bucket.symbol_instances.len() {
            let instance = bucket.symbol_instances[s];
            let id = instance.cross_tile_id;
            let is_duplicate = seen_cross_tile_ids.contains(&id);
            let state = if is_duplicate {
                duplicate_state
            } else {
                // Stored so the next placement fades from it.
                *self.opacities.entry(id).or_insert(default_state)
            };
            seen_cross_tile_ids.insert(id);

            if instance.has_text() {
                let packed = pack_opacity(&state.text);
                let quads = (instance.num_horizontal_glyph_vertices
                    + instance.num_vertical_glyph_vertices)
                    / 4;
                bucket
                    .text
                    .opacity_vertices
                    .extend(std::iter::repeat_n(packed, quads));

                let symbol_hidden = state.text.is_hidden();
                let placed_orientation = self.placed_orientations.get(&id).copied();
                let vertical_hidden = placed_orientation.is_some_and(WritingMode::is_horizontal);
                let horizontal_hidden = placed_orientation == Some(WritingMode::Vertical);
                for index in instance.horizontal_text_symbol_indexes().into_iter().flatten() {
                    if let Some(symbol) = bucket.text.placed_symbols.get_mut(index) {
                        symbol.hidden = symbol_hidden || horizontal_hidden;
                    }
                }
                if let Some(symbol) = instance
                    .vertical_placed_text_symbol_index
                    .and_then(|index| bucket.text.placed_symbols.get_mut(index))
                {
                    symbol.hidden = symbol_hidden || vertical_hidden;
                }

                if let Some(offset) = self.variable_offsets.get(&id) {
                    bucket.mark_used_justification(offset.anchor, &instance, placed_orientation);
                }
                // A placed orientation resets the live variant to the left one.
                if let Some(orientation) = placed_orientation {
                    bucket.mark_used_justification(TextAnchor::Left, &instance, Some(orientation));
                    bucket.mark_used_orientation(orientation, &instance);
                }
            }

            if instance.has_icon() {
                let packed = pack_opacity(&state.icon);
                bucket
                    .icon
                    .opacity_vertices
                    .extend(std::iter::repeat_n(packed, instance.num_icon_vertices / 4));
                if let Some(symbol) = instance
                    .placed_icon_symbol_index
                    .and_then(|index| bucket.icon.placed_symbols.get_mut(index))
                {
                    symbol.hidden = state.icon.is_hidden();
                }
            }

            let (Some(debug), Some(arrays)) = (
                bucket.collision_debug.as_mut(),
                bucket.collision_arrays.as_ref().and_then(|a| a.get(s)),
            ) else {
                continue;
            };

            let mut shift = Point::ZERO;
            if arrays.text_box.is_some() {
                let mut used = true;
                if variable_placement {
                    match self.variable_offsets.get(&id) {
                        // Current or last successful position, so the overlay
                        // shows where a fading label will come back.
                        Some(offset) => {
                            shift = rotate_shift(
                                calculate_variable_layout_shift(
                                    offset.anchor,
                                    offset.width,
                                    offset.height,
                                    offset.text_offset,
                                    offset.text_box_scale,
                                ),
                                rotate_with_map,
                                pitch_with_map,
                                self.transform.angle,
                            );
                        }
                        None => used = false,
                    }
                }
                push_collision_quad(
                    &mut debug.text_box,
                    state.text.placed,
                    !used || is_duplicate,
                    shift,
                );
            }

            if arrays.icon_box.is_some() {
                let icon_shift = if has_icon_text_fit { shift } else { Point::ZERO };
                push_collision_quad(&mut debug.icon_box, state.icon.placed, false, icon_shift);
            }

            for circle in &arrays.text_circles {
                push_collision_quad(
                    &mut debug.text_circle,
                    state.text.placed,
                    is_duplicate || !circle.used,
                    Point::ZERO,
                );
            }
        }

        bucket.sort_features(self.transform.angle, layout.z_order_by_viewport_y());
        if let Some(retained) = self.retained_query_data.get_mut(&bucket.bucket_instance_id) {
            retained.feature_sort_order = bucket.feature_sort_order.clone();
        }
    }

    /// Features whose placed symbols intersect a screen-space box, topmost first.
    pub fn query_rendered_symbols(&self, query: Bbox) -> Vec<RenderedSymbol> {
        let mut hits: Vec<(RenderedSymbol, usize)> = self
            .collision_index
            .query_rendered_symbols(query)
            .into_iter()
            .filter_map(|key| {
                let retained = self.retained_query_data.get(&key.bucket_instance_id)?;
                let draw_rank = retained
                    .feature_sort_order
                    .as_ref()
                    .and_then(|order| order.iter().position(|f| *f == key.feature_index))
                    .unwrap_or(0);
                let symbol = RenderedSymbol {
                    tile_id: retained.tile_id,
                    bucket_instance_id: key.bucket_instance_id,
                    source_layer_index: retained.source_layer_index,
                    feature_index: key.feature_index,
                    feature: retained.feature_index.feature(key.feature_index).cloned(),
                };
                Some((symbol, draw_rank))
            })
            .collect();
        hits.sort_by_key(|(symbol, rank)| {
            (
                Reverse(symbol.bucket_instance_id),
                Reverse(*rank),
                symbol.feature_index,
            )
        });
        hits.into_iter().map(|(symbol, _)| symbol).collect()
    }

    /// Fraction of the fade completed since commit; `1` when fading is off.
    pub fn symbol_fade_change(&self, now: f64) -> f64 {
        if self.fade_duration == 0.0 {
            1.0
        } else {
            (now - self.commit_time) / self.fade_duration
        }
    }

    pub fn has_transitions(&self, now: f64) -> bool {
        self.stale
            || self
                .last_placement_change_time
                .is_some_and(|changed| now - changed < self.fade_duration)
    }

    pub fn still_recent(&self, now: f64) -> bool {
        self.commit_time + self.fade_duration > now
    }
}

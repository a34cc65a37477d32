// Spatial acceptance structure for placed symbol geometry.
// Boxes and circles are stored in padded screen space: the grid covers the
// viewport plus `viewport_padding` pixels on every side, so labels just
// outside the viewport still reserve space and can be reported offscreen.

use super::bucket::{CollisionBox, CollisionCircle};
use super::collision_groups::GroupPredicate;
use crate::transform::{Mat2d, Point, Transform};
use std::collections::{HashMap, HashSet};

pub type Bbox = [f32; 4];

/// Identity of a feature inserted into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub bucket_instance_id: u32,
    pub feature_index: u32,
    pub collision_group_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedCircle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlacedBox {
    /// Padded screen-space box, `None` when the box could not be placed.
    pub bbox: Option<Bbox>,
    pub offscreen: bool,
}

impl PlacedBox {
    pub fn is_placed(&self) -> bool {
        self.bbox.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlacedCircles {
    pub circles: Vec<PlacedCircle>,
    pub offscreen: bool,
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Box(Bbox),
    Circle(PlacedCircle),
}

impl Shape {
    fn bounds(&self) -> Bbox {
        match *self {
            Shape::Box(b) => b,
            Shape::Circle(c) => [c.x - c.radius, c.y - c.radius, c.x + c.radius, c.y + c.radius],
        }
    }

    fn intersects(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Box(a), Shape::Box(b)) => boxes_intersect(a, b),
            (Shape::Box(b), Shape::Circle(c)) | (Shape::Circle(c), Shape::Box(b)) => {
                circle_intersects_box(c, b)
            }
            (Shape::Circle(a), Shape::Circle(b)) => {
                let dx = a.x - b.x;
                let dy = a.y - b.y;
                let r = a.radius + b.radius;
                dx * dx + dy * dy <= r * r
            }
        }
    }
}

fn boxes_intersect(a: &Bbox, b: &Bbox) -> bool {
    a[0] <= b[2] && a[1] <= b[3] && a[2] >= b[0] && a[3] >= b[1]
}

fn circle_intersects_box(c: &PlacedCircle, b: &Bbox) -> bool {
    let nearest_x = c.x.clamp(b[0], b[2]);
    let nearest_y = c.y.clamp(b[1], b[3]);
    let dx = c.x - nearest_x;
    let dy = c.y - nearest_y;
    dx * dx + dy * dy <= c.radius * c.radius
}

/// Uniform grid over entries; a shape is registered in every cell its bounds
/// touch. Cells outside `width` x `height` fold into the border cells.
#[derive(Debug, Clone)]
struct GridIndex {
    cell: f32,
    max_x: i32,
    max_y: i32,
    cells: HashMap<(i32, i32), Vec<usize>>,
    entries: Vec<(Shape, FeatureKey)>,
}

impl GridIndex {
    fn new(cell: f32, width: f32, height: f32) -> Self {
        let cell = cell.max(4.0);
        Self {
            cell,
            max_x: (width / cell).ceil().max(0.0) as i32,
            max_y: (height / cell).ceil().max(0.0) as i32,
            cells: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn cell_x(&self, x: f32) -> i32 {
        ((x / self.cell).floor() as i32).clamp(0, self.max_x)
    }

    fn cell_y(&self, y: f32) -> i32 {
        ((y / self.cell).floor() as i32).clamp(0, self.max_y)
    }

    fn cell_range(&self, bounds: &Bbox) -> (i32, i32, i32, i32) {
        (
            self.cell_x(bounds[0]),
            self.cell_y(bounds[1]),
            self.cell_x(bounds[2]),
            self.cell_y(bounds[3]),
        )
    }

    fn insert(&mut self, shape: Shape, key: FeatureKey) {
        let idx = self.entries.len();
        let (x0, y0, x1, y1) = self.cell_range(&shape.bounds());
        for ix in x0..=x1 {
            for iy in y0..=y1 {
                self.cells.entry((ix, iy)).or_default().push(idx);
            }
        }
        self.entries.push((shape, key));
    }

    /// Entries whose shape intersects `shape`, each reported once.
    fn query<'a>(&'a self, shape: &'a Shape) -> impl Iterator<Item = &'a FeatureKey> + 'a {
        let (x0, y0, x1, y1) = self.cell_range(&shape.bounds());
        let mut seen = HashSet::new();
        (x0..=x1)
            .flat_map(move |ix| (y0..=y1).map(move |iy| (ix, iy)))
            .flat_map(move |cell| {
                self.cells
                    .get(&cell)
                    .map(|v| v.as_slice())
                    .unwrap_or(&[])
                    .iter()
                    .copied()
            })
            .filter(move |idx| seen.insert(*idx))
            .filter_map(move |idx| {
                let (entry, key) = &self.entries[idx];
                entry.intersects(shape).then_some(key)
            })
    }

    fn hit_test(&self, shape: &Shape, predicate: Option<GroupPredicate>) -> bool {
        self.query(shape)
            .any(|key| predicate.is_none_or(|p| p.matches(key)))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct CollisionIndex {
    transform: Transform,
    grid: GridIndex,
    ignored_grid: GridIndex,
    viewport_padding: f32,
    screen_right_boundary: f32,
    screen_bottom_boundary: f32,
    grid_right_boundary: f32,
    grid_bottom_boundary: f32,
}

impl CollisionIndex {
    pub fn new(transform: &Transform, viewport_padding: f32, cell_size: f32) -> Self {
        let grid_right_boundary = transform.width + 2.0 * viewport_padding;
        let grid_bottom_boundary = transform.height + 2.0 * viewport_padding;
        Self {
            transform: transform.clone(),
            grid: GridIndex::new(cell_size, grid_right_boundary, grid_bottom_boundary),
            ignored_grid: GridIndex::new(cell_size, grid_right_boundary, grid_bottom_boundary),
            viewport_padding,
            screen_right_boundary: transform.width + viewport_padding,
            screen_bottom_boundary: transform.height + viewport_padding,
            grid_right_boundary,
            grid_bottom_boundary,
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn viewport_padding(&self) -> f32 {
        self.viewport_padding
    }

    /// Number of features blocking later placements.
    pub fn placed_count(&self) -> usize {
        self.grid.len()
    }

    /// Number of features recorded with ignore-placement.
    pub fn ignored_count(&self) -> usize {
        self.ignored_grid.len()
    }

    fn project_padded(&self, pos_matrix: &Mat2d, point: Point) -> Point {
        let p = pos_matrix.transform_point(point);
        Point::new(p.x + self.viewport_padding, p.y + self.viewport_padding)
    }

    pub fn place_collision_box(
        &self,
        collision_box: &CollisionBox,
        allow_overlap: bool,
        text_pixel_ratio: f32,
        pos_matrix: &Mat2d,
        predicate: Option<GroupPredicate>,
    ) -> PlacedBox {
        let anchor = self.project_padded(
            pos_matrix,
            Point::new(collision_box.anchor_point_x, collision_box.anchor_point_y),
        );
        let bbox = [
            collision_box.x1 * text_pixel_ratio + anchor.x,
            collision_box.y1 * text_pixel_ratio + anchor.y,
            collision_box.x2 * text_pixel_ratio + anchor.x,
            collision_box.y2 * text_pixel_ratio + anchor.y,
        ];

        if !self.is_inside_grid(&bbox)
            || (!allow_overlap && self.grid.hit_test(&Shape::Box(bbox), predicate))
        {
            return PlacedBox {
                bbox: None,
                offscreen: false,
            };
        }

        PlacedBox {
            bbox: Some(bbox),
            offscreen: self.is_offscreen(&bbox),
        }
    }

    /// Place the glyph circles of a line label; any collision rejects the
    /// whole label unless overlap is allowed. Circles outside the grid are
    /// flagged unused.
    pub fn place_collision_circles(
        &self,
        circles: &mut [CollisionCircle],
        allow_overlap: bool,
        text_pixel_ratio: f32,
        pos_matrix: &Mat2d,
        label_plane_matrix: &Mat2d,
        predicate: Option<GroupPredicate>,
    ) -> PlacedCircles {
        let plane_scale = label_plane_matrix.scale_factor();
        let plane_to_screen = if plane_scale > 0.0 {
            pos_matrix.scale_factor() / plane_scale
        } else {
            1.0
        };

        let mut placed = Vec::new();
        let mut collided = false;
        let mut offscreen = true;
        for circle in circles.iter_mut() {
            let center = self.project_padded(pos_matrix, Point::new(circle.x, circle.y));
            let radius = circle.radius * text_pixel_ratio * plane_to_screen;
            let shape = PlacedCircle {
                x: center.x,
                y: center.y,
                radius,
            };
            let bounds = Shape::Circle(shape).bounds();
            circle.used = self.is_inside_grid(&bounds);
            if !circle.used {
                continue;
            }
            offscreen = offscreen && self.is_offscreen(&bounds);
            if !allow_overlap && self.grid.hit_test(&Shape::Circle(shape), predicate) {
                collided = true;
            }
            placed.push(shape);
        }

        if collided && !allow_overlap {
            return PlacedCircles {
                circles: Vec::new(),
                offscreen,
            };
        }
        PlacedCircles {
            circles: placed,
            offscreen,
        }
    }

    pub fn insert_collision_box(
        &mut self,
        bbox: Bbox,
        ignore_placement: bool,
        bucket_instance_id: u32,
        feature_index: u32,
        collision_group_id: u32,
    ) {
        assert!(bucket_instance_id != 0, "bucket instance id must be non-zero");
        let key = FeatureKey {
            bucket_instance_id,
            feature_index,
            collision_group_id,
        };
        let grid = if ignore_placement {
            &mut self.ignored_grid
        } else {
            &mut self.grid
        };
        grid.insert(Shape::Box(bbox), key);
    }

    pub fn insert_collision_circles(
        &mut self,
        circles: &[PlacedCircle],
        ignore_placement: bool,
        bucket_instance_id: u32,
        feature_index: u32,
        collision_group_id: u32,
    ) {
        assert!(bucket_instance_id != 0, "bucket instance id must be non-zero");
        let key = FeatureKey {
            bucket_instance_id,
            feature_index,
            collision_group_id,
        };
        let grid = if ignore_placement {
            &mut self.ignored_grid
        } else {
            &mut self.grid
        };
        for circle in circles {
            grid.insert(Shape::Circle(*circle), key);
        }
    }

    /// Features whose placed geometry intersects an unpadded screen-space box.
    pub fn query_rendered_symbols(&self, query: Bbox) -> Vec<FeatureKey> {
        let pad = self.viewport_padding;
        let shape = Shape::Box([query[0] + pad, query[1] + pad, query[2] + pad, query[3] + pad]);
        let mut seen = HashSet::new();
        self.grid
            .query(&shape)
            .chain(self.ignored_grid.query(&shape))
            .filter(|key| seen.insert(**key))
            .copied()
            .collect()
    }

    fn is_inside_grid(&self, b: &Bbox) -> bool {
        b[2] >= 0.0 && b[0] < self.grid_right_boundary && b[3] >= 0.0 && b[1] < self.grid_bottom_boundary
    }

    fn is_offscreen(&self, b: &Bbox) -> bool {
        b[2] < self.viewport_padding
            || b[0] >= self.screen_right_boundary
            || b[3] < self.viewport_padding
            || b[1] > self.screen_bottom_boundary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::collision_groups::CollisionGroups;

    fn index() -> CollisionIndex {
        let transform = Transform {
            width: 200.0,
            height: 100.0,
            ..Transform::default()
        };
        CollisionIndex::new(&transform, 100.0, 25.0)
    }

    fn screen_box(x: f32, y: f32, w: f32, h: f32) -> CollisionBox {
        CollisionBox {
            anchor_point_x: x,
            anchor_point_y: y,
            x1: 0.0,
            y1: 0.0,
            x2: w,
            y2: h,
        }
    }

    #[test]
    fn overlapping_box_is_rejected_after_insert() {
        let mut index = index();
        let identity = Mat2d::identity();
        let first = index.place_collision_box(&screen_box(10.0, 10.0, 20.0, 10.0), false, 1.0, &identity, None);
        let bbox = first.bbox.expect("empty index accepts the first box");
        assert!(!first.offscreen);
        index.insert_collision_box(bbox, false, 1, 0, 0);

        let second = index.place_collision_box(&screen_box(15.0, 12.0, 20.0, 10.0), false, 1.0, &identity, None);
        assert!(!second.is_placed());
        let forced = index.place_collision_box(&screen_box(15.0, 12.0, 20.0, 10.0), true, 1.0, &identity, None);
        assert!(forced.is_placed());
    }

    #[test]
    fn ignored_boxes_do_not_block() {
        let mut index = index();
        let identity = Mat2d::identity();
        let placed = index.place_collision_box(&screen_box(10.0, 10.0, 20.0, 10.0), false, 1.0, &identity, None);
        index.insert_collision_box(placed.bbox.unwrap(), true, 1, 0, 0);
        let again = index.place_collision_box(&screen_box(10.0, 10.0, 20.0, 10.0), false, 1.0, &identity, None);
        assert!(again.is_placed());
        assert_eq!(index.query_rendered_symbols([0.0, 0.0, 50.0, 50.0]).len(), 1);
    }

    #[test]
    fn group_predicate_limits_collisions() {
        let mut groups = CollisionGroups::new(false);
        let a = groups.get("a");
        let b = groups.get("b");
        let mut index = index();
        let identity = Mat2d::identity();
        let placed = index.place_collision_box(&screen_box(10.0, 10.0, 20.0, 10.0), false, 1.0, &identity, a.predicate);
        index.insert_collision_box(placed.bbox.unwrap(), false, 1, 0, a.id);

        let other_source = index.place_collision_box(&screen_box(10.0, 10.0, 20.0, 10.0), false, 1.0, &identity, b.predicate);
        assert!(other_source.is_placed());
        let same_source = index.place_collision_box(&screen_box(10.0, 10.0, 20.0, 10.0), false, 1.0, &identity, a.predicate);
        assert!(!same_source.is_placed());
    }

    #[test]
    fn padding_band_is_offscreen_and_beyond_grid_is_rejected() {
        let index = index();
        let identity = Mat2d::identity();
        let in_padding = index.place_collision_box(&screen_box(-60.0, 10.0, 20.0, 10.0), false, 1.0, &identity, None);
        assert!(in_padding.is_placed());
        assert!(in_padding.offscreen);
        let beyond = index.place_collision_box(&screen_box(-500.0, 10.0, 20.0, 10.0), false, 1.0, &identity, None);
        assert!(!beyond.is_placed());
    }

    #[test]
    fn circles_collide_with_boxes() {
        let mut index = index();
        let identity = Mat2d::identity();
        let placed = index.place_collision_box(&screen_box(50.0, 50.0, 10.0, 10.0), false, 1.0, &identity, None);
        index.insert_collision_box(placed.bbox.unwrap(), false, 1, 0, 0);

        let mut hitting = [CollisionCircle {
            x: 48.0,
            y: 55.0,
            radius: 4.0,
            used: true,
        }];
        let mut missing = [CollisionCircle {
            x: 20.0,
            y: 20.0,
            radius: 4.0,
            used: true,
        }];
        let rejected = index.place_collision_circles(&mut hitting, false, 1.0, &identity, &identity, None);
        assert!(rejected.circles.is_empty());
        let accepted = index.place_collision_circles(&mut missing, false, 1.0, &identity, &identity, None);
        assert_eq!(accepted.circles.len(), 1);
        assert!(!accepted.offscreen);
    }

    #[test]
    fn colliding_circles_in_padding_band_stay_offscreen() {
        let mut index = index();
        let identity = Mat2d::identity();
        let placed = index.place_collision_box(&screen_box(-60.0, 10.0, 20.0, 10.0), false, 1.0, &identity, None);
        assert!(placed.offscreen);
        index.insert_collision_box(placed.bbox.unwrap(), false, 1, 0, 0);

        let mut circles = [CollisionCircle {
            x: -50.0,
            y: 15.0,
            radius: 4.0,
            used: true,
        }];
        let rejected = index.place_collision_circles(&mut circles, false, 1.0, &identity, &identity, None);
        assert!(rejected.circles.is_empty());
        assert!(rejected.offscreen);
    }

    #[test]
    fn oversized_boxes_touch_only_grid_cells() {
        let mut index = index();
        // 400 x 300 padded grid in 25 px cells: at most 17 x 13 cells.
        let max_cells = 17 * 13;
        index.insert_collision_box([-30_000.0, -30_000.0, 30_000.0, 30_000.0], false, 1, 0, 0);
        assert!(index.grid.cells.len() <= max_cells);

        let identity = Mat2d::identity();
        let blocked = index.place_collision_box(&screen_box(10.0, 10.0, 20.0, 10.0), false, 1.0, &identity, None);
        assert!(!blocked.is_placed());

        let hits = index.query_rendered_symbols([-50_000.0, -50_000.0, 50_000.0, 50_000.0]);
        assert_eq!(hits.len(), 1);
        assert!(index.grid.cells.len() <= max_cells);
    }
}

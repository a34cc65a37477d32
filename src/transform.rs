use crate::placement::tile::UnwrappedTileId;
use serde::{Deserialize, Serialize};

/// Tile coordinate extent: symbol geometry inside a tile spans `0..EXTENT`.
pub const EXTENT: f32 = 8192.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn rotate(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            x: cos * self.x - sin * self.y,
            y: sin * self.x + cos * self.y,
        }
    }
}

/// 2D affine matrix, column-major: `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2d {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Mat2d {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mat2d {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self {
            tx,
            ty,
            ..Self::identity()
        }
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::identity()
        }
    }

    pub fn rotation(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// `self * other`: applies `other` first, then `self`.
    pub fn multiply(&self, other: &Mat2d) -> Mat2d {
        Mat2d {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            tx: self.a * other.tx + self.c * other.ty + self.tx,
            ty: self.b * other.tx + self.d * other.ty + self.ty,
        }
    }

    pub fn transform_point(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.c * p.y + self.tx,
            y: self.b * p.x + self.d * p.y + self.ty,
        }
    }

    /// Uniform scale of the linear part (geometric mean of the axis scales).
    pub fn scale_factor(&self) -> f32 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }
}

/// Frozen camera state used by one placement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transform {
    /// Viewport width in pixels.
    pub width: f32,
    /// Viewport height in pixels.
    pub height: f32,
    pub zoom: f32,
    /// Map rotation in radians (negated bearing).
    pub angle: f32,
    /// Viewport center in normalized world coordinates (`0..1` on both axes).
    pub center: Point,
    pub tile_size: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            width: 512.0,
            height: 512.0,
            zoom: 0.0,
            angle: 0.0,
            center: Point::new(0.5, 0.5),
            tile_size: 512.0,
        }
    }
}

impl Transform {
    pub fn world_size(&self) -> f32 {
        self.tile_size * 2f32.powf(self.zoom)
    }

    /// Tile units → screen pixels for the given tile.
    pub fn calculate_pos_matrix(&self, tile: &UnwrappedTileId) -> Mat2d {
        let world_size = self.world_size();
        let tiles = 2f32.powi(tile.canonical.z as i32);
        let tile_px = world_size / tiles;
        let origin_x = (tile.canonical.x as f32 + tile.wrap as f32 * tiles) * tile_px;
        let origin_y = tile.canonical.y as f32 * tile_px;

        let screen_center = Mat2d::translation(self.width / 2.0, self.height / 2.0);
        let rotate = Mat2d::rotation(self.angle);
        let recenter = Mat2d::translation(
            origin_x - self.center.x * world_size,
            origin_y - self.center.y * world_size,
        );
        let scale = Mat2d::scaling(tile_px / EXTENT, tile_px / EXTENT);

        screen_center
            .multiply(&rotate)
            .multiply(&recenter)
            .multiply(&scale)
    }

    /// Matrix from tile units into the plane glyph offsets are laid out in.
    ///
    /// Map-pitched labels live in a map-aligned pixel plane; viewport-pitched
    /// labels live directly in screen pixels.
    pub fn label_plane_matrix(
        &self,
        pos_matrix: &Mat2d,
        pitch_with_map: bool,
        rotate_with_map: bool,
        pixels_to_tile_units: f32,
    ) -> Mat2d {
        if pitch_with_map {
            let scale = Mat2d::scaling(1.0 / pixels_to_tile_units, 1.0 / pixels_to_tile_units);
            if rotate_with_map {
                scale
            } else {
                Mat2d::rotation(self.angle).multiply(&scale)
            }
        } else {
            *pos_matrix
        }
    }
}

/// Number of tile units covering `pixel_value` screen pixels at `zoom`.
pub fn pixels_to_tile_units(tile_size: f32, overscaled_z: u8, pixel_value: f32, zoom: f32) -> f32 {
    pixel_value * (EXTENT / (tile_size * 2f32.powf(zoom - overscaled_z as f32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::tile::CanonicalTileId;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn rotate_quarter_turn() {
        let p = Point::new(1.0, 0.0).rotate(std::f32::consts::FRAC_PI_2);
        assert!(approx(p.x, 0.0));
        assert!(approx(p.y, 1.0));
    }

    #[test]
    fn multiply_applies_right_operand_first() {
        let m = Mat2d::translation(10.0, 0.0).multiply(&Mat2d::scaling(2.0, 2.0));
        let p = m.transform_point(Point::new(1.0, 1.0));
        assert!(approx(p.x, 12.0));
        assert!(approx(p.y, 2.0));
    }

    #[test]
    fn pos_matrix_maps_tile_center_to_viewport_center() {
        let transform = Transform::default();
        let tile = UnwrappedTileId {
            wrap: 0,
            canonical: CanonicalTileId { z: 0, x: 0, y: 0 },
        };
        let m = transform.calculate_pos_matrix(&tile);
        let p = m.transform_point(Point::new(EXTENT / 2.0, EXTENT / 2.0));
        assert!(approx(p.x, 256.0));
        assert!(approx(p.y, 256.0));
        assert!(approx(m.scale_factor(), 512.0 / EXTENT));
    }

    #[test]
    fn pixels_to_tile_units_at_tile_zoom() {
        assert!(approx(pixels_to_tile_units(512.0, 0, 1.0, 0.0), 16.0));
        assert!(approx(pixels_to_tile_units(512.0, 0, 1.0, 1.0), 8.0));
    }

    #[test]
    fn viewport_label_plane_is_pos_matrix() {
        let transform = Transform::default();
        let pos = Mat2d::translation(3.0, 4.0);
        assert_eq!(transform.label_plane_matrix(&pos, false, true, 16.0), pos);
    }
}

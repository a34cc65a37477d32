// Variable-anchor geometry: how a text box shifts when its anchor moves.

use super::bucket::CollisionBox;
use crate::transform::Point;
use serde::{Deserialize, Serialize};

/// Radial offsets are measured to the glyph baseline, which sits this many
/// pixels below the top of the em box.
const BASELINE_OFFSET: f32 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextAnchor {
    Center,
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritingMode {
    Horizontal,
    Vertical,
    HorizontalOnly,
}

impl WritingMode {
    pub fn is_horizontal(self) -> bool {
        matches!(self, WritingMode::Horizontal | WritingMode::HorizontalOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Justification {
    Left,
    Center,
    Right,
}

/// Alignment fractions `(horizontal, vertical)` of the anchor within the text box.
pub fn anchor_alignment(anchor: TextAnchor) -> (f32, f32) {
    let horizontal = match anchor {
        TextAnchor::Left | TextAnchor::TopLeft | TextAnchor::BottomLeft => 0.0,
        TextAnchor::Right | TextAnchor::TopRight | TextAnchor::BottomRight => 1.0,
        _ => 0.5,
    };
    let vertical = match anchor {
        TextAnchor::Top | TextAnchor::TopLeft | TextAnchor::TopRight => 0.0,
        TextAnchor::Bottom | TextAnchor::BottomLeft | TextAnchor::BottomRight => 1.0,
        _ => 0.5,
    };
    (horizontal, vertical)
}

pub fn anchor_justification(anchor: TextAnchor) -> Justification {
    match anchor {
        TextAnchor::Right | TextAnchor::TopRight | TextAnchor::BottomRight => Justification::Right,
        TextAnchor::Left | TextAnchor::TopLeft | TextAnchor::BottomLeft => Justification::Left,
        _ => Justification::Center,
    }
}

/// Configured text offset of a label, in ems.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextOffset {
    Fixed([f32; 2]),
    /// Distance from the anchor to the nearest edge of the text box.
    Radial(f32),
}

impl Default for TextOffset {
    fn default() -> Self {
        TextOffset::Fixed([0.0, 0.0])
    }
}

/// Offset pushing the text box away from its anchor for the given anchor choice.
pub fn evaluate_variable_offset(anchor: TextAnchor, offset: TextOffset) -> [f32; 2] {
    match offset {
        TextOffset::Fixed([x, y]) => from_text_offset(anchor, x.abs(), y.abs()),
        TextOffset::Radial(r) => from_radial_offset(anchor, r.max(0.0)),
    }
}

fn from_radial_offset(anchor: TextAnchor, radial: f32) -> [f32; 2] {
    let hypotenuse = radial / std::f32::consts::SQRT_2;
    let y = match anchor {
        TextAnchor::TopRight | TextAnchor::TopLeft => hypotenuse - BASELINE_OFFSET,
        TextAnchor::BottomRight | TextAnchor::BottomLeft => -hypotenuse + BASELINE_OFFSET,
        TextAnchor::Bottom => -radial + BASELINE_OFFSET,
        TextAnchor::Top => radial - BASELINE_OFFSET,
        _ => 0.0,
    };
    let x = match anchor {
        TextAnchor::TopRight | TextAnchor::BottomRight => -hypotenuse,
        TextAnchor::TopLeft | TextAnchor::BottomLeft => hypotenuse,
        TextAnchor::Left => radial,
        TextAnchor::Right => -radial,
        _ => 0.0,
    };
    [x, y]
}

fn from_text_offset(anchor: TextAnchor, offset_x: f32, offset_y: f32) -> [f32; 2] {
    let y = match anchor {
        TextAnchor::TopRight | TextAnchor::TopLeft | TextAnchor::Top => offset_y - BASELINE_OFFSET,
        TextAnchor::BottomRight | TextAnchor::BottomLeft | TextAnchor::Bottom => {
            -offset_y + BASELINE_OFFSET
        }
        _ => 0.0,
    };
    let x = match anchor {
        TextAnchor::TopRight | TextAnchor::BottomRight | TextAnchor::Right => -offset_x,
        TextAnchor::TopLeft | TextAnchor::BottomLeft | TextAnchor::Left => offset_x,
        _ => 0.0,
    };
    [x, y]
}

/// Shift of a `width` x `height` box centered on its anchor when the anchor
/// moves to `anchor`, including the configured offset.
pub fn calculate_variable_layout_shift(
    anchor: TextAnchor,
    width: f32,
    height: f32,
    text_offset: TextOffset,
    text_box_scale: f32,
) -> Point {
    let (horizontal, vertical) = anchor_alignment(anchor);
    let shift_x = -(horizontal - 0.5) * width;
    let shift_y = -(vertical - 0.5) * height;
    let offset = evaluate_variable_offset(anchor, text_offset);
    Point::new(
        shift_x + offset[0] * text_box_scale,
        shift_y + offset[1] * text_box_scale,
    )
}

/// Rotate a shift into the label plane when the label is aligned to the map.
pub fn rotate_shift(shift: Point, rotate_with_map: bool, pitch_with_map: bool, angle: f32) -> Point {
    if rotate_with_map {
        shift.rotate(if pitch_with_map { angle } else { -angle })
    } else {
        shift
    }
}

/// Collision box moved by `shift`; the anchor point stays put.
pub fn shift_variable_collision_box(
    collision_box: &CollisionBox,
    shift: Point,
    rotate_with_map: bool,
    pitch_with_map: bool,
    angle: f32,
) -> CollisionBox {
    let offset = rotate_shift(shift, rotate_with_map, pitch_with_map, angle);
    CollisionBox {
        x1: collision_box.x1 + offset.x,
        y1: collision_box.y1 + offset.y,
        x2: collision_box.x2 + offset.x,
        y2: collision_box.y2 + offset.y,
        ..*collision_box
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn alignment_and_justification() {
        assert_eq!(anchor_alignment(TextAnchor::TopLeft), (0.0, 0.0));
        assert_eq!(anchor_alignment(TextAnchor::Bottom), (0.5, 1.0));
        assert_eq!(anchor_justification(TextAnchor::BottomRight), Justification::Right);
        assert_eq!(anchor_justification(TextAnchor::Top), Justification::Center);
    }

    #[test]
    fn fixed_offset_uses_absolute_values() {
        let offset = evaluate_variable_offset(TextAnchor::TopLeft, TextOffset::Fixed([-2.0, -10.0]));
        assert_eq!(offset, [2.0, 3.0]);
        let centered = evaluate_variable_offset(TextAnchor::Center, TextOffset::Fixed([5.0, 5.0]));
        assert_eq!(centered, [0.0, 0.0]);
    }

    #[test]
    fn radial_offset_diagonal() {
        let offset = evaluate_variable_offset(TextAnchor::BottomRight, TextOffset::Radial(10.0));
        let h = 10.0 / std::f32::consts::SQRT_2;
        assert!(approx(offset[0], -h));
        assert!(approx(offset[1], -h + 7.0));
        let clamped = evaluate_variable_offset(TextAnchor::Left, TextOffset::Radial(-3.0));
        assert_eq!(clamped, [0.0, 0.0]);
    }

    #[test]
    fn left_anchor_shifts_box_right() {
        let shift = calculate_variable_layout_shift(TextAnchor::Left, 40.0, 10.0, TextOffset::default(), 1.0);
        assert!(approx(shift.x, 20.0));
        assert!(approx(shift.y, 0.0));
    }

    #[test]
    fn shifted_box_keeps_anchor_point() {
        let b = CollisionBox {
            anchor_point_x: 5.0,
            anchor_point_y: 6.0,
            x1: -10.0,
            y1: -5.0,
            x2: 10.0,
            y2: 5.0,
        };
        let shifted = shift_variable_collision_box(&b, Point::new(3.0, 0.0), false, false, 1.0);
        assert_eq!(shifted.anchor_point_x, 5.0);
        assert_eq!(shifted.x1, -7.0);
        let rotated =
            shift_variable_collision_box(&b, Point::new(3.0, 0.0), true, false, std::f32::consts::FRAC_PI_2);
        assert!(approx(rotated.y1, -8.0));
    }
}

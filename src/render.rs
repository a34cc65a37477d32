use crate::config::RenderConfig;
use crate::placement::anchor::{calculate_variable_layout_shift, shift_variable_collision_box};
use crate::placement::bucket::CollisionBox;
use crate::placement::{CrossTileId, Placement, SymbolLayer, Tile};
use crate::transform::{EXTENT, Mat2d, Point};
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

/// Debug overlay of the committed placement: one rectangle per collision box,
/// stroked by placed state and filled at the label's current opacity.
pub fn render_svg(
    placement: &Placement,
    layers: &[SymbolLayer],
    tiles: &[Tile],
    config: &RenderConfig,
) -> String {
    let transform = placement.transform();
    let width = transform.width;
    let height = transform.height;
    let mut svg = String::new();

    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">",
    ));
    svg.push_str(&format!(
        "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>",
        config.background
    ));

    for layer in layers {
        let mut drawn: HashSet<CrossTileId> = HashSet::new();
        for tile in tiles {
            let Some(bucket) = tile.bucket(&layer.id) else {
                continue;
            };
            if !bucket.is_primary_layer(&layer.id) {
                continue;
            }
            let Some(arrays) = bucket.collision_arrays.as_ref() else {
                continue;
            };
            let layout = &layer.layout;
            let pos_matrix = transform.calculate_pos_matrix(&tile.tile_id.to_unwrapped());
            let ratio = tile.tile_size / EXTENT;
            let features = tile.latest_feature_index.as_deref();

            for (instance, arrays) in bucket.symbol_instances.iter().zip(arrays) {
                let id = instance.cross_tile_id;
                if !drawn.insert(id) {
                    continue;
                }
                let opacity = placement.opacities().get(&id);
                let text_opacity = opacity.map_or(0.0, |o| o.text.opacity);
                let text_placed = opacity.is_some_and(|o| o.text.placed);

                let text_box = match placement.placed_orientations().get(&id) {
                    Some(mode) if !mode.is_horizontal() => arrays.vertical_text_box.or(arrays.text_box),
                    _ => arrays.text_box,
                };
                if let Some(text_box) = text_box {
                    let shifted = match placement.variable_offsets().get(&id) {
                        Some(offset) => shift_variable_collision_box(
                            &text_box,
                            calculate_variable_layout_shift(
                                offset.anchor,
                                offset.width,
                                offset.height,
                                offset.text_offset,
                                offset.text_box_scale,
                            ),
                            layout.text_rotate_with_map(),
                            layout.text_pitch_with_map(),
                            transform.angle,
                        ),
                        None => text_box,
                    };
                    let [x1, y1, x2, y2] = screen_box(&shifted, &pos_matrix, ratio);
                    let stroke = if text_placed {
                        &config.placed_color
                    } else {
                        &config.unplaced_color
                    };
                    svg.push_str(&format!(
                        "<rect x=\"{x1:.2}\" y=\"{y1:.2}\" width=\"{:.2}\" height=\"{:.2}\" fill=\"{}\" fill-opacity=\"{:.3}\" stroke=\"{stroke}\" stroke-width=\"1\"/>",
                        x2 - x1,
                        y2 - y1,
                        config.text_color,
                        text_opacity * 0.25,
                    ));
                    let name = features
                        .and_then(|index| index.feature(instance.feature_index))
                        .and_then(|feature| feature.properties.get("name"))
                        .and_then(|name| name.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| id.to_string());
                    svg.push_str(&format!(
                        "<text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"middle\" dominant-baseline=\"central\" font-family=\"{}\" font-size=\"{}\" fill=\"{}\" fill-opacity=\"{text_opacity:.3}\">{}</text>",
                        (x1 + x2) / 2.0,
                        (y1 + y2) / 2.0,
                        escape_xml(&config.font_family),
                        config.font_size,
                        config.text_color,
                        escape_xml(&name),
                    ));
                }

                if let Some(icon_box) = arrays.icon_box {
                    let icon_opacity = opacity.map_or(0.0, |o| o.icon.opacity);
                    let [x1, y1, x2, y2] = screen_box(&icon_box, &pos_matrix, ratio);
                    svg.push_str(&format!(
                        "<rect x=\"{x1:.2}\" y=\"{y1:.2}\" width=\"{:.2}\" height=\"{:.2}\" fill=\"{}\" fill-opacity=\"{icon_opacity:.3}\" stroke=\"{}\" stroke-dasharray=\"3 2\"/>",
                        x2 - x1,
                        y2 - y1,
                        config.icon_color,
                        config.icon_color,
                    ));
                }

                for circle in &arrays.text_circles {
                    let center = pos_matrix.transform_point(Point::new(circle.x, circle.y));
                    let stroke = if circle.used && text_placed {
                        &config.placed_color
                    } else {
                        &config.unplaced_color
                    };
                    svg.push_str(&format!(
                        "<circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"{:.2}\" fill=\"none\" stroke=\"{stroke}\" stroke-opacity=\"{:.3}\"/>",
                        center.x,
                        center.y,
                        circle.radius * ratio,
                        text_opacity.max(0.2),
                    ));
                }
            }
        }
    }

    svg.push_str("</svg>");
    svg
}

fn screen_box(collision_box: &CollisionBox, pos_matrix: &Mat2d, ratio: f32) -> [f32; 4] {
    let anchor = pos_matrix.transform_point(Point::new(
        collision_box.anchor_point_x,
        collision_box.anchor_point_y,
    ));
    [
        anchor.x + collision_box.x1 * ratio,
        anchor.y + collision_box.y1 * ratio,
        anchor.x + collision_box.x2 * ratio,
        anchor.y + collision_box.y2 * ratio,
    ]
}

pub fn write_output_svg(svg: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, svg)?;
        }
        None => {
            print!("{}", svg);
        }
    }
    Ok(())
}

#[cfg(feature = "png")]
pub fn write_output_png(svg: &str, output: &Path, render_cfg: &RenderConfig) -> Result<()> {
    let mut opt = usvg::Options::default();
    opt.font_family = render_cfg
        .font_family
        .split(',')
        .next()
        .unwrap_or("sans-serif")
        .trim()
        .to_string();
    opt.fontdb_mut().load_system_fonts();
    if let Some(size) = usvg::Size::from_wh(render_cfg.width, render_cfg.height) {
        opt.default_size = size;
    }

    let tree = usvg::Tree::from_str(svg, &opt)?;
    let size = tree.size().to_int_size();
    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| anyhow::anyhow!("Failed to allocate pixmap"))?;

    let mut pixmap_mut = pixmap.as_mut();
    resvg::render(&tree, resvg::tiny_skia::Transform::default(), &mut pixmap_mut);
    pixmap.save_png(output)?;
    Ok(())
}

#[cfg(not(feature = "png"))]
pub fn write_output_png(_svg: &str, _output: &Path, _render_cfg: &RenderConfig) -> Result<()> {
    Err(anyhow::anyhow!("PNG output requires the `png` feature"))
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacementConfig;
    use crate::scene::Scene;
    use crate::session::PlacementSession;

    const SCENE: &str = r#"{
        "layers": [{"id": "poi"}],
        "tiles": [{
            "tileId": {"overscaledZ": 0, "canonical": {"z": 0, "x": 0, "y": 0}},
            "latestFeatureIndex": {"features": [{"properties": {"name": "Fish & Chips"}}]},
            "collisionBoxArray": [{"anchorPointX": 4096, "anchorPointY": 4096, "x1": -320, "y1": -80, "x2": 320, "y2": 80}],
            "buckets": [{
                "bucketInstanceId": 3,
                "layerIds": ["poi"],
                "sourceId": "places",
                "symbolInstances": [{
                    "crossTileId": 5,
                    "anchor": {"x": 4096, "y": 4096},
                    "numHorizontalGlyphVertices": 4,
                    "centerJustifiedTextSymbolIndex": 0,
                    "textBox": {"start": 0, "end": 1}
                }],
                "text": {"placedSymbols": [{}]}
            }]
        }]
    }"#;

    #[test]
    fn renders_placed_label_box() {
        let mut scene = Scene::parse(SCENE).expect("scene parses");
        let mut session = PlacementSession::new(PlacementConfig::default());
        let placement = session.run_scene(&mut scene).expect("one frame ran");
        let svg = render_svg(placement, &scene.layers, &scene.tiles, &RenderConfig::default());

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        // 40x10 px box centered on the viewport.
        assert!(svg.contains("x=\"236.00\" y=\"251.00\" width=\"40.00\" height=\"10.00\""));
        assert!(svg.contains(&RenderConfig::default().placed_color));
        assert!(svg.contains("Fish &amp; Chips"));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_xml("<a href='x'>"), "&lt;a href=&apos;x&apos;&gt;");
    }
}

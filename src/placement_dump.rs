use crate::placement::{CrossTileId, Placement, TextAnchor, WritingMode};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDump {
    pub commit_time: f64,
    pub fade_duration: f64,
    pub last_placement_change_time: Option<f64>,
    pub stale: bool,
    pub labels: Vec<LabelDump>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDump {
    pub id: CrossTileId,
    pub text_opacity: f32,
    pub text_placed: bool,
    pub icon_opacity: f32,
    pub icon_placed: bool,
    /// Whether this pass made a decision for the label; `false` for labels
    /// only kept alive by their fade-out.
    pub decided: bool,
    pub skip_fade: bool,
    pub anchor: Option<TextAnchor>,
    pub prev_anchor: Option<TextAnchor>,
    pub orientation: Option<WritingMode>,
}

impl PlacementDump {
    pub fn from_placement(placement: &Placement) -> Self {
        let mut labels: Vec<LabelDump> = placement
            .opacities()
            .iter()
            .map(|(id, opacity)| {
                let decision = placement.placements().get(id);
                let offset = placement.variable_offsets().get(id);
                LabelDump {
                    id: *id,
                    text_opacity: opacity.text.opacity,
                    text_placed: opacity.text.placed,
                    icon_opacity: opacity.icon.opacity,
                    icon_placed: opacity.icon.placed,
                    decided: decision.is_some(),
                    skip_fade: decision.is_some_and(|d| d.skip_fade),
                    anchor: offset.map(|o| o.anchor),
                    prev_anchor: offset.and_then(|o| o.prev_anchor),
                    orientation: placement.placed_orientations().get(id).copied(),
                }
            })
            .collect();
        labels.sort_by_key(|label| label.id);

        PlacementDump {
            commit_time: placement.commit_time(),
            fade_duration: placement.fade_duration(),
            last_placement_change_time: placement.last_placement_change_time(),
            stale: placement.is_stale(),
            labels,
        }
    }
}

/// Write the dump as pretty JSON to `path`, or stdout when absent.
pub fn write_placement_dump(output: Option<&Path>, placement: &Placement) -> anyhow::Result<()> {
    let dump = PlacementDump::from_placement(placement);
    match output {
        Some(path) => {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &dump)?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &dump)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacementConfig;
    use crate::transform::Transform;

    #[test]
    fn empty_placement_dumps_header() {
        let mut placement = Placement::new(&Transform::default(), &PlacementConfig::default(), None);
        placement.commit(42.0);
        let dump = PlacementDump::from_placement(&placement);
        assert_eq!(dump.commit_time, 42.0);
        assert_eq!(dump.last_placement_change_time, Some(42.0));
        assert!(dump.labels.is_empty());

        let json = serde_json::to_value(&dump).expect("dump serializes");
        assert_eq!(json["fadeDuration"], 300.0);
        assert!(json["labels"].as_array().is_some_and(|l| l.is_empty()));
    }
}

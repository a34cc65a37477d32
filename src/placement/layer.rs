use super::anchor::TextAnchor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    Map,
    Viewport,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolPlacement {
    #[default]
    Point,
    Line,
    LineCenter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IconTextFit {
    #[default]
    None,
    Width,
    Height,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolZOrder {
    #[default]
    Auto,
    ViewportY,
    Source,
}

/// Evaluated layout properties of a symbol layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SymbolLayout {
    pub symbol_placement: SymbolPlacement,
    pub symbol_z_order: SymbolZOrder,
    pub text_allow_overlap: bool,
    pub icon_allow_overlap: bool,
    pub text_ignore_placement: bool,
    pub icon_ignore_placement: bool,
    pub text_optional: bool,
    pub icon_optional: bool,
    pub text_variable_anchor: Option<Vec<TextAnchor>>,
    pub icon_text_fit: IconTextFit,
    pub text_pitch_alignment: Alignment,
    pub text_rotation_alignment: Alignment,
    pub icon_pitch_alignment: Alignment,
    pub icon_rotation_alignment: Alignment,
}

impl Default for SymbolLayout {
    fn default() -> Self {
        Self {
            symbol_placement: SymbolPlacement::Point,
            symbol_z_order: SymbolZOrder::Auto,
            text_allow_overlap: false,
            icon_allow_overlap: false,
            text_ignore_placement: false,
            icon_ignore_placement: false,
            text_optional: false,
            icon_optional: false,
            text_variable_anchor: None,
            icon_text_fit: IconTextFit::None,
            text_pitch_alignment: Alignment::Auto,
            text_rotation_alignment: Alignment::Auto,
            icon_pitch_alignment: Alignment::Auto,
            icon_rotation_alignment: Alignment::Auto,
        }
    }
}

impl SymbolLayout {
    fn resolved_rotation(&self, alignment: Alignment) -> Alignment {
        match alignment {
            Alignment::Auto if self.symbol_placement == SymbolPlacement::Point => Alignment::Viewport,
            Alignment::Auto => Alignment::Map,
            other => other,
        }
    }

    fn resolved_pitch(&self, pitch: Alignment, rotation: Alignment) -> Alignment {
        match pitch {
            Alignment::Auto => self.resolved_rotation(rotation),
            other => other,
        }
    }

    pub fn text_rotate_with_map(&self) -> bool {
        self.resolved_rotation(self.text_rotation_alignment) == Alignment::Map
    }

    pub fn text_pitch_with_map(&self) -> bool {
        self.resolved_pitch(self.text_pitch_alignment, self.text_rotation_alignment) == Alignment::Map
    }

    pub fn icon_rotate_with_map(&self) -> bool {
        self.resolved_rotation(self.icon_rotation_alignment) == Alignment::Map
    }

    pub fn icon_pitch_with_map(&self) -> bool {
        self.resolved_pitch(self.icon_pitch_alignment, self.icon_rotation_alignment) == Alignment::Map
    }

    pub fn has_icon_text_fit(&self) -> bool {
        self.icon_text_fit != IconTextFit::None
    }

    /// Placement walks symbols back to front by viewport y only when asked to.
    pub fn places_by_viewport_y(&self) -> bool {
        self.symbol_z_order == SymbolZOrder::ViewportY
    }

    /// Draw order for query results: viewport y when asked for, or by default
    /// for point labels that may overlap each other.
    pub fn z_order_by_viewport_y(&self) -> bool {
        match self.symbol_z_order {
            SymbolZOrder::ViewportY => true,
            SymbolZOrder::Source => false,
            SymbolZOrder::Auto => {
                self.symbol_placement == SymbolPlacement::Point
                    && (self.text_allow_overlap
                        || self.icon_allow_overlap
                        || self.text_ignore_placement
                        || self.icon_ignore_placement)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolLayer {
    pub id: String,
    #[serde(default)]
    pub layout: SymbolLayout,
}

impl SymbolLayer {
    pub fn new(id: impl Into<String>, layout: SymbolLayout) -> Self {
        Self {
            id: id.into(),
            layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_alignment_follows_placement() {
        let point = SymbolLayout::default();
        assert!(!point.text_rotate_with_map());
        assert!(!point.text_pitch_with_map());

        let line = SymbolLayout {
            symbol_placement: SymbolPlacement::Line,
            ..SymbolLayout::default()
        };
        assert!(line.text_rotate_with_map());
        assert!(line.text_pitch_with_map());
    }

    #[test]
    fn deserializes_kebab_case_properties() {
        let layout: SymbolLayout = serde_json::from_str(
            r#"{"text-allow-overlap": true, "text-variable-anchor": ["top", "bottom-left"], "symbol-z-order": "viewport-y"}"#,
        )
        .expect("layout parses");
        assert!(layout.text_allow_overlap);
        assert_eq!(
            layout.text_variable_anchor,
            Some(vec![TextAnchor::Top, TextAnchor::BottomLeft])
        );
        assert!(layout.z_order_by_viewport_y());
        assert!(layout.places_by_viewport_y());
    }

    #[test]
    fn overlap_sorts_features_but_not_placement() {
        let layout = SymbolLayout {
            icon_allow_overlap: true,
            ..SymbolLayout::default()
        };
        assert!(layout.z_order_by_viewport_y());
        assert!(!layout.places_by_viewport_y());
    }
}

use super::bucket::{CollisionBoxRecord, SymbolBucket};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnwrappedTileId {
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverscaledTileId {
    pub overscaled_z: u8,
    #[serde(default)]
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl OverscaledTileId {
    pub fn new(overscaled_z: u8, wrap: i32, z: u8, x: u32, y: u32) -> Self {
        Self {
            overscaled_z,
            wrap,
            canonical: CanonicalTileId { z, x, y },
        }
    }

    pub fn to_unwrapped(&self) -> UnwrappedTileId {
        UnwrappedTileId {
            wrap: self.wrap,
            canonical: self.canonical,
        }
    }
}

impl fmt::Display for OverscaledTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.canonical.z, self.canonical.x, self.canonical.y
        )?;
        if self.overscaled_z != self.canonical.z {
            write!(f, "@{}", self.overscaled_z)?;
        }
        if self.wrap != 0 {
            write!(f, "~{}", self.wrap)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexedFeature {
    pub id: Option<u64>,
    pub source_layer: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Queryable features of one tile, addressed by feature index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureIndex {
    #[serde(default)]
    pub features: Vec<IndexedFeature>,
}

impl FeatureIndex {
    pub fn feature(&self, index: u32) -> Option<&IndexedFeature> {
        self.features.get(index as usize)
    }
}

fn default_tile_size() -> f32 {
    512.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub tile_id: OverscaledTileId,
    #[serde(default = "default_tile_size")]
    pub tile_size: f32,
    #[serde(default)]
    pub buckets: Vec<SymbolBucket>,
    /// Collision geometry shared by all buckets of the tile.
    #[serde(default)]
    pub collision_box_array: Vec<CollisionBoxRecord>,
    #[serde(default)]
    pub latest_feature_index: Option<Rc<FeatureIndex>>,
    /// While set, the tile is loaded but masked by the fade-out of what it
    /// replaced; its symbols stay unplaced.
    #[serde(default)]
    pub symbol_fade_hold_until: Option<f64>,
}

impl Tile {
    pub fn new(tile_id: OverscaledTileId) -> Self {
        Self {
            tile_id,
            tile_size: default_tile_size(),
            buckets: Vec::new(),
            collision_box_array: Vec::new(),
            latest_feature_index: None,
            symbol_fade_hold_until: None,
        }
    }

    pub fn bucket(&self, layer_id: &str) -> Option<&SymbolBucket> {
        self.buckets
            .iter()
            .find(|b| b.layer_ids.iter().any(|id| id == layer_id))
    }

    pub fn bucket_mut(&mut self, layer_id: &str) -> Option<&mut SymbolBucket> {
        self.buckets
            .iter_mut()
            .find(|b| b.layer_ids.iter().any(|id| id == layer_id))
    }

    pub fn holding_for_fade(&self) -> bool {
        self.symbol_fade_hold_until.is_some()
    }

    pub fn set_hold_duration(&mut self, now: f64, duration: f64) {
        self.symbol_fade_hold_until = Some(now + duration);
    }

    pub fn symbol_fade_finished(&self, now: f64) -> bool {
        self.symbol_fade_hold_until.is_none_or(|until| until < now)
    }

    pub fn clear_fade_hold(&mut self) {
        self.symbol_fade_hold_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_overscale_and_wrap() {
        assert_eq!(OverscaledTileId::new(3, 0, 3, 1, 2).to_string(), "3/1/2");
        assert_eq!(OverscaledTileId::new(5, -1, 3, 1, 2).to_string(), "3/1/2@5~-1");
    }

    #[test]
    fn fade_hold_lifecycle() {
        let mut tile = Tile::new(OverscaledTileId::new(0, 0, 0, 0, 0));
        assert!(!tile.holding_for_fade());
        tile.set_hold_duration(100.0, 300.0);
        assert!(tile.holding_for_fade());
        assert!(!tile.symbol_fade_finished(200.0));
        assert!(tile.symbol_fade_finished(401.0));
        tile.clear_fade_hold();
        assert!(!tile.holding_for_fade());
    }
}

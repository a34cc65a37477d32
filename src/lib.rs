#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod placement;
pub mod placement_dump;
pub mod render;
pub mod scene;
pub mod session;
pub mod transform;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, PlacementConfig, RenderConfig, load_config};
pub use error::PlacementError;
pub use placement::{
    CrossTileId, JointOpacityState, JointPlacement, OpacityState, Placement, SymbolBucket, SymbolLayer,
    SymbolLayout, Tile,
};
pub use placement_dump::{PlacementDump, write_placement_dump};
pub use render::render_svg;
pub use scene::Scene;
pub use session::PlacementSession;
pub use transform::Transform;

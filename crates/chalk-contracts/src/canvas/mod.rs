mod memory;

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::geometry::Bounds;
use crate::media::EncodedImage;

pub use memory::{MemoryCanvas, Shape, ShapeKind};

/// Scale used when rasterizing shapes for a generation request.
pub const EXPORT_SCALE: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(pub String);

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShapeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasChange {
    ShapeAdded(ShapeId),
    ShapeUpdated(ShapeId),
}

pub type CanvasListener = Box<dyn FnMut(&CanvasChange) + Send>;

/// Drawing surface operations the session needs. The surface owns shapes,
/// selection and assets; callers only ever hold identifiers.
pub trait CanvasProvider {
    fn shape_ids(&self) -> Vec<ShapeId>;
    fn selected_shape_ids(&self) -> Vec<ShapeId>;
    fn bounds_of(&self, ids: &[ShapeId]) -> Option<Bounds>;
    /// Renders `ids` on an opaque background. `Ok(None)` means there was
    /// nothing drawable.
    fn rasterize(&self, ids: &[ShapeId], scale: f64) -> Result<Option<EncodedImage>>;
    fn delete_shapes(&mut self, ids: &[ShapeId]) -> Result<()>;
    fn create_asset(&mut self, image: &EncodedImage, width: f64, height: f64) -> Result<AssetId>;
    fn place_image(&mut self, asset: &AssetId, bounds: Bounds) -> Result<ShapeId>;
    fn subscribe(&mut self, listener: CanvasListener);
}

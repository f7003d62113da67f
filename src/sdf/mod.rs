//! Scene Description Foundations: the value types consumed at the
//! collaborator boundary.
//!
//! - `Path` - absolute namespace/property/variant paths
//! - `Layer` - the abstract layer object (spec tree, sublayers, metadata)
//! - `LayerOffset` - time offset/scale applied across layers and arcs
//! - `schema` - well-known metadata field keys
//!
//! Composition never parses layer documents; it reads `Layer` objects
//! authored by the embedding system (or, in tests, in memory).

mod layer;
mod layer_offset;
mod path;
pub mod schema;

pub use layer::{
    layer_key, Layer, LayerHandle, Payload, Permission, Reference, Relocate, Spec, SpecType,
    Specifier, Value, Variability,
};
pub use layer_offset::LayerOffset;
pub use path::Path;

/// Shorthand for [`Path::new`].
pub fn path(s: &str) -> Option<Path> {
    Path::new(s)
}

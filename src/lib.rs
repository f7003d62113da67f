//! `opencomp` composes layered scene description: it resolves how the
//! opinions of many layers combine into a single namespace of prims and
//! properties.
//!
//! # Modules
//!
//! - `sdf` - scene description foundations: paths, layers, specs, fields
//! - `resolver` - the asset resolution boundary (layer lookup and opening)
//! - `map_function` - namespace path mappings carried by composition arcs
//! - `layer_stack` - sublayer flattening and layer stack interning
//! - `prim_index` - the per-prim graph of composition arcs
//! - `indexer` - prim index construction (inherits, variants, relocates,
//!   references, payloads, specializes)
//! - `property_index` - per-property spec stacks derived from prim indexes
//! - `dependency` - reverse tables from composition sites to cached indexes
//! - `cache` - the public facade: compute, query, invalidate
//! - `changes` - batched edit descriptions and their invalidation
//! - `error` - the closed taxonomy of composition errors
//!
//! Composition never fails: every problem is recorded as a [`PcpError`] on
//! the result it affects and the offending contribution is omitted.

pub mod cache;
pub mod changes;
pub mod dependency;
pub mod error;
pub mod indexer;
pub mod layer_stack;
pub mod map_function;
pub mod prim_index;
pub mod property_index;
pub mod resolver;
pub mod sdf;

pub use cache::Cache;
pub use changes::{AppliedChanges, Changes};
pub use dependency::{Dependency, DependencyFlags};
pub use error::{PcpError, PcpErrorVector};
pub use layer_stack::{LayerStack, LayerStackHandle, LayerStackIdentifier, LayerStackRegistry};
pub use map_function::MapFunction;
pub use prim_index::{ArcType, PrimIndex, Site};
pub use property_index::PropertyIndex;
pub use resolver::{LayerProvider, LayerRegistry, ResolverContext};

//! Batched descriptions of layer edits, translated by the cache into
//! invalidations of its computed state.
//!
//! The embedding collaborator authors edits on layers directly; this crate
//! never observes them. Instead the collaborator records what it did in a
//! [`Changes`] batch and hands the batch to [`Cache::apply_changes`].
//!
//! [`Cache::apply_changes`]: crate::cache::Cache::apply_changes

use crate::sdf::{LayerHandle, Path};

/// One recorded edit.
#[derive(Debug, Clone)]
pub enum LayerEdit {
    /// A spec appeared at `path`.
    SpecAdded { layer: LayerHandle, path: Path },
    /// The spec at `path` (and everything beneath it) went away.
    SpecRemoved { layer: LayerHandle, path: Path },
    /// A field changed on the spec at `path`.
    FieldChanged {
        layer: LayerHandle,
        path: Path,
        field: String,
    },
    /// The layer's sublayer list or offsets changed.
    SublayersChanged { layer: LayerHandle },
    /// Relocations authored in the layer changed.
    RelocatesChanged { layer: LayerHandle },
    /// The layer's entire content was replaced, e.g. by a reload.
    LayerResynced { layer: LayerHandle },
}

/// An ordered batch of edits.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    edits: Vec<LayerEdit>,
}

impl Changes {
    pub fn new() -> Self {
        Changes::default()
    }

    pub fn did_add_spec(&mut self, layer: &LayerHandle, path: &Path) -> &mut Self {
        self.edits.push(LayerEdit::SpecAdded {
            layer: layer.clone(),
            path: path.clone(),
        });
        self
    }

    pub fn did_remove_spec(&mut self, layer: &LayerHandle, path: &Path) -> &mut Self {
        self.edits.push(LayerEdit::SpecRemoved {
            layer: layer.clone(),
            path: path.clone(),
        });
        self
    }

    pub fn did_change_field(
        &mut self,
        layer: &LayerHandle,
        path: &Path,
        field: &str,
    ) -> &mut Self {
        self.edits.push(LayerEdit::FieldChanged {
            layer: layer.clone(),
            path: path.clone(),
            field: field.to_string(),
        });
        self
    }

    pub fn did_change_sublayers(&mut self, layer: &LayerHandle) -> &mut Self {
        self.edits.push(LayerEdit::SublayersChanged {
            layer: layer.clone(),
        });
        self
    }

    pub fn did_change_relocates(&mut self, layer: &LayerHandle) -> &mut Self {
        self.edits.push(LayerEdit::RelocatesChanged {
            layer: layer.clone(),
        });
        self
    }

    pub fn did_resync_layer(&mut self, layer: &LayerHandle) -> &mut Self {
        self.edits.push(LayerEdit::LayerResynced {
            layer: layer.clone(),
        });
        self
    }

    pub fn edits(&self) -> &[LayerEdit] {
        &self.edits
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

/// What applying a batch invalidated.
#[derive(Debug, Clone, Default)]
pub struct AppliedChanges {
    /// Paths of prim indexes that were dropped.
    pub invalidated_prim_paths: Vec<Path>,
    /// Paths of property indexes that were dropped.
    pub invalidated_property_paths: Vec<Path>,
    /// Whether the cache's root layer stack itself was invalidated.
    pub recomputed_layer_stack: bool,
}

impl AppliedChanges {
    pub fn is_empty(&self) -> bool {
        self.invalidated_prim_paths.is_empty()
            && self.invalidated_property_paths.is_empty()
            && !self.recomputed_layer_stack
    }
}

//! The external collaborator boundary: asset resolution and layer access.
//!
//! Composition never opens files. When it needs the layer behind a sublayer,
//! reference, or payload asset path, it asks a [`LayerProvider`]: first to
//! resolve the authored asset path against its anchoring layer, then to find
//! or open the layer for the resolved identifier. Unresolved paths become
//! `InvalidAssetPath`/`InvalidSublayerPath` errors upstream, never failures
//! here.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::sdf::LayerHandle;

/// Opaque token threaded through asset resolution. Participates in layer
/// stack identity but is never interpreted by composition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResolverContext(String);

impl ResolverContext {
    pub fn new(token: impl Into<String>) -> Self {
        ResolverContext(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Source of layers for composition.
pub trait LayerProvider: Send + Sync {
    /// Resolve an authored asset path against its anchoring layer. Returns
    /// the canonical layer identifier, or `None` if the path cannot be
    /// resolved.
    fn resolve(
        &self,
        anchor: &LayerHandle,
        asset_path: &str,
        context: &ResolverContext,
    ) -> Option<String>;

    /// Find or open the layer with the given resolved identifier.
    fn find_or_open(&self, identifier: &str, context: &ResolverContext) -> Option<LayerHandle>;

    /// Re-read a layer's backing content. Returns `true` if the content
    /// changed. In-memory providers have nothing to re-read.
    fn reload(&self, _layer: &LayerHandle) -> bool {
        false
    }
}

/// An in-memory [`LayerProvider`]: layers registered by identifier, with
/// anchor-relative resolution of `./`-prefixed asset paths.
#[derive(Default)]
pub struct LayerRegistry {
    layers: RwLock<HashMap<String, LayerHandle>>,
}

impl LayerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(LayerRegistry::default())
    }

    pub fn insert(&self, layer: LayerHandle) {
        self.layers.write().insert(layer.identifier().to_string(), layer);
    }

    pub fn get(&self, identifier: &str) -> Option<LayerHandle> {
        self.layers.read().get(identifier).cloned()
    }

    pub fn remove(&self, identifier: &str) -> Option<LayerHandle> {
        self.layers.write().remove(identifier)
    }
}

impl LayerProvider for LayerRegistry {
    fn resolve(
        &self,
        anchor: &LayerHandle,
        asset_path: &str,
        _context: &ResolverContext,
    ) -> Option<String> {
        // Strip the @...@ markers used by authored asset paths.
        let clean = asset_path.trim_matches('@').trim();
        if clean.is_empty() {
            return None;
        }
        let resolved = if let Some(rest) = clean.strip_prefix("./") {
            match anchor.identifier().rfind('/') {
                Some(idx) => format!("{}/{rest}", &anchor.identifier()[..idx]),
                None => rest.to_string(),
            }
        } else {
            clean.to_string()
        };
        if self.layers.read().contains_key(&resolved) {
            Some(resolved)
        } else {
            None
        }
    }

    fn find_or_open(&self, identifier: &str, _context: &ResolverContext) -> Option<LayerHandle> {
        self.get(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::Layer;

    #[test]
    fn resolves_registered_layers() {
        let registry = LayerRegistry::new();
        let anchor = Layer::create("assets/root.layer");
        let sub = Layer::create("assets/sub.layer");
        registry.insert(anchor.clone());
        registry.insert(sub);

        let ctx = ResolverContext::default();
        assert_eq!(
            registry.resolve(&anchor, "@./sub.layer@", &ctx),
            Some("assets/sub.layer".to_string())
        );
        assert_eq!(
            registry.resolve(&anchor, "assets/sub.layer", &ctx),
            Some("assets/sub.layer".to_string())
        );
        assert_eq!(registry.resolve(&anchor, "missing.layer", &ctx), None);
        assert!(registry.find_or_open("assets/sub.layer", &ctx).is_some());
    }
}

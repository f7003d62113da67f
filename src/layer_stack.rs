//! Layer stacks: the flattened, strength-ordered result of resolving a root
//! layer's sublayer tree.
//!
//! A stack is computed from a [`LayerStackIdentifier`] and is immutable once
//! published. Equal identifiers yield the *same* instance through the
//! [`LayerStackRegistry`]; a change to any input produces a new stack via
//! recomputation, never mutation in place.
//!
//! Ordering: the session layer subtree (if any) is strongest, then the root
//! layer, then its sublayers in authored order, each recursively flattened
//! root-first. A layer's own content is always stronger than its sublayers'.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use log::warn;
use parking_lot::{Mutex, RwLock};

use crate::error::{PcpError, PcpErrorVector};
use crate::map_function::MapFunction;
use crate::resolver::{LayerProvider, ResolverContext};
use crate::sdf::{layer_key, LayerHandle, LayerOffset, Path};

/// Everything that determines a layer stack's content. Value-equal
/// identifiers intern to the same stack instance. Layer handles compare by
/// object identity.
#[derive(Clone)]
pub struct LayerStackIdentifier {
    pub root_layer: LayerHandle,
    pub session_layer: Option<LayerHandle>,
    pub resolver_context: ResolverContext,
    /// Per variant set, the ordered fallback selections to try when no
    /// selection is authored.
    pub variant_fallbacks: BTreeMap<String, Vec<String>>,
}

impl LayerStackIdentifier {
    pub fn new(root_layer: LayerHandle) -> Self {
        LayerStackIdentifier {
            root_layer,
            session_layer: None,
            resolver_context: ResolverContext::default(),
            variant_fallbacks: BTreeMap::new(),
        }
    }
}

impl PartialEq for LayerStackIdentifier {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root_layer, &other.root_layer)
            && match (&self.session_layer, &other.session_layer) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
            && self.resolver_context == other.resolver_context
            && self.variant_fallbacks == other.variant_fallbacks
    }
}

impl Eq for LayerStackIdentifier {}

impl Hash for LayerStackIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        layer_key(&self.root_layer).hash(state);
        self.session_layer.as_ref().map(layer_key).unwrap_or(0).hash(state);
        self.resolver_context.hash(state);
        self.variant_fallbacks.hash(state);
    }
}

impl fmt::Debug for LayerStackIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerStackIdentifier")
            .field("root_layer", &self.root_layer.identifier())
            .field(
                "session_layer",
                &self.session_layer.as_ref().map(|l| l.identifier()),
            )
            .finish_non_exhaustive()
    }
}

/// The flattened stack. See the module docs for ordering.
pub struct LayerStack {
    identifier: LayerStackIdentifier,
    /// Strongest first.
    layers: Vec<LayerHandle>,
    /// Per layer, the identity path mapping carrying the cumulative time
    /// offset from the stack root down to that layer.
    map_functions: Vec<MapFunction>,
    /// Index of the root layer within `layers` (after any session subtree).
    root_index: usize,
    relocates_source_to_target: BTreeMap<Path, Path>,
    relocates_target_to_source: BTreeMap<Path, Path>,
    relocates_prim_paths: Vec<Path>,
    muted_layers: BTreeSet<String>,
    local_errors: PcpErrorVector,
}

pub type LayerStackHandle = Arc<LayerStack>;

impl LayerStack {
    fn compute(
        identifier: LayerStackIdentifier,
        provider: &dyn LayerProvider,
        muted: &BTreeSet<String>,
    ) -> LayerStack {
        let mut builder = StackBuilder {
            provider,
            muted,
            context: identifier.resolver_context.clone(),
            layers: Vec::new(),
            map_functions: Vec::new(),
            muted_layers: BTreeSet::new(),
            errors: Vec::new(),
            active: Vec::new(),
        };

        // Session subtree first: session opinions are strongest. The root
        // layer itself may not be muted, but the session layer may.
        if let Some(session) = &identifier.session_layer {
            if muted.contains(session.identifier()) {
                builder.muted_layers.insert(session.identifier().to_string());
            } else {
                builder.add_layer(session, LayerOffset::default());
            }
        }
        let root_index = builder.layers.len();
        builder.add_layer(&identifier.root_layer, LayerOffset::default());

        let mut stack = LayerStack {
            identifier,
            layers: builder.layers,
            map_functions: builder.map_functions,
            root_index,
            relocates_source_to_target: BTreeMap::new(),
            relocates_target_to_source: BTreeMap::new(),
            relocates_prim_paths: Vec::new(),
            muted_layers: builder.muted_layers,
            local_errors: builder.errors,
        };
        stack.compute_relocates();
        stack
    }

    /// Aggregate relocation tables from every layer. Weakest layers are
    /// applied first so that stronger layers override the same source.
    fn compute_relocates(&mut self) {
        let mut prim_paths = BTreeSet::new();
        let layers: Vec<LayerHandle> = self.layers.iter().rev().cloned().collect();
        for layer in layers {
            let (relocates, layer_prim_paths) = layer.relocates();
            prim_paths.extend(layer_prim_paths);
            let mut seen_sources: BTreeMap<Path, Path> = BTreeMap::new();
            for relocate in relocates {
                let (source, target) = (relocate.source, relocate.target);
                if !source.is_prim_path() || !target.is_prim_path() {
                    warn!(
                        "ignoring relocate {source} -> {target} in @{}@: not prim paths",
                        layer.identifier()
                    );
                    self.local_errors.push(PcpError::InvalidRelocate {
                        layer: layer.identifier().to_string(),
                        relocate_source: source,
                        target,
                        reason: "source and target must be prim paths".to_string(),
                    });
                    continue;
                }
                if source == target || target.has_prefix(&source) {
                    warn!(
                        "ignoring relocate {source} -> {target} in @{}@: target within source",
                        layer.identifier()
                    );
                    self.local_errors.push(PcpError::InvalidRelocate {
                        layer: layer.identifier().to_string(),
                        relocate_source: source,
                        target,
                        reason: "target may not be the source or nested inside it".to_string(),
                    });
                    continue;
                }
                if let Some(existing) = seen_sources.get(&source) {
                    if *existing != target {
                        self.local_errors.push(PcpError::ConflictingRelocate {
                            layer: layer.identifier().to_string(),
                            relocate_source: source,
                            target,
                            existing_target: existing.clone(),
                        });
                    }
                    continue;
                }
                seen_sources.insert(source.clone(), target.clone());
                self.insert_relocate(source, target);
            }
        }
        self.relocates_prim_paths = prim_paths.into_iter().collect();
    }

    fn insert_relocate(&mut self, source: Path, target: Path) {
        // Chase ancestral chains: if the source was itself the target of an
        // earlier relocate, the new entry maps from the original source.
        let source = self
            .relocates_target_to_source
            .get(&source)
            .cloned()
            .unwrap_or(source);
        if source == target {
            // A chain that folds back onto itself cancels out.
            self.relocates_source_to_target.remove(&source);
            self.relocates_target_to_source.remove(&target);
            return;
        }
        if let Some(old_target) = self.relocates_source_to_target.insert(source.clone(), target.clone()) {
            self.relocates_target_to_source.remove(&old_target);
        }
        self.relocates_target_to_source.insert(target, source);
    }

    pub fn identifier(&self) -> &LayerStackIdentifier {
        &self.identifier
    }

    /// All layers, strongest first.
    pub fn layers(&self) -> &[LayerHandle] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Layers contributed by the session layer subtree.
    pub fn session_layers(&self) -> &[LayerHandle] {
        &self.layers[..self.root_index]
    }

    /// The cumulative time offset for the layer at `index`, or `None` when
    /// it is the identity.
    pub fn layer_offset(&self, index: usize) -> Option<LayerOffset> {
        let offset = self.map_functions.get(index)?.time_offset();
        if offset.is_identity() {
            None
        } else {
            Some(offset)
        }
    }

    pub fn has_layer(&self, layer: &LayerHandle) -> bool {
        self.layers.iter().any(|l| Arc::ptr_eq(l, layer))
    }

    pub fn relocates_source_to_target(&self) -> &BTreeMap<Path, Path> {
        &self.relocates_source_to_target
    }

    pub fn relocates_target_to_source(&self) -> &BTreeMap<Path, Path> {
        &self.relocates_target_to_source
    }

    /// Paths of prims that author relocates, in namespace order.
    pub fn relocates_prim_paths(&self) -> &[Path] {
        &self.relocates_prim_paths
    }

    pub fn has_relocates(&self) -> bool {
        !self.relocates_source_to_target.is_empty()
    }

    /// Canonical identifiers of layers that were skipped because they are
    /// muted.
    pub fn muted_layers(&self) -> &BTreeSet<String> {
        &self.muted_layers
    }

    /// Errors found while building this stack.
    pub fn local_errors(&self) -> &PcpErrorVector {
        &self.local_errors
    }
}

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerStack")
            .field(
                "layers",
                &self.layers.iter().map(|l| l.identifier()).collect::<Vec<_>>(),
            )
            .field("errors", &self.local_errors.len())
            .finish()
    }
}

struct StackBuilder<'a> {
    provider: &'a dyn LayerProvider,
    muted: &'a BTreeSet<String>,
    context: ResolverContext,
    layers: Vec<LayerHandle>,
    map_functions: Vec<MapFunction>,
    muted_layers: BTreeSet<String>,
    errors: PcpErrorVector,
    /// Layer keys on the active recursion chain, for cycle detection. The
    /// same layer may legally appear in two sibling subtrees.
    active: Vec<usize>,
}

impl StackBuilder<'_> {
    fn add_layer(&mut self, layer: &LayerHandle, offset: LayerOffset) {
        self.layers.push(layer.clone());
        self.map_functions
            .push(MapFunction::identity_paths_with_offset(offset));
        self.active.push(layer_key(layer));

        let sublayer_paths = layer.sub_layer_paths();
        let mut sublayer_offsets = layer.sub_layer_offsets();
        sublayer_offsets.resize(sublayer_paths.len(), LayerOffset::default());

        for (sublayer_path, authored_offset) in sublayer_paths.iter().zip(sublayer_offsets) {
            let Some(resolved) = self.provider.resolve(layer, sublayer_path, &self.context) else {
                self.errors.push(PcpError::InvalidSublayerPath {
                    layer: layer.identifier().to_string(),
                    sublayer_path: sublayer_path.clone(),
                });
                continue;
            };
            if self.muted.contains(&resolved) {
                self.muted_layers.insert(resolved);
                continue;
            }
            let Some(sublayer) = self.provider.find_or_open(&resolved, &self.context) else {
                self.errors.push(PcpError::InvalidSublayerPath {
                    layer: layer.identifier().to_string(),
                    sublayer_path: sublayer_path.clone(),
                });
                continue;
            };
            if self.active.contains(&layer_key(&sublayer)) {
                self.errors.push(PcpError::SublayerCycle {
                    layer: layer.identifier().to_string(),
                    sublayer: sublayer.identifier().to_string(),
                });
                continue;
            }
            let mut sublayer_offset = authored_offset;
            if !sublayer_offset.is_valid() {
                // Report, then continue with the identity offset.
                self.errors.push(PcpError::InvalidSublayerOffset {
                    layer: layer.identifier().to_string(),
                    sublayer: sublayer.identifier().to_string(),
                    offset: sublayer_offset,
                });
                sublayer_offset = LayerOffset::default();
            }
            self.add_layer(&sublayer, offset.compose(&sublayer_offset));
        }

        self.active.pop();
    }
}

/// The interning registry: the one piece of shared mutable state in this
/// design. Entries are immutable once published; callers hold stacks by
/// `Arc` and the registry holds them weakly.
pub struct LayerStackRegistry {
    provider: Arc<dyn LayerProvider>,
    stacks: Mutex<HashMap<LayerStackIdentifier, Weak<LayerStack>>>,
    muted: RwLock<BTreeSet<String>>,
}

impl LayerStackRegistry {
    pub fn new(provider: Arc<dyn LayerProvider>) -> Arc<Self> {
        Arc::new(LayerStackRegistry {
            provider,
            stacks: Mutex::new(HashMap::new()),
            muted: RwLock::new(BTreeSet::new()),
        })
    }

    pub fn provider(&self) -> &Arc<dyn LayerProvider> {
        &self.provider
    }

    /// Return the interned stack for `identifier`, computing it if needed.
    /// The error vector is populated only when a new stack is built; an
    /// already-interned stack reports through
    /// [`LayerStack::local_errors`] instead.
    pub fn compute(
        &self,
        identifier: &LayerStackIdentifier,
    ) -> (LayerStackHandle, PcpErrorVector) {
        if let Some(existing) = self.find(identifier) {
            return (existing, Vec::new());
        }
        // Build outside the lock; racing builders discard their copy so that
        // exactly one instance is ever published per identifier.
        let muted = self.muted.read().clone();
        let built = Arc::new(LayerStack::compute(
            identifier.clone(),
            self.provider.as_ref(),
            &muted,
        ));
        let mut stacks = self.stacks.lock();
        if let Some(existing) = stacks.get(identifier).and_then(Weak::upgrade) {
            return (existing, Vec::new());
        }
        stacks.insert(identifier.clone(), Arc::downgrade(&built));
        let errors = built.local_errors().clone();
        (built, errors)
    }

    /// Read-only lookup; never computes.
    pub fn find(&self, identifier: &LayerStackIdentifier) -> Option<LayerStackHandle> {
        self.stacks.lock().get(identifier).and_then(Weak::upgrade)
    }

    pub fn is_layer_muted(&self, identifier: &str) -> bool {
        self.muted.read().contains(identifier)
    }

    pub fn muted_layers(&self) -> Vec<String> {
        self.muted.read().iter().cloned().collect()
    }

    /// Apply a muting change. Returns the identifiers whose muted state
    /// actually changed.
    pub fn set_muted(&self, mute: &[String], unmute: &[String]) -> (Vec<String>, Vec<String>) {
        let mut muted = self.muted.write();
        let mut newly_muted = Vec::new();
        let mut newly_unmuted = Vec::new();
        for id in unmute {
            if muted.remove(id) {
                newly_unmuted.push(id.clone());
            }
        }
        for id in mute {
            if muted.insert(id.clone()) {
                newly_muted.push(id.clone());
            }
        }
        (newly_muted, newly_unmuted)
    }

    /// All currently interned, live stacks.
    pub fn live_stacks(&self) -> Vec<LayerStackHandle> {
        self.stacks.lock().values().filter_map(Weak::upgrade).collect()
    }

    pub fn find_all_using_layer(&self, layer: &LayerHandle) -> Vec<LayerStackHandle> {
        self.live_stacks()
            .into_iter()
            .filter(|s| s.has_layer(layer))
            .collect()
    }

    /// Drop interned entries whose stack uses or mutes any of the given
    /// layer identifiers, so the next compute builds a fresh instance.
    /// Returns the purged live stacks.
    pub fn purge_stacks_for_layers(&self, layer_identifiers: &[String]) -> Vec<LayerStackHandle> {
        let mut purged = Vec::new();
        self.stacks.lock().retain(|_, weak| {
            let Some(stack) = weak.upgrade() else {
                return false;
            };
            let affected = layer_identifiers.iter().any(|id| {
                stack.muted_layers().contains(id)
                    || stack.layers().iter().any(|l| l.identifier() == id)
            });
            if affected {
                purged.push(stack);
            }
            !affected
        });
        purged
    }

    /// Drop interned entries that use the given layer object.
    pub fn purge_stacks_using_layer(&self, layer: &LayerHandle) -> Vec<LayerStackHandle> {
        let mut purged = Vec::new();
        self.stacks.lock().retain(|_, weak| {
            let Some(stack) = weak.upgrade() else {
                return false;
            };
            if stack.has_layer(layer) {
                purged.push(stack);
                return false;
            }
            true
        });
        purged
    }
}

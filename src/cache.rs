//! The composition cache: the public facade of this crate.
//!
//! A cache owns one root layer stack, computes prim and property indexes on
//! demand, interns layer stacks through a shared registry, and tracks which
//! sites each cached index consumed so that edits can be translated into
//! precise invalidation. Computation happens outside the cache's locks;
//! when two threads race to compute the same index, the first published
//! result wins and the loser's work is discarded.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::changes::{AppliedChanges, Changes, LayerEdit};
use crate::dependency::{Dependency, DependencyFlags, DependencyTracker};
use crate::error::{PcpError, PcpErrorVector};
use crate::indexer::{build_prim_index, IndexerHost};
use crate::layer_stack::{LayerStackHandle, LayerStackIdentifier, LayerStackRegistry};
use crate::prim_index::PrimIndex;
use crate::property_index::{build_property_index, PropertyIndex};
use crate::resolver::LayerProvider;
use crate::sdf::{layer_key, schema, schema::FieldKey, LayerHandle, Path, SpecType, Value};

pub struct Cache {
    identifier: RwLock<LayerStackIdentifier>,
    usd: bool,
    registry: Arc<LayerStackRegistry>,
    layer_stack: RwLock<Option<LayerStackHandle>>,
    included_payloads: RwLock<BTreeSet<Path>>,
    prim_indexes: RwLock<BTreeMap<Path, Arc<PrimIndex>>>,
    property_indexes: RwLock<BTreeMap<Path, Arc<PropertyIndex>>>,
    deps: Mutex<DependencyTracker>,
    computation_count: AtomicU64,
}

impl Cache {
    pub fn new(identifier: LayerStackIdentifier, provider: Arc<dyn LayerProvider>) -> Cache {
        Cache::new_with_registry(identifier, LayerStackRegistry::new(provider), false)
    }

    /// A cache in usd mode: inherits, specializes, relocates, and
    /// permissions are not evaluated; references and payloads are.
    pub fn new_usd(identifier: LayerStackIdentifier, provider: Arc<dyn LayerProvider>) -> Cache {
        Cache::new_with_registry(identifier, LayerStackRegistry::new(provider), true)
    }

    /// Share a layer stack registry between caches, so equal identifiers
    /// intern to the same stacks across all of them.
    pub fn new_with_registry(
        identifier: LayerStackIdentifier,
        registry: Arc<LayerStackRegistry>,
        usd: bool,
    ) -> Cache {
        Cache {
            identifier: RwLock::new(identifier),
            usd,
            registry,
            layer_stack: RwLock::new(None),
            included_payloads: RwLock::new(BTreeSet::new()),
            prim_indexes: RwLock::new(BTreeMap::new()),
            property_indexes: RwLock::new(BTreeMap::new()),
            deps: Mutex::new(DependencyTracker::new()),
            computation_count: AtomicU64::new(0),
        }
    }

    pub fn layer_stack_identifier(&self) -> LayerStackIdentifier {
        self.identifier.read().clone()
    }

    pub fn is_usd(&self) -> bool {
        self.usd
    }

    pub fn layer_stack_registry(&self) -> &Arc<LayerStackRegistry> {
        &self.registry
    }

    // ---- layer stack ----

    /// The cache's root layer stack, computed on first use. Errors are
    /// reported only when this call actually built the stack.
    pub fn compute_layer_stack(&self) -> (LayerStackHandle, PcpErrorVector) {
        if let Some(stack) = self.layer_stack.read().clone() {
            return (stack, Vec::new());
        }
        let identifier = self.identifier.read().clone();
        let (stack, errors) = self.registry.compute(&identifier);
        *self.layer_stack.write() = Some(stack.clone());
        (stack, errors)
    }

    /// The root layer stack if it has been computed.
    pub fn layer_stack(&self) -> Option<LayerStackHandle> {
        self.layer_stack.read().clone()
    }

    /// An already interned stack for `identifier`, without computing one.
    pub fn find_layer_stack(&self, identifier: &LayerStackIdentifier) -> Option<LayerStackHandle> {
        self.registry.find(identifier)
    }

    // ---- prim indexes ----

    /// The composed index for the prim at `path`, computed on first use.
    pub fn compute_prim_index(&self, path: &Path) -> Arc<PrimIndex> {
        if let Some(cached) = self.prim_indexes.read().get(path) {
            return cached.clone();
        }
        let (stack, _) = self.compute_layer_stack();
        let built = Arc::new(build_prim_index(self, &stack, path));
        self.computation_count.fetch_add(1, Ordering::Relaxed);
        let mut indexes = self.prim_indexes.write();
        if let Some(winner) = indexes.get(path) {
            return winner.clone();
        }
        indexes.insert(path.clone(), built.clone());
        drop(indexes);
        self.deps.lock().add_index(&built);
        built
    }

    /// Read-only lookup; never computes.
    pub fn find_prim_index(&self, path: &Path) -> Option<Arc<PrimIndex>> {
        self.prim_indexes.read().get(path).cloned()
    }

    /// Compute many prim indexes at once on the rayon thread pool. Results
    /// come back in argument order.
    pub fn compute_prim_indexes_in_parallel(&self, paths: &[Path]) -> Vec<Arc<PrimIndex>> {
        paths
            .par_iter()
            .map(|path| self.compute_prim_index(path))
            .collect()
    }

    /// How many prim index computations have actually run, cache hits
    /// excluded.
    pub fn prim_index_computation_count(&self) -> u64 {
        self.computation_count.load(Ordering::Relaxed)
    }

    // ---- property indexes ----

    pub fn compute_property_index(&self, path: &Path) -> Arc<PropertyIndex> {
        if let Some(cached) = self.property_indexes.read().get(path) {
            return cached.clone();
        }
        let prim_index = self.compute_prim_index(&path.prim_path());
        let built = Arc::new(build_property_index(&prim_index, path));
        let mut indexes = self.property_indexes.write();
        if let Some(winner) = indexes.get(path) {
            return winner.clone();
        }
        indexes.insert(path.clone(), built.clone());
        built
    }

    pub fn find_property_index(&self, path: &Path) -> Option<Arc<PropertyIndex>> {
        self.property_indexes.read().get(path).cloned()
    }

    /// Composed relationship targets for the relationship at `path`, each
    /// translated into the root namespace. Untranslatable targets are
    /// reported and omitted.
    pub fn compute_relationship_target_paths(
        &self,
        path: &Path,
    ) -> (Vec<Path>, PcpErrorVector) {
        self.compute_marker_paths(path, FieldKey::TargetPaths, Some(SpecType::Relationship))
    }

    /// Composed attribute connections for the attribute at `path`.
    pub fn compute_attribute_connection_paths(
        &self,
        path: &Path,
    ) -> (Vec<Path>, PcpErrorVector) {
        self.compute_marker_paths(path, FieldKey::ConnectionPaths, Some(SpecType::Attribute))
    }

    fn compute_marker_paths(
        &self,
        path: &Path,
        key: FieldKey,
        required_type: Option<SpecType>,
    ) -> (Vec<Path>, PcpErrorVector) {
        // Built from one prim index so the recorded node indices stay
        // valid even if invalidation lands between the two lookups.
        let prim_index = self.compute_prim_index(&path.prim_path());
        let property_index = build_property_index(&prim_index, path);
        let mut errors = property_index.errors().clone();
        if let (Some(required), Some(actual)) = (required_type, property_index.spec_type()) {
            if required != actual {
                return (Vec::new(), errors);
            }
        }
        let mut out = Vec::new();
        for site in property_index.property_stack() {
            let Some(Value::PathVec(targets)) = site.layer.field(&site.path, key.as_str()) else {
                continue;
            };
            let map = &prim_index.node(site.node_index).map_to_root;
            for target in targets {
                match map.map_source_to_target(&target) {
                    Some(translated) => {
                        if self.target_is_private(&translated) {
                            errors.push(PcpError::TargetPermissionDenied {
                                path: path.clone(),
                                target: translated,
                            });
                        } else if !out.contains(&translated) {
                            out.push(translated);
                        }
                    }
                    None => errors.push(PcpError::InvalidTargetPath {
                        owner: path.clone(),
                        target,
                    }),
                }
            }
        }
        (out, errors)
    }

    fn target_is_private(&self, target: &Path) -> bool {
        if self.usd {
            return false;
        }
        let Some(stack) = self.layer_stack() else {
            return false;
        };
        let prim = target.prim_path();
        stack.layers().iter().any(|layer| {
            layer.has_field(&prim, FieldKey::Permission.as_str())
                && layer.permission(&prim) == crate::sdf::Permission::Private
        })
    }

    // ---- payload inclusion ----

    /// Change which payloads are expanded. A path named by both lists ends
    /// up included. Dependent indexes are dropped so the next compute sees
    /// the new inclusion state.
    pub fn request_payloads(&self, include: &[Path], exclude: &[Path]) {
        let mut changed = Vec::new();
        {
            let mut included = self.included_payloads.write();
            for path in exclude {
                if included.remove(path) {
                    changed.push(path.clone());
                }
            }
            for path in include {
                if included.insert(path.clone()) {
                    changed.push(path.clone());
                }
            }
        }
        if changed.is_empty() {
            return;
        }
        // Inclusion of an ancestor gates descendants too: an index below a
        // changed path is stale even when it carries no payload node of its
        // own, because its ancestral projection changes.
        let stale: Vec<Path> = self
            .prim_indexes
            .read()
            .iter()
            .filter(|(index_path, index)| {
                changed.iter().any(|c| {
                    index_path.has_prefix(c)
                        || (index.has_payload_nodes() && c.has_prefix(index_path))
                })
            })
            .map(|(index_path, _)| index_path.clone())
            .collect();
        for path in &stale {
            self.drop_prim_index(path);
        }
    }

    pub fn is_payload_included_at(&self, path: &Path) -> bool {
        self.included_payloads
            .read()
            .iter()
            .any(|included| path.has_prefix(included))
    }

    pub fn included_payloads(&self) -> Vec<Path> {
        self.included_payloads.read().iter().cloned().collect()
    }

    // ---- variant fallbacks ----

    pub fn variant_fallbacks(&self) -> BTreeMap<String, Vec<String>> {
        self.identifier.read().variant_fallbacks.clone()
    }

    /// Replace the variant fallback table. Fallbacks are part of the layer
    /// stack identity, so every computed index is dropped.
    pub fn set_variant_fallbacks(&self, fallbacks: BTreeMap<String, Vec<String>>) {
        {
            let mut identifier = self.identifier.write();
            if identifier.variant_fallbacks == fallbacks {
                return;
            }
            identifier.variant_fallbacks = fallbacks;
        }
        debug!("variant fallbacks changed; flushing all computed indexes");
        self.flush_all();
    }

    // ---- layer muting ----

    /// Mute and unmute layers by canonical identifier. The root layer may
    /// not be muted. Returns the identifiers whose state actually changed.
    pub fn request_layer_muting(
        &self,
        mute: &[String],
        unmute: &[String],
    ) -> (Vec<String>, Vec<String>) {
        let root_identifier = self
            .identifier
            .read()
            .root_layer
            .identifier()
            .to_string();
        let mute: Vec<String> = mute
            .iter()
            .filter(|id| {
                if **id == root_identifier {
                    warn!("ignoring request to mute the cache's root layer @{id}@");
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();
        let (muted, unmuted) = self.registry.set_muted(&mute, unmute);
        let changed: Vec<String> = muted.iter().chain(unmuted.iter()).cloned().collect();
        if changed.is_empty() {
            return (muted, unmuted);
        }

        // Stacks built with the old muted set are stale.
        self.registry.purge_stacks_for_layers(&changed);
        if let Some(stack) = self.layer_stack() {
            let root_affected = changed.iter().any(|id| {
                stack.muted_layers().contains(id)
                    || stack.layers().iter().any(|l| l.identifier() == id)
            });
            if root_affected {
                *self.layer_stack.write() = None;
            }
        }

        // Indexes that composed through an affected stack, plus indexes
        // that recorded a muted or unresolvable arc for these identifiers.
        let mut stale: BTreeSet<Path> = BTreeSet::new();
        {
            let deps = self.deps.lock();
            for id in &changed {
                for stack in deps.layer_stacks_using_identifier(id) {
                    for dep in deps.find(&stack, &Path::abs_root(), DependencyFlags::all(), true) {
                        stale.insert(dep.index_path);
                    }
                }
            }
        }
        for (index_path, index) in self.prim_indexes.read().iter() {
            let mentions_changed = index.errors().iter().any(|error| match error {
                PcpError::MutedAssetPath { asset_path, .. }
                | PcpError::InvalidAssetPath { asset_path, .. } => {
                    changed.iter().any(|id| id == asset_path)
                }
                _ => false,
            });
            if mentions_changed {
                stale.insert(index_path.clone());
            }
        }
        for path in &stale {
            self.drop_prim_index(path);
        }
        (muted, unmuted)
    }

    pub fn is_layer_muted(&self, identifier: &str) -> bool {
        self.registry.is_layer_muted(identifier)
    }

    pub fn muted_layers(&self) -> Vec<String> {
        self.registry.muted_layers()
    }

    // ---- dependencies and diagnostics ----

    /// Cached indexes that depend on `path` within `stack`, filtered to
    /// arcs whose flags intersect `mask`. With `recurse_on_site`,
    /// dependencies on descendant sites count too.
    pub fn find_site_dependencies(
        &self,
        stack: &LayerStackHandle,
        path: &Path,
        mask: DependencyFlags,
        recurse_on_site: bool,
    ) -> Vec<Dependency> {
        self.deps.lock().find(stack, path, mask, recurse_on_site)
    }

    /// Dependencies on `path` in any tracked stack that uses `layer`.
    pub fn find_site_dependencies_on_layer(
        &self,
        layer: &LayerHandle,
        path: &Path,
        mask: DependencyFlags,
        recurse_on_site: bool,
    ) -> Vec<Dependency> {
        let deps = self.deps.lock();
        let mut out = Vec::new();
        for stack in deps.layer_stacks_using(layer) {
            out.extend(deps.find(&stack, path, mask, recurse_on_site));
        }
        out
    }

    /// Identifiers of every layer any cached index depends on.
    pub fn used_layers(&self) -> Vec<String> {
        self.deps.lock().used_layers()
    }

    /// Root layer identifiers of the stacks cached indexes depend on.
    pub fn used_root_layers(&self) -> Vec<String> {
        self.deps.lock().used_root_layers()
    }

    pub fn find_all_layer_stacks_using_layer(&self, layer: &LayerHandle) -> Vec<LayerStackHandle> {
        self.registry.find_all_using_layer(layer)
    }

    /// Sublayer asset paths that failed to resolve anywhere in the interned
    /// stacks.
    pub fn invalid_sublayer_identifiers(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        for stack in self.registry.live_stacks() {
            for error in stack.local_errors() {
                if let PcpError::InvalidSublayerPath { sublayer_path, .. } = error {
                    out.insert(sublayer_path.clone());
                }
            }
        }
        out.into_iter().collect()
    }

    pub fn is_invalid_sublayer_identifier(&self, identifier: &str) -> bool {
        self.invalid_sublayer_identifiers()
            .iter()
            .any(|id| id == identifier)
    }

    /// Asset paths of arcs that failed to resolve, with the index paths
    /// that reported them.
    pub fn invalid_asset_paths(&self) -> Vec<(Path, String)> {
        let mut out = Vec::new();
        for (index_path, index) in self.prim_indexes.read().iter() {
            for error in index.errors() {
                if let PcpError::InvalidAssetPath { asset_path, .. } = error {
                    out.push((index_path.clone(), asset_path.clone()));
                }
            }
        }
        out
    }

    pub fn is_invalid_asset_path(&self, asset_path: &str) -> bool {
        self.invalid_asset_paths()
            .iter()
            .any(|(_, reported)| reported == asset_path)
    }

    // ---- change processing ----

    /// Re-read every layer the cache depends on through the provider and
    /// resync the ones that changed.
    pub fn reload(&self) -> AppliedChanges {
        let mut seen = HashSet::new();
        let mut changes = Changes::new();
        for stack in self.registry.live_stacks() {
            for layer in stack.layers() {
                if !seen.insert(layer_key(layer)) {
                    continue;
                }
                if self.registry.provider().reload(layer) {
                    changes.did_resync_layer(layer);
                }
            }
        }
        self.apply_changes(&changes)
    }

    /// Translate a batch of authored edits into invalidation of computed
    /// state. Dropped indexes are recomputed lazily on next use.
    pub fn apply_changes(&self, changes: &Changes) -> AppliedChanges {
        let mut applied = AppliedChanges::default();
        for edit in changes.edits() {
            match edit {
                LayerEdit::SpecAdded { layer, path } | LayerEdit::SpecRemoved { layer, path } => {
                    self.resync_site(layer, &path.prim_path(), &mut applied);
                    if path.is_property_path() {
                        self.drop_dependent_properties(layer, path, &mut applied);
                    }
                }
                LayerEdit::FieldChanged { layer, path, field } => {
                    if field == FieldKey::SubLayers.as_str()
                        || field == FieldKey::SubLayerOffsets.as_str()
                    {
                        self.resync_layer(layer, &mut applied);
                    } else if field == FieldKey::Relocates.as_str() {
                        self.resync_layer(layer, &mut applied);
                    } else if schema::is_significant_field(field) {
                        self.resync_site(layer, &path.prim_path(), &mut applied);
                    } else if path.is_property_path() {
                        self.drop_dependent_properties(layer, path, &mut applied);
                    }
                }
                LayerEdit::SublayersChanged { layer }
                | LayerEdit::RelocatesChanged { layer }
                | LayerEdit::LayerResynced { layer } => {
                    self.resync_layer(layer, &mut applied);
                }
            }
        }
        applied.invalidated_prim_paths.sort();
        applied.invalidated_prim_paths.dedup();
        applied.invalidated_property_paths.sort();
        applied.invalidated_property_paths.dedup();
        applied
    }

    /// A spec-level edit at `site_path` in `layer`: drop every cached index
    /// that composed that site, a descendant of it, or an ancestor whose
    /// subtree spans the edit, together with the dependents' own namespace
    /// subtrees. Descendant indexes computed while the site had no specs
    /// recorded no dependency of their own, so the subtree sweep is what
    /// picks up a newly authored child spec.
    fn resync_site(&self, layer: &LayerHandle, site_path: &Path, applied: &mut AppliedChanges) {
        let stale: Vec<Path> = {
            let deps = self.deps.lock();
            let mut found = Vec::new();
            for stack in deps.layer_stacks_using(layer) {
                found.extend(deps.find(&stack, site_path, DependencyFlags::all(), true));
                for ancestor in site_path.ancestors() {
                    found.extend(deps.find(&stack, &ancestor, DependencyFlags::all(), false));
                }
            }
            found.into_iter().map(|dep| dep.index_path).collect()
        };
        for path in stale {
            self.drop_prim_subtree_reporting(&path, applied);
        }
    }

    /// A structural edit to `layer` itself: stale stacks are purged from
    /// the registry and everything composed through them is dropped. Edits
    /// to the root or session layer flush the whole cache.
    fn resync_layer(&self, layer: &LayerHandle, applied: &mut AppliedChanges) {
        let identifier = self.identifier.read().clone();
        let is_root = Arc::ptr_eq(&identifier.root_layer, layer)
            || identifier
                .session_layer
                .as_ref()
                .is_some_and(|session| Arc::ptr_eq(session, layer));

        self.registry.purge_stacks_using_layer(layer);

        if is_root {
            applied.recomputed_layer_stack = true;
            let dropped = self.flush_all();
            applied.invalidated_prim_paths.extend(dropped.0);
            applied.invalidated_property_paths.extend(dropped.1);
            return;
        }

        if let Some(stack) = self.layer_stack() {
            if stack.has_layer(layer) {
                *self.layer_stack.write() = None;
                applied.recomputed_layer_stack = true;
            }
        }
        let stale: Vec<Path> = {
            let deps = self.deps.lock();
            deps.layer_stacks_using(layer)
                .iter()
                .flat_map(|stack| deps.find(stack, &Path::abs_root(), DependencyFlags::all(), true))
                .map(|dep| dep.index_path)
                .collect()
        };
        for path in stale {
            self.drop_prim_subtree_reporting(&path, applied);
        }
    }

    /// A value-only property edit: only cached property indexes are stale.
    fn drop_dependent_properties(
        &self,
        layer: &LayerHandle,
        property_path: &Path,
        applied: &mut AppliedChanges,
    ) {
        let prim_path = property_path.prim_path();
        let name = property_path.name().to_string();
        let dependent_prims: Vec<Path> = {
            let deps = self.deps.lock();
            deps.layer_stacks_using(layer)
                .iter()
                .flat_map(|stack| deps.find(stack, &prim_path, DependencyFlags::all(), false))
                .map(|dep| dep.index_path)
                .collect()
        };
        let mut properties = self.property_indexes.write();
        for prim in dependent_prims {
            let stale = prim.append_property(&name);
            if properties.remove(&stale).is_some() {
                applied.invalidated_property_paths.push(stale);
            }
        }
    }

    // ---- invalidation plumbing ----

    /// Drop the cached index at `path` along with its property indexes and
    /// dependency entries.
    fn drop_prim_index(&self, path: &Path) {
        self.prim_indexes.write().remove(path);
        self.deps.lock().remove_index(path);
        self.property_indexes
            .write()
            .retain(|property_path, _| property_path.prim_path() != *path);
    }

    /// Drop a stale index and every cached index beneath it in namespace.
    fn drop_prim_subtree_reporting(&self, root: &Path, applied: &mut AppliedChanges) {
        let subtree: Vec<Path> = self
            .prim_indexes
            .read()
            .keys()
            .filter(|cached| cached.has_prefix(root))
            .cloned()
            .collect();
        for path in subtree {
            self.drop_prim_index_reporting(&path, applied);
        }
    }

    fn drop_prim_index_reporting(&self, path: &Path, applied: &mut AppliedChanges) {
        if self.prim_indexes.write().remove(path).is_none() {
            return;
        }
        self.deps.lock().remove_index(path);
        applied.invalidated_prim_paths.push(path.clone());
        self.property_indexes.write().retain(|property_path, _| {
            if property_path.prim_path() == *path {
                applied
                    .invalidated_property_paths
                    .push(property_path.clone());
                false
            } else {
                true
            }
        });
    }

    /// Drop everything computed. Returns the dropped prim and property
    /// index paths.
    fn flush_all(&self) -> (Vec<Path>, Vec<Path>) {
        *self.layer_stack.write() = None;
        let prims: Vec<Path> = std::mem::take(&mut *self.prim_indexes.write())
            .into_keys()
            .collect();
        let properties: Vec<Path> = std::mem::take(&mut *self.property_indexes.write())
            .into_keys()
            .collect();
        *self.deps.lock() = DependencyTracker::new();
        (prims, properties)
    }
}

impl IndexerHost for Cache {
    fn layer_stack_registry(&self) -> &Arc<LayerStackRegistry> {
        &self.registry
    }

    fn is_payload_included(&self, path: &Path) -> bool {
        self.is_payload_included_at(path)
    }

    fn parent_index(&self, path: &Path) -> Option<Arc<PrimIndex>> {
        if path.is_absolute_root_path() || path.is_empty() {
            return None;
        }
        Some(self.compute_prim_index(path))
    }

    fn usd_mode(&self) -> bool {
        self.usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::LayerRegistry;
    use crate::sdf::{path, Layer, Reference};

    fn cache_with(root: &LayerHandle, others: &[&LayerHandle]) -> Cache {
        let provider = LayerRegistry::new();
        provider.insert(root.clone());
        for layer in others {
            provider.insert((*layer).clone());
        }
        Cache::new(LayerStackIdentifier::new(root.clone()), provider)
    }

    #[test]
    fn prim_indexes_are_computed_once() {
        let root = Layer::create("root.layer");
        root.add_spec(&path("/World").unwrap(), SpecType::Prim);
        let cache = cache_with(&root, &[]);

        let first = cache.compute_prim_index(&path("/World").unwrap());
        let second = cache.compute_prim_index(&path("/World").unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.prim_index_computation_count(), 1);
        assert!(cache.find_prim_index(&path("/World").unwrap()).is_some());
        assert!(cache.find_prim_index(&path("/Other").unwrap()).is_none());
    }

    #[test]
    fn spec_edit_invalidates_dependents_through_reference() {
        let root = Layer::create("root.layer");
        let model = Layer::create("model.layer");
        model.add_spec(&path("/Model").unwrap(), SpecType::Prim);
        root.set_field(
            &path("/World").unwrap(),
            FieldKey::References,
            Value::ReferenceList(vec![Reference {
                asset_path: "model.layer".to_string(),
                prim_path: path("/Model").unwrap(),
                ..Default::default()
            }]),
        );
        let cache = cache_with(&root, &[&model]);
        cache.compute_prim_index(&path("/World").unwrap());

        model.add_spec(&path("/Model/Arm").unwrap(), SpecType::Prim);
        let mut changes = Changes::new();
        changes.did_add_spec(&model, &path("/Model/Arm").unwrap());
        let applied = cache.apply_changes(&changes);

        // /Model/Arm is below the referenced site, so /World is stale.
        assert_eq!(
            applied.invalidated_prim_paths,
            vec![path("/World").unwrap()]
        );
        assert!(cache.find_prim_index(&path("/World").unwrap()).is_none());
        cache.compute_prim_index(&path("/World").unwrap());
        assert_eq!(cache.prim_index_computation_count(), 2);
    }

    #[test]
    fn unrelated_edits_leave_the_cache_alone() {
        let root = Layer::create("root.layer");
        let other = Layer::create("other.layer");
        root.add_spec(&path("/World").unwrap(), SpecType::Prim);
        let cache = cache_with(&root, &[&other]);
        cache.compute_prim_index(&path("/World").unwrap());

        let mut changes = Changes::new();
        changes.did_add_spec(&other, &path("/Elsewhere").unwrap());
        let applied = cache.apply_changes(&changes);

        assert!(applied.is_empty());
        assert!(cache.find_prim_index(&path("/World").unwrap()).is_some());
    }

    #[test]
    fn root_layer_edit_flushes_everything() {
        let root = Layer::create("root.layer");
        root.add_spec(&path("/World").unwrap(), SpecType::Prim);
        let cache = cache_with(&root, &[]);
        cache.compute_prim_index(&path("/World").unwrap());
        cache.compute_property_index(&path("/World.x").unwrap());

        let mut changes = Changes::new();
        changes.did_change_sublayers(&root);
        let applied = cache.apply_changes(&changes);

        assert!(applied.recomputed_layer_stack);
        assert_eq!(applied.invalidated_prim_paths.len(), 1);
        assert_eq!(applied.invalidated_property_paths.len(), 1);
        assert!(cache.layer_stack().is_none());
    }

    #[test]
    fn property_value_edit_drops_only_property_indexes() {
        let root = Layer::create("root.layer");
        let prop = path("/World.x").unwrap();
        root.set_field(&prop, FieldKey::Default, Value::Int(1));
        let cache = cache_with(&root, &[]);
        cache.compute_prim_index(&path("/World").unwrap());
        cache.compute_property_index(&prop);

        let mut changes = Changes::new();
        changes.did_change_field(&root, &prop, FieldKey::Default.as_str());
        let applied = cache.apply_changes(&changes);

        assert_eq!(applied.invalidated_property_paths, vec![prop.clone()]);
        assert!(applied.invalidated_prim_paths.is_empty());
        assert!(cache.find_prim_index(&path("/World").unwrap()).is_some());
        assert!(cache.find_property_index(&prop).is_none());
    }

    #[test]
    fn muting_a_referenced_layer_drops_the_dependent_index() {
        let root = Layer::create("root.layer");
        let model = Layer::create("model.layer");
        model.add_spec(&path("/Model").unwrap(), SpecType::Prim);
        root.set_field(
            &path("/World").unwrap(),
            FieldKey::References,
            Value::ReferenceList(vec![Reference {
                asset_path: "model.layer".to_string(),
                prim_path: path("/Model").unwrap(),
                ..Default::default()
            }]),
        );
        let cache = cache_with(&root, &[&model]);
        let world = path("/World").unwrap();
        assert_eq!(cache.compute_prim_index(&world).node_count(), 2);

        let (muted, _) = cache.request_layer_muting(&["model.layer".to_string()], &[]);
        assert_eq!(muted, vec!["model.layer".to_string()]);
        assert!(cache.find_prim_index(&world).is_none());

        let index = cache.compute_prim_index(&world);
        assert_eq!(index.node_count(), 1);
        assert!(matches!(index.errors()[0], PcpError::MutedAssetPath { .. }));

        cache.request_layer_muting(&[], &["model.layer".to_string()]);
        assert_eq!(cache.compute_prim_index(&world).node_count(), 2);
    }

    #[test]
    fn root_layer_cannot_be_muted() {
        let root = Layer::create("root.layer");
        let cache = cache_with(&root, &[]);
        let (muted, _) = cache.request_layer_muting(&["root.layer".to_string()], &[]);
        assert!(muted.is_empty());
        assert!(!cache.is_layer_muted("root.layer"));
    }

    #[test]
    fn payload_requests_invalidate_gated_indexes() {
        let root = Layer::create("root.layer");
        let heavy = Layer::create("heavy.layer");
        heavy.add_spec(&path("/Heavy").unwrap(), SpecType::Prim);
        root.set_field(
            &path("/World").unwrap(),
            FieldKey::Payload,
            Value::PayloadList(vec![crate::sdf::Payload {
                asset_path: "heavy.layer".to_string(),
                prim_path: path("/Heavy").unwrap(),
                layer_offset: None,
            }]),
        );
        let cache = cache_with(&root, &[&heavy]);
        let world = path("/World").unwrap();

        assert!(cache.compute_prim_index(&world).node(1).inert);
        cache.request_payloads(&[world.clone()], &[]);
        assert!(cache.find_prim_index(&world).is_none());
        assert!(!cache.compute_prim_index(&world).node(1).inert);
        assert!(cache.is_payload_included_at(&path("/World/Deep").unwrap()));

        cache.request_payloads(&[], &[world.clone()]);
        assert!(cache.compute_prim_index(&world).node(1).inert);
    }

    #[test]
    fn variant_fallback_changes_flush_variant_users() {
        let root = Layer::create("root.layer");
        let world = path("/World").unwrap();
        root.add_spec(&world, SpecType::Prim);
        root.set_field(
            &world,
            FieldKey::VariantSetNames,
            Value::StringVec(vec!["lod".to_string()]),
        );
        root.add_spec(&world.append_variant_selection("lod", "low"), SpecType::Prim);
        root.add_spec(&world.append_variant_selection("lod", "high"), SpecType::Prim);

        let cache = cache_with(&root, &[]);
        assert_eq!(cache.compute_prim_index(&world).node_count(), 1);

        cache.set_variant_fallbacks(BTreeMap::from([(
            "lod".to_string(),
            vec!["high".to_string()],
        )]));
        let index = cache.compute_prim_index(&world);
        assert_eq!(index.node_count(), 2);
        assert_eq!(
            index.node(1).site.path,
            world.append_variant_selection("lod", "high")
        );

        // Setting the same table again is a no-op.
        let before = cache.prim_index_computation_count();
        cache.set_variant_fallbacks(cache.variant_fallbacks());
        assert_eq!(cache.prim_index_computation_count(), before);
        assert!(cache.find_prim_index(&world).is_some());
    }

    #[test]
    fn relationship_targets_translate_into_root_namespace() {
        let root = Layer::create("root.layer");
        let model = Layer::create("model.layer");
        let rel = path("/Model.looks").unwrap();
        model.set_field(
            &rel,
            FieldKey::TargetPaths,
            Value::PathVec(vec![
                path("/Model/Looks/Red").unwrap(),
                path("/Outside").unwrap(),
            ]),
        );
        root.set_field(
            &path("/World").unwrap(),
            FieldKey::References,
            Value::ReferenceList(vec![Reference {
                asset_path: "model.layer".to_string(),
                prim_path: path("/Model").unwrap(),
                ..Default::default()
            }]),
        );
        let cache = cache_with(&root, &[&model]);

        let (targets, errors) =
            cache.compute_relationship_target_paths(&path("/World.looks").unwrap());
        assert_eq!(targets, vec![path("/World/Looks/Red").unwrap()]);
        assert!(matches!(errors[0], PcpError::InvalidTargetPath { .. }));
    }

    #[test]
    fn relationship_targets_survive_index_reshapes() {
        let root = Layer::create("root.layer");
        let model = Layer::create("model.layer");
        let rel = path("/Model.looks").unwrap();
        model.set_field(
            &rel,
            FieldKey::TargetPaths,
            Value::PathVec(vec![path("/Model/Looks/Red").unwrap()]),
        );
        root.set_field(
            &path("/World").unwrap(),
            FieldKey::References,
            Value::ReferenceList(vec![Reference {
                asset_path: "model.layer".to_string(),
                prim_path: path("/Model").unwrap(),
                ..Default::default()
            }]),
        );
        let cache = cache_with(&root, &[&model]);

        let looks = path("/World.looks").unwrap();
        let (targets, _) = cache.compute_relationship_target_paths(&looks);
        assert_eq!(targets, vec![path("/World/Looks/Red").unwrap()]);

        // An inherit arc inserted above the reference shifts every node's
        // arena position.
        root.add_spec(&path("/_class").unwrap(), SpecType::Prim);
        root.set_field(
            &path("/World").unwrap(),
            FieldKey::InheritPaths,
            Value::PathVec(vec![path("/_class").unwrap()]),
        );
        let mut changes = Changes::new();
        changes.did_change_field(&root, &path("/World").unwrap(), FieldKey::InheritPaths.as_str());
        cache.apply_changes(&changes);

        let (targets, _) = cache.compute_relationship_target_paths(&looks);
        assert_eq!(targets, vec![path("/World/Looks/Red").unwrap()]);
    }

    #[test]
    fn parallel_computation_matches_serial() {
        let root = Layer::create("root.layer");
        let mut paths = Vec::new();
        for i in 0..32 {
            let p = path(&format!("/Prim{i}")).unwrap();
            root.add_spec(&p, SpecType::Prim);
            paths.push(p);
        }
        let cache = cache_with(&root, &[]);

        let indexes = cache.compute_prim_indexes_in_parallel(&paths);
        assert_eq!(indexes.len(), 32);
        for (p, index) in paths.iter().zip(&indexes) {
            assert_eq!(index.path(), p);
            assert!(Arc::ptr_eq(index, &cache.compute_prim_index(p)));
        }
        assert_eq!(cache.prim_index_computation_count(), 32);
    }
}

//! Reverse dependency tables: which cached prim indexes consumed which
//! composition sites.
//!
//! Every node of a cached prim index contributes one entry keyed by its
//! (layer stack, site path). Change processing inverts authored edits
//! through these tables to find the indexes to drop, translating paths
//! through the recorded map functions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bitflags::bitflags;

use crate::layer_stack::LayerStackHandle;
use crate::map_function::MapFunction;
use crate::prim_index::PrimIndex;
use crate::sdf::{LayerHandle, Path};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DependencyFlags: u8 {
        /// The arc was authored on the indexed prim itself.
        const DIRECT = 1 << 0;
        /// The arc was projected from an ancestor's index.
        const ANCESTRAL = 1 << 1;
    }
}

/// One site dependency of a cached prim index.
#[derive(Debug, Clone)]
pub struct Dependency {
    /// Path of the prim index that depends on the site.
    pub index_path: Path,
    /// The site path inside the depended-on layer stack.
    pub site_path: Path,
    /// Maps site namespace paths into the index namespace.
    pub map_func: MapFunction,
    pub flags: DependencyFlags,
}

fn stack_key(stack: &LayerStackHandle) -> usize {
    Arc::as_ptr(stack) as usize
}

#[derive(Default)]
pub struct DependencyTracker {
    /// stack key -> site path -> index path -> dependency data.
    by_site: HashMap<usize, BTreeMap<Path, HashMap<Path, (MapFunction, DependencyFlags)>>>,
    /// index path -> the (stack key, site path) entries it planted.
    by_index: HashMap<Path, Vec<(usize, Path)>>,
    /// Live handles for every stack key in `by_site`.
    stacks: HashMap<usize, LayerStackHandle>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        DependencyTracker::default()
    }

    /// Record every node of a freshly cached index.
    pub fn add_index(&mut self, index: &PrimIndex) {
        let index_path = index.path().clone();
        let mut planted = Vec::new();
        for node_index in index.nodes_in_strength_order() {
            let node = index.node(node_index);
            let key = stack_key(&node.site.layer_stack);
            self.stacks
                .entry(key)
                .or_insert_with(|| node.site.layer_stack.clone());
            let flags = if node.ancestral {
                DependencyFlags::ANCESTRAL
            } else {
                DependencyFlags::DIRECT
            };
            let per_index = self
                .by_site
                .entry(key)
                .or_default()
                .entry(node.site.path.clone())
                .or_default();
            match per_index.get_mut(&index_path) {
                Some((_, existing_flags)) => *existing_flags |= flags,
                None => {
                    per_index.insert(index_path.clone(), (node.map_to_root.clone(), flags));
                    planted.push((key, node.site.path.clone()));
                }
            }
        }
        self.by_index.insert(index_path, planted);
    }

    /// Drop every entry planted by the index at `index_path`.
    pub fn remove_index(&mut self, index_path: &Path) {
        let Some(planted) = self.by_index.remove(index_path) else {
            return;
        };
        for (key, site_path) in planted {
            let Some(sites) = self.by_site.get_mut(&key) else {
                continue;
            };
            if let Some(per_index) = sites.get_mut(&site_path) {
                per_index.remove(index_path);
                if per_index.is_empty() {
                    sites.remove(&site_path);
                }
            }
            if sites.is_empty() {
                self.by_site.remove(&key);
                self.stacks.remove(&key);
            }
        }
    }

    /// All dependencies on `site_path` within `stack`. With `recurse`,
    /// dependencies on descendant site paths are included too.
    pub fn find(
        &self,
        stack: &LayerStackHandle,
        site_path: &Path,
        mask: DependencyFlags,
        recurse: bool,
    ) -> Vec<Dependency> {
        let Some(sites) = self.by_site.get(&stack_key(stack)) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (path, per_index) in sites {
            let matches = if recurse {
                path.has_prefix(site_path)
            } else {
                path == site_path
            };
            if !matches {
                continue;
            }
            for (index_path, (map_func, flags)) in per_index {
                if !flags.intersects(mask) {
                    continue;
                }
                out.push(Dependency {
                    index_path: index_path.clone(),
                    site_path: path.clone(),
                    map_func: map_func.clone(),
                    flags: *flags,
                });
            }
        }
        out
    }

    /// All tracked stacks that contain the given layer.
    pub fn layer_stacks_using(&self, layer: &LayerHandle) -> Vec<LayerStackHandle> {
        self.stacks
            .values()
            .filter(|stack| stack.has_layer(layer))
            .cloned()
            .collect()
    }

    /// All tracked stacks that use or mute a layer with this identifier.
    pub fn layer_stacks_using_identifier(&self, identifier: &str) -> Vec<LayerStackHandle> {
        self.stacks
            .values()
            .filter(|stack| {
                stack.muted_layers().contains(identifier)
                    || stack.layers().iter().any(|l| l.identifier() == identifier)
            })
            .cloned()
            .collect()
    }

    /// Root layer identifiers of every tracked stack.
    pub fn used_root_layers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        for stack in self.stacks.values() {
            seen.insert(stack.identifier().root_layer.identifier().to_string());
        }
        let mut out: Vec<String> = seen.into_iter().collect();
        out.sort();
        out
    }

    /// Identifiers of every layer any cached index depends on.
    pub fn used_layers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        for stack in self.stacks.values() {
            for layer in stack.layers() {
                seen.insert(layer.identifier().to_string());
            }
        }
        let mut out: Vec<String> = seen.into_iter().collect();
        out.sort();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer_stack::{LayerStackIdentifier, LayerStackRegistry};
    use crate::prim_index::{ArcType, Site};
    use crate::resolver::LayerRegistry;
    use crate::sdf::{path, Layer, LayerOffset};

    fn stack_for(layer: &crate::sdf::LayerHandle) -> LayerStackHandle {
        let provider = LayerRegistry::new();
        provider.insert(layer.clone());
        let registry = LayerStackRegistry::new(provider);
        registry
            .compute(&LayerStackIdentifier::new(layer.clone()))
            .0
    }

    fn index_with_reference(
        root_stack: &LayerStackHandle,
        model_stack: &LayerStackHandle,
    ) -> PrimIndex {
        let world = path("/World").unwrap();
        let mut index = PrimIndex::new(world.clone(), Site::new(root_stack.clone(), world.clone()));
        index.add_node(
            0,
            ArcType::Reference,
            Site::new(model_stack.clone(), path("/Model").unwrap()),
            MapFunction::create(
                vec![(path("/Model").unwrap(), world)],
                LayerOffset::default(),
            ),
            false,
            false,
        );
        index
    }

    #[test]
    fn finds_dependencies_by_site() {
        let root_stack = stack_for(&Layer::create("root.layer"));
        let model_stack = stack_for(&Layer::create("model.layer"));
        let index = index_with_reference(&root_stack, &model_stack);

        let mut tracker = DependencyTracker::new();
        tracker.add_index(&index);

        let deps = tracker.find(
            &model_stack,
            &path("/Model").unwrap(),
            DependencyFlags::all(),
            false,
        );
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].index_path, path("/World").unwrap());
        assert_eq!(
            deps[0]
                .map_func
                .map_source_to_target(&path("/Model/Arm").unwrap()),
            Some(path("/World/Arm").unwrap())
        );
        assert_eq!(deps[0].flags, DependencyFlags::DIRECT);

        // Descendant sites only match when recursing.
        assert!(tracker
            .find(&model_stack, &path("/Model/Arm").unwrap(), DependencyFlags::all(), false)
            .is_empty());
        assert_eq!(
            tracker
                .find(&model_stack, &Path::abs_root(), DependencyFlags::all(), true)
                .len(),
            1
        );
    }

    #[test]
    fn remove_index_clears_tables() {
        let root_stack = stack_for(&Layer::create("root.layer"));
        let model_stack = stack_for(&Layer::create("model.layer"));
        let index = index_with_reference(&root_stack, &model_stack);

        let mut tracker = DependencyTracker::new();
        tracker.add_index(&index);
        assert_eq!(tracker.used_layers(), vec!["model.layer", "root.layer"]);

        tracker.remove_index(&path("/World").unwrap());
        assert!(tracker.is_empty());
        assert!(tracker
            .find(&model_stack, &path("/Model").unwrap(), DependencyFlags::all(), false)
            .is_empty());
        assert!(tracker.used_layers().is_empty());
    }

    #[test]
    fn tracks_stacks_per_layer() {
        let root = Layer::create("root.layer");
        let root_stack = stack_for(&root);
        let model = Layer::create("model.layer");
        let model_stack = stack_for(&model);
        let index = index_with_reference(&root_stack, &model_stack);

        let mut tracker = DependencyTracker::new();
        tracker.add_index(&index);

        assert_eq!(tracker.layer_stacks_using(&model).len(), 1);
        assert!(Arc::ptr_eq(
            &tracker.layer_stacks_using(&model)[0],
            &model_stack
        ));
        assert_eq!(tracker.layer_stacks_using_identifier("root.layer").len(), 1);
    }
}

//! Prim index construction.
//!
//! Expansion walks each node's authored composition fields in strength
//! order: local opinions, then inherits, variant selections, relocations,
//! references, payloads, and specializes. Every arc that opens another site
//! becomes a child node, recursively expanded. Errors never abort the walk;
//! the offending arc is skipped and the error recorded on the index.

use std::sync::Arc;

use log::debug;

use crate::error::PcpError;
use crate::layer_stack::{LayerStackHandle, LayerStackIdentifier, LayerStackRegistry};
use crate::map_function::MapFunction;
use crate::prim_index::{ArcType, PrimIndex, Site};
use crate::sdf::{schema::FieldKey, LayerOffset, Path, Permission, Value};

/// What the indexer needs from its owning cache: the interning registry,
/// the payload inclusion set, and already-computed ancestor indexes.
pub trait IndexerHost {
    fn layer_stack_registry(&self) -> &Arc<LayerStackRegistry>;

    /// Whether payload arcs discovered while composing `path` should be
    /// expanded.
    fn is_payload_included(&self, path: &Path) -> bool;

    /// The composed index of `path`'s parent prim, or `None` when `path`
    /// has no composed ancestor.
    fn parent_index(&self, path: &Path) -> Option<Arc<PrimIndex>>;

    /// In usd mode, inherits, specializes, relocates, and permissions are
    /// not evaluated.
    fn usd_mode(&self) -> bool {
        false
    }
}

/// Compose the index for `path` in the given root layer stack.
pub fn build_prim_index(
    host: &dyn IndexerHost,
    root_stack: &LayerStackHandle,
    path: &Path,
) -> PrimIndex {
    debug!("computing prim index for <{path}>");
    let index = PrimIndex::new(path.clone(), Site::new(root_stack.clone(), path.clone()));
    let mut indexer = Indexer {
        host,
        usd: host.usd_mode(),
        index,
    };
    indexer.expand(0);
    indexer.add_ancestral_arcs();
    if !indexer.usd {
        indexer.enforce_permissions();
    }
    indexer.index
}

struct Indexer<'a> {
    host: &'a dyn IndexerHost,
    usd: bool,
    index: PrimIndex,
}

impl Indexer<'_> {
    /// Expand every authored arc at `node`, strongest kind first.
    fn expand(&mut self, node: usize) {
        if !self.usd {
            self.expand_inherits_or_specializes(node, ArcType::Inherit);
        }
        self.expand_variants(node);
        if !self.usd {
            self.expand_relocate(node);
        }
        self.expand_references(node);
        self.expand_payloads(node);
        if !self.usd {
            self.expand_inherits_or_specializes(node, ArcType::Specialize);
        }
    }

    fn site_of(&self, node: usize) -> (LayerStackHandle, Path) {
        let site = &self.index.node(node).site;
        (site.layer_stack.clone(), site.path.clone())
    }

    /// The strongest authored value for `key` at `path`, with the index of
    /// the layer that authored it.
    fn strongest_field(
        stack: &LayerStackHandle,
        path: &Path,
        key: FieldKey,
    ) -> Option<(usize, Value)> {
        stack
            .layers()
            .iter()
            .enumerate()
            .find_map(|(i, layer)| layer.field(path, key.as_str()).map(|v| (i, v)))
    }

    /// Whether the strongest authored permission at `path` is private.
    fn is_private(stack: &LayerStackHandle, path: &Path) -> bool {
        for layer in stack.layers() {
            if layer.has_field(path, FieldKey::Permission.as_str()) {
                return layer.permission(path) == Permission::Private;
            }
        }
        false
    }

    /// A node whose site is marked private restricts every weaker node:
    /// their specs may no longer contribute opinions. Runs once over the
    /// finished graph, strongest first.
    fn enforce_permissions(&mut self) {
        let mut restricted = false;
        let mut denied = Vec::new();
        for node_index in self.index.nodes_in_strength_order() {
            let node = self.index.node(node_index);
            if node.inert {
                continue;
            }
            if restricted && node.has_specs {
                denied.push((node_index, node.site.path.clone()));
                continue;
            }
            if Self::is_private(&node.site.layer_stack, &node.site.path) {
                restricted = true;
            }
        }
        for (node_index, site_path) in denied {
            self.index
                .add_error(PcpError::PrimPermissionDenied { site: site_path });
            self.index.mark_inert(node_index);
        }
    }

    /// Intern the stack rooted at an arc's target layer, carrying the
    /// referencing stack's resolver context and variant fallbacks.
    fn target_stack(
        &mut self,
        from: &LayerStackHandle,
        root_layer: crate::sdf::LayerHandle,
    ) -> LayerStackHandle {
        let identifier = LayerStackIdentifier {
            root_layer,
            session_layer: None,
            resolver_context: from.identifier().resolver_context.clone(),
            variant_fallbacks: from.identifier().variant_fallbacks.clone(),
        };
        let (stack, errors) = self.host.layer_stack_registry().compute(&identifier);
        for error in errors {
            self.index.add_error(error);
        }
        stack
    }

    /// Add one arc node after cycle and permission checks. Returns the new
    /// node, or `None` when the arc was refused.
    fn add_arc(
        &mut self,
        parent: usize,
        arc_type: ArcType,
        site: Site,
        map_to_parent: MapFunction,
        inert: bool,
    ) -> Option<usize> {
        if self.index.site_on_chain_to_root(parent, &site) {
            let mut chain = self.index.chain_to_root(parent);
            chain.push(site.path.clone());
            self.index.add_error(PcpError::ArcCycle {
                site: site.path,
                chain,
            });
            return None;
        }
        if !self.usd && !inert && Self::is_private(&site.layer_stack, &site.path) {
            self.index.add_error(PcpError::ArcPermissionDenied {
                site: self.index.node(parent).site.path.clone(),
                target: site.path,
            });
            return None;
        }
        let node = self
            .index
            .add_node(parent, arc_type, site, map_to_parent, inert, false);
        if !inert {
            self.expand(node);
        }
        Some(node)
    }

    /// Inherits and specializes share a shape: a list of prim paths in the
    /// same layer stack.
    fn expand_inherits_or_specializes(&mut self, node: usize, arc_type: ArcType) {
        let (stack, path) = self.site_of(node);
        let key = match arc_type {
            ArcType::Inherit => FieldKey::InheritPaths,
            _ => FieldKey::Specializes,
        };
        let Some((_, value)) = Self::strongest_field(&stack, &path, key) else {
            return;
        };
        let Some(targets) = value.try_as_path_vec_ref().map(|v| v.to_vec()) else {
            return;
        };
        for target in targets {
            if !target.is_prim_path() {
                self.index
                    .add_error(PcpError::InvalidPrimPath { site: path.clone() });
                continue;
            }
            let map = MapFunction::create(
                vec![(target.clone(), path.clone())],
                LayerOffset::default(),
            );
            self.add_arc(
                node,
                arc_type,
                Site::new(stack.clone(), target),
                map,
                false,
            );
        }
    }

    fn expand_variants(&mut self, node: usize) {
        let (stack, path) = self.site_of(node);

        // Union of authored variant set names across all layers, strongest
        // layer's ordering first.
        let mut sets: Vec<String> = Vec::new();
        for layer in stack.layers() {
            if let Some(value) = layer.field(&path, FieldKey::VariantSetNames.as_str()) {
                if let Some(names) = value.try_as_string_vec_ref() {
                    for name in names {
                        if !sets.iter().any(|s| s == name) {
                            sets.push(name.clone());
                        }
                    }
                }
            }
        }

        for set in sets {
            self.index.record_evaluated_variant_set(&set);

            let mut options = std::collections::BTreeSet::new();
            for layer in stack.layers() {
                options.extend(layer.variant_options(&path, &set));
            }

            // Strongest authored selection, if any.
            let authored = stack.layers().iter().find_map(|layer| {
                match layer.field(&path, FieldKey::VariantSelection.as_str()) {
                    Some(Value::VariantSelectionMap(map)) => map.get(&set).cloned(),
                    _ => None,
                }
            });

            let selection = match authored {
                Some(selection) if options.contains(&selection) => Some(selection),
                Some(selection) => {
                    // An authored selection is authoritative even when it
                    // names nothing; fallbacks do not rescue it.
                    self.index.add_error(PcpError::InvalidVariantSelection {
                        site: path.clone(),
                        set: set.clone(),
                        selection,
                    });
                    None
                }
                None => Self::best_fallback(&stack, &set, &options),
            };
            let Some(selection) = selection else {
                continue;
            };

            let variant_path = path.append_variant_selection(&set, &selection);
            let map = MapFunction::create(
                vec![(variant_path.clone(), path.clone())],
                LayerOffset::default(),
            );
            self.add_arc(
                node,
                ArcType::Variant,
                Site::new(stack.clone(), variant_path),
                map,
                false,
            );
        }
    }

    /// The first fallback selection that names an authored option.
    fn best_fallback(
        stack: &LayerStackHandle,
        set: &str,
        options: &std::collections::BTreeSet<String>,
    ) -> Option<String> {
        stack
            .identifier()
            .variant_fallbacks
            .get(set)?
            .iter()
            .find(|fallback| options.contains(*fallback))
            .cloned()
    }

    /// If this node's path lies under a relocation target in its stack,
    /// add an arc back to the pre-relocation source.
    fn expand_relocate(&mut self, node: usize) {
        let (stack, path) = self.site_of(node);
        if !stack.has_relocates() {
            return;
        }
        // Longest matching target prefix wins.
        let best = stack
            .relocates_target_to_source()
            .iter()
            .filter(|(target, _)| path.has_prefix(target))
            .max_by_key(|(target, _)| target.as_str().len());
        let Some((target, source)) = best else {
            return;
        };
        let Some(source_path) = path.replace_prefix(target, source) else {
            return;
        };
        let map = MapFunction::create(
            vec![(source_path.clone(), path.clone())],
            LayerOffset::default(),
        );
        self.add_arc(
            node,
            ArcType::Relocate,
            Site::new(stack.clone(), source_path),
            map,
            false,
        );
    }

    fn expand_references(&mut self, node: usize) {
        let (stack, path) = self.site_of(node);
        let mut arcs = Vec::new();
        for (layer_index, layer) in stack.layers().iter().enumerate() {
            if let Some(Value::ReferenceList(refs)) =
                layer.field(&path, FieldKey::References.as_str())
            {
                for reference in refs {
                    arcs.push(ResolvedArc {
                        asset_path: reference.asset_path,
                        prim_path: reference.prim_path,
                        offset: reference.layer_offset,
                        layer_index,
                    });
                }
            }
        }
        for arc in arcs {
            self.expand_reference_like(node, &stack, &path, arc, ArcType::Reference, true);
        }
    }

    fn expand_payloads(&mut self, node: usize) {
        let (stack, path) = self.site_of(node);
        let mut arcs = Vec::new();
        for (layer_index, layer) in stack.layers().iter().enumerate() {
            if let Some(Value::PayloadList(payloads)) =
                layer.field(&path, FieldKey::Payload.as_str())
            {
                for payload in payloads {
                    arcs.push(ResolvedArc {
                        asset_path: payload.asset_path,
                        prim_path: payload.prim_path,
                        offset: payload.layer_offset.unwrap_or_default(),
                        layer_index,
                    });
                }
            }
        }
        if arcs.is_empty() {
            return;
        }
        let included = self.host.is_payload_included(self.index.path());
        for arc in arcs {
            self.expand_reference_like(node, &stack, &path, arc, ArcType::Payload, included);
        }
    }

    /// References and payloads are shaped alike: resolve the target layer,
    /// pick the target prim, open a new layer stack, and map the target
    /// namespace onto this node's namespace.
    fn expand_reference_like(
        &mut self,
        node: usize,
        stack: &LayerStackHandle,
        path: &Path,
        arc: ResolvedArc,
        arc_type: ArcType,
        expanded: bool,
    ) {
        let registry = Arc::clone(self.host.layer_stack_registry());
        let (target_stack, target_path) = if arc.asset_path.is_empty() {
            // Internal arc: a target within the same layer stack. There is
            // no separate root layer, so the prim path is required.
            if arc.prim_path.is_empty() {
                self.index
                    .add_error(PcpError::InvalidPrimPath { site: path.clone() });
                return;
            }
            (stack.clone(), arc.prim_path)
        } else {
            let anchor = &stack.layers()[arc.layer_index];
            let context = &stack.identifier().resolver_context;
            let Some(resolved) = registry
                .provider()
                .resolve(anchor, &arc.asset_path, context)
            else {
                self.index.add_error(PcpError::InvalidAssetPath {
                    site: path.clone(),
                    asset_path: arc.asset_path,
                });
                return;
            };
            if registry.is_layer_muted(&resolved) {
                // Muted targets are silently absent from the graph; only
                // the error records that an arc was here.
                self.index.add_error(PcpError::MutedAssetPath {
                    site: path.clone(),
                    asset_path: resolved,
                });
                return;
            }
            let Some(target_layer) = registry.provider().find_or_open(&resolved, context) else {
                self.index.add_error(PcpError::InvalidAssetPath {
                    site: path.clone(),
                    asset_path: arc.asset_path,
                });
                return;
            };
            let target_path = if arc.prim_path.is_empty() {
                match target_layer.default_prim() {
                    Some(default) => default,
                    None => {
                        self.index
                            .add_error(PcpError::InvalidPrimPath { site: path.clone() });
                        return;
                    }
                }
            } else {
                arc.prim_path
            };
            (self.target_stack(stack, target_layer), target_path)
        };

        if !target_path.is_prim_path() {
            self.index
                .add_error(PcpError::InvalidPrimPath { site: path.clone() });
            return;
        }

        let anchor_offset = stack.layer_offset(arc.layer_index).unwrap_or_default();
        let map = MapFunction::create(
            vec![(target_path.clone(), path.clone())],
            anchor_offset.compose(&arc.offset),
        );
        self.add_arc(
            node,
            arc_type,
            Site::new(target_stack, target_path),
            map,
            !expanded,
        );
    }

    /// Project the parent prim's non-root nodes onto this prim, so that
    /// opinions for this prim authored inside ancestral arcs contribute.
    fn add_ancestral_arcs(&mut self) {
        let path = self.index.path().clone();
        if path.is_absolute_root_path() || path.is_empty() {
            return;
        }
        let parent_path = path.parent();
        if parent_path.is_absolute_root_path() {
            return;
        }
        let Some(parent_index) = self.host.parent_index(&parent_path) else {
            return;
        };
        for parent_node_index in parent_index.nodes_in_strength_order() {
            if parent_node_index == 0 {
                continue;
            }
            let parent_node = parent_index.node(parent_node_index);
            if parent_node.map_to_root.is_null() {
                continue;
            }
            let Some(site_path) = parent_node.map_to_root.map_target_to_source(&path) else {
                continue;
            };
            let site = Site::new(parent_node.site.layer_stack.clone(), site_path.clone());
            if !site.has_specs() {
                continue;
            }
            let map = MapFunction::create(
                vec![(site_path, path.clone())],
                parent_node.map_to_root.time_offset(),
            );
            let node = self.index.add_node(
                0,
                parent_node.arc_type,
                site,
                map,
                parent_node.inert,
                true,
            );
            if !parent_node.inert {
                self.expand(node);
            }
        }
    }
}

struct ResolvedArc {
    asset_path: String,
    prim_path: Path,
    offset: LayerOffset,
    layer_index: usize,
}

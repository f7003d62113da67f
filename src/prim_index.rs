//! The prim index: a graph of composition arcs describing every site that
//! contributes opinions to a single prim.
//!
//! Nodes live in a flat arena owned by the [`PrimIndex`]; edges are arena
//! indices. The graph is built once by the indexer and is immutable
//! afterwards, so it can be shared freely behind an `Arc`.

use std::fmt;
use std::sync::Arc;

use crate::error::PcpErrorVector;
use crate::layer_stack::LayerStackHandle;
use crate::map_function::MapFunction;
use crate::sdf::{LayerHandle, Path};

/// Kinds of composition arcs, declared strongest first. A node's own site
/// is always stronger than any of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArcType {
    Root,
    Inherit,
    Variant,
    Relocate,
    Reference,
    Payload,
    Specialize,
}

impl ArcType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArcType::Root => "root",
            ArcType::Inherit => "inherit",
            ArcType::Variant => "variant",
            ArcType::Relocate => "relocate",
            ArcType::Reference => "reference",
            ArcType::Payload => "payload",
            ArcType::Specialize => "specialize",
        }
    }
}

/// A composition site: a prim path within a particular layer stack.
#[derive(Clone)]
pub struct Site {
    pub layer_stack: LayerStackHandle,
    pub path: Path,
}

impl Site {
    pub fn new(layer_stack: LayerStackHandle, path: Path) -> Self {
        Site { layer_stack, path }
    }

    /// Whether any layer of the stack has a spec at this site's path.
    pub fn has_specs(&self) -> bool {
        self.layer_stack
            .layers()
            .iter()
            .any(|layer| layer.has_spec(&self.path))
    }
}

impl PartialEq for Site {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.layer_stack, &other.layer_stack) && self.path == other.path
    }
}

impl Eq for Site {}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{}@<{}>",
            self.layer_stack
                .layers()
                .first()
                .map(|l| l.identifier())
                .unwrap_or(""),
            self.path
        )
    }
}

/// One node of the arc graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub arc_type: ArcType,
    pub site: Site,
    /// Maps paths in this node's namespace into the parent node's namespace.
    pub map_to_parent: MapFunction,
    /// Composed mapping all the way to the root node's namespace.
    pub map_to_root: MapFunction,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Inert nodes mark structure without contributing opinions, e.g. a
    /// payload arc whose payload is not included.
    pub inert: bool,
    /// Whether any layer in the node's stack has a spec at the node's path.
    pub has_specs: bool,
    /// Introduced while composing an ancestor rather than this prim itself.
    pub ancestral: bool,
}

/// The computed index for one prim path.
#[derive(Debug, Clone)]
pub struct PrimIndex {
    path: Path,
    nodes: Vec<Node>,
    errors: PcpErrorVector,
    has_payload_nodes: bool,
    /// Variant sets whose selections were evaluated while building this
    /// index. Non-empty means the index depends on variant fallbacks.
    evaluated_variant_sets: Vec<String>,
}

impl PrimIndex {
    pub fn new(path: Path, root_site: Site) -> Self {
        let has_specs = root_site.has_specs();
        PrimIndex {
            path,
            nodes: vec![Node {
                arc_type: ArcType::Root,
                site: root_site,
                map_to_parent: MapFunction::identity(),
                map_to_root: MapFunction::identity(),
                parent: None,
                children: Vec::new(),
                inert: false,
                has_specs,
                ancestral: false,
            }],
            errors: Vec::new(),
            has_payload_nodes: false,
            evaluated_variant_sets: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root_node(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Append a child arc under `parent`. Siblings added earlier are
    /// stronger. Returns the new node's arena index.
    pub fn add_node(
        &mut self,
        parent: usize,
        arc_type: ArcType,
        site: Site,
        map_to_parent: MapFunction,
        inert: bool,
        ancestral: bool,
    ) -> usize {
        let map_to_root = self.nodes[parent].map_to_root.compose(&map_to_parent);
        let has_specs = site.has_specs();
        let index = self.nodes.len();
        self.nodes.push(Node {
            arc_type,
            site,
            map_to_parent,
            map_to_root,
            parent: Some(parent),
            children: Vec::new(),
            inert,
            has_specs,
            ancestral,
        });
        self.nodes[parent].children.push(index);
        if arc_type == ArcType::Payload {
            self.has_payload_nodes = true;
        }
        index
    }

    /// Strip a node's opinions after a permission restriction.
    pub(crate) fn mark_inert(&mut self, index: usize) {
        self.nodes[index].inert = true;
    }

    /// Node indices in strength order: a node's own site is stronger than
    /// all of its children, siblings in insertion order.
    pub fn nodes_in_strength_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut pending = vec![0usize];
        while let Some(index) = pending.pop() {
            order.push(index);
            for &child in self.nodes[index].children.iter().rev() {
                pending.push(child);
            }
        }
        order
    }

    /// The prim stack: every (layer, path) pair that has a spec for this
    /// prim, strongest first. Inert nodes contribute nothing.
    pub fn prim_stack(&self) -> Vec<(LayerHandle, Path)> {
        let mut stack = Vec::new();
        for index in self.nodes_in_strength_order() {
            let node = &self.nodes[index];
            if node.inert {
                continue;
            }
            for layer in node.site.layer_stack.layers() {
                if layer.has_spec(&node.site.path) {
                    stack.push((layer.clone(), node.site.path.clone()));
                }
            }
        }
        stack
    }

    /// Whether any non-inert node has a spec.
    pub fn has_specs(&self) -> bool {
        self.nodes.iter().any(|n| !n.inert && n.has_specs)
    }

    /// Errors recorded while building this index. Composition never fails;
    /// everything that went wrong is here.
    pub fn errors(&self) -> &PcpErrorVector {
        &self.errors
    }

    pub fn add_error(&mut self, error: crate::error::PcpError) {
        self.errors.push(error);
    }

    /// Whether the graph contains payload arcs, included or not.
    pub fn has_payload_nodes(&self) -> bool {
        self.has_payload_nodes
    }

    pub fn evaluated_variant_sets(&self) -> &[String] {
        &self.evaluated_variant_sets
    }

    pub fn record_evaluated_variant_set(&mut self, set: &str) {
        if !self.evaluated_variant_sets.iter().any(|s| s == set) {
            self.evaluated_variant_sets.push(set.to_string());
        }
    }

    /// Whether `site` already appears on the path from `node` up to the
    /// root. Used for cycle detection across arcs.
    pub fn site_on_chain_to_root(&self, mut node: usize, site: &Site) -> bool {
        loop {
            if self.nodes[node].site == *site {
                return true;
            }
            match self.nodes[node].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// The chain of site paths from the root down to `node`, for error
    /// reporting.
    pub fn chain_to_root(&self, node: usize) -> Vec<Path> {
        let mut chain = Vec::new();
        let mut current = Some(node);
        while let Some(index) = current {
            chain.push(self.nodes[index].site.path.clone());
            current = self.nodes[index].parent;
        }
        chain.reverse();
        chain
    }
}

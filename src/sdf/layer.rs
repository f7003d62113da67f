//! The abstract layer object consumed by composition.
//!
//! A layer is an ordered document of opinions: a spec tree rooted at the
//! pseudo-root `/`, an ordered sublayer list with offsets, and per-spec
//! metadata fields. Layers are shared and reference counted; this crate only
//! reads them. Authoring is done by the embedding collaborator (and by
//! tests) through the mutation methods below.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use super::layer_offset::LayerOffset;
use super::path::Path;
use super::schema::FieldKey;

/// What kind of object a spec describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecType {
    PseudoRoot,
    Prim,
    Attribute,
    Relationship,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Specifier {
    #[default]
    Def,
    Over,
    Class,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Permission {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Variability {
    #[default]
    Varying,
    Uniform,
}

/// A reference arc target: asset path, target prim, and time offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reference {
    /// Empty for internal references (a target within the same layer stack).
    pub asset_path: String,
    /// Empty to use the target layer's default prim.
    pub prim_path: Path,
    pub layer_offset: LayerOffset,
}

/// A payload arc target. Shaped like [`Reference`]; expansion is deferred
/// until the owning cache includes the payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub asset_path: String,
    pub prim_path: Path,
    pub layer_offset: Option<LayerOffset>,
}

/// A single relocation: opinions authored at `source` appear at `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocate {
    pub source: Path,
    pub target: Path,
}

/// An authored field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Token(String),
    StringVec(Vec<String>),
    PathVec(Vec<Path>),
    LayerOffsetVec(Vec<LayerOffset>),
    ReferenceList(Vec<Reference>),
    PayloadList(Vec<Payload>),
    VariantSelectionMap(BTreeMap<String, String>),
    RelocatesList(Vec<Relocate>),
    Permission(Permission),
    Specifier(Specifier),
    Variability(Variability),
}

impl Value {
    pub fn try_as_string_ref(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Token(s) => Some(s),
            _ => None,
        }
    }

    pub fn try_as_token_ref(&self) -> Option<&str> {
        match self {
            Value::Token(s) => Some(s),
            _ => None,
        }
    }

    pub fn try_as_string_vec_ref(&self) -> Option<&[String]> {
        match self {
            Value::StringVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_path_vec_ref(&self) -> Option<&[Path]> {
        match self {
            Value::PathVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_reference_list_ref(&self) -> Option<&[Reference]> {
        match self {
            Value::ReferenceList(v) => Some(v),
            _ => None,
        }
    }

    pub fn try_as_payload_list_ref(&self) -> Option<&[Payload]> {
        match self {
            Value::PayloadList(v) => Some(v),
            _ => None,
        }
    }
}

/// One spec: a typed node in a layer's namespace with its authored fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    pub ty: SpecType,
    pub fields: HashMap<String, Value>,
}

impl Spec {
    pub fn new(ty: SpecType) -> Self {
        Spec { ty, fields: HashMap::new() }
    }
}

#[derive(Debug, Default)]
struct LayerData {
    specs: BTreeMap<Path, Spec>,
}

/// A shared, collaborator-owned layer.
#[derive(Debug)]
pub struct Layer {
    identifier: String,
    data: RwLock<LayerData>,
}

pub type LayerHandle = Arc<Layer>;

impl Layer {
    /// Create an empty layer with a pseudo-root spec.
    pub fn create(identifier: impl Into<String>) -> LayerHandle {
        let mut specs = BTreeMap::new();
        specs.insert(Path::abs_root(), Spec::new(SpecType::PseudoRoot));
        Arc::new(Layer {
            identifier: identifier.into(),
            data: RwLock::new(LayerData { specs }),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    // ---- read surface used by composition ----

    pub fn has_spec(&self, path: &Path) -> bool {
        self.data.read().specs.contains_key(path)
    }

    pub fn spec_type(&self, path: &Path) -> Option<SpecType> {
        self.data.read().specs.get(path).map(|s| s.ty)
    }

    pub fn field(&self, path: &Path, key: &str) -> Option<Value> {
        self.data.read().specs.get(path).and_then(|s| s.fields.get(key).cloned())
    }

    pub fn has_field(&self, path: &Path, key: &str) -> bool {
        self.data
            .read()
            .specs
            .get(path)
            .is_some_and(|s| s.fields.contains_key(key))
    }

    pub fn sub_layer_paths(&self) -> Vec<String> {
        match self.field(&Path::abs_root(), FieldKey::SubLayers.as_str()) {
            Some(Value::StringVec(paths)) => paths,
            _ => Vec::new(),
        }
    }

    pub fn sub_layer_offsets(&self) -> Vec<LayerOffset> {
        match self.field(&Path::abs_root(), FieldKey::SubLayerOffsets.as_str()) {
            Some(Value::LayerOffsetVec(offsets)) => offsets,
            _ => Vec::new(),
        }
    }

    pub fn default_prim(&self) -> Option<Path> {
        match self.field(&Path::abs_root(), FieldKey::DefaultPrim.as_str()) {
            Some(Value::Token(name)) | Some(Value::String(name)) => {
                Some(Path::abs_root().append_child(&name))
            }
            _ => None,
        }
    }

    pub fn permission(&self, path: &Path) -> Permission {
        match self.field(path, FieldKey::Permission.as_str()) {
            Some(Value::Permission(p)) => p,
            _ => Permission::Public,
        }
    }

    /// All relocations authored in this layer, with the prim paths that
    /// carry them, in namespace order.
    pub fn relocates(&self) -> (Vec<Relocate>, Vec<Path>) {
        let data = self.data.read();
        let mut relocates = Vec::new();
        let mut prim_paths = Vec::new();
        for (path, spec) in data.specs.iter() {
            if let Some(Value::RelocatesList(list)) = spec.fields.get(FieldKey::Relocates.as_str()) {
                if !list.is_empty() {
                    relocates.extend(list.iter().cloned());
                    prim_paths.push(path.clone());
                }
            }
        }
        (relocates, prim_paths)
    }

    /// The variant names authored for `set` under the prim at `path`,
    /// discovered from authored variant specs like `path{set=name}`.
    pub fn variant_options(&self, path: &Path, set: &str) -> BTreeSet<String> {
        let data = self.data.read();
        let mut out = BTreeSet::new();
        for spec_path in data.specs.keys() {
            if !spec_path.is_prim_variant_selection_path() || spec_path.parent() != *path {
                continue;
            }
            if let Some((vset, vsel)) = spec_path.variant_selection() {
                if vset == set {
                    out.insert(vsel.to_string());
                }
            }
        }
        out
    }

    /// Names of the prim children authored directly under `path`.
    pub fn child_names(&self, path: &Path) -> Vec<String> {
        let data = self.data.read();
        let mut out = Vec::new();
        for spec_path in data.specs.keys() {
            if spec_path.is_prim_path()
                && !spec_path.is_prim_variant_selection_path()
                && spec_path.parent() == *path
            {
                out.push(spec_path.name().to_string());
            }
        }
        out
    }

    // ---- authoring surface (collaborator/tests only) ----

    /// Create a spec at `path`, creating missing ancestor prim specs.
    pub fn add_spec(&self, path: &Path, ty: SpecType) {
        let mut data = self.data.write();
        for ancestor in path.ancestors() {
            data.specs
                .entry(ancestor.clone())
                .or_insert_with(|| {
                    if ancestor.is_absolute_root_path() {
                        Spec::new(SpecType::PseudoRoot)
                    } else {
                        Spec::new(SpecType::Prim)
                    }
                });
        }
        data.specs.entry(path.clone()).or_insert_with(|| Spec::new(ty));
    }

    /// Set a field on the spec at `path`, creating a prim spec if needed.
    pub fn set_field(&self, path: &Path, key: FieldKey, value: Value) {
        let ty = match (key, path.is_property_path()) {
            (FieldKey::TargetPaths, true) => SpecType::Relationship,
            (_, true) => SpecType::Attribute,
            _ => SpecType::Prim,
        };
        self.add_spec(path, ty);
        let mut data = self.data.write();
        if let Some(spec) = data.specs.get_mut(path) {
            spec.fields.insert(key.as_str().to_string(), value);
        }
    }

    /// Remove the spec at `path` and everything beneath it.
    pub fn remove_spec(&self, path: &Path) {
        let mut data = self.data.write();
        data.specs.retain(|p, _| !p.has_prefix(path));
    }

    /// Append a sublayer path with an offset.
    pub fn add_sub_layer(&self, asset_path: impl Into<String>, offset: LayerOffset) {
        let mut paths = self.sub_layer_paths();
        let mut offsets = self.sub_layer_offsets();
        offsets.resize(paths.len(), LayerOffset::default());
        paths.push(asset_path.into());
        offsets.push(offset);
        self.set_field(&Path::abs_root(), FieldKey::SubLayers, Value::StringVec(paths));
        self.set_field(
            &Path::abs_root(),
            FieldKey::SubLayerOffsets,
            Value::LayerOffsetVec(offsets),
        );
    }
}

/// Layer handles compare by object identity; used for identifier equality
/// and for keying dependency tables.
pub fn layer_key(layer: &LayerHandle) -> usize {
    Arc::as_ptr(layer) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authoring_creates_ancestors() {
        let layer = Layer::create("root.layer");
        let path = Path::new("/World/Char.size").unwrap();
        layer.set_field(&path, FieldKey::Default, Value::Double(1.0));

        assert_eq!(layer.spec_type(&Path::abs_root()), Some(SpecType::PseudoRoot));
        assert_eq!(
            layer.spec_type(&Path::new("/World").unwrap()),
            Some(SpecType::Prim)
        );
        assert_eq!(layer.spec_type(&path), Some(SpecType::Attribute));
    }

    #[test]
    fn sublayer_metadata_round_trip() {
        let layer = Layer::create("root.layer");
        layer.add_sub_layer("a.layer", LayerOffset::default());
        layer.add_sub_layer("b.layer", LayerOffset::new(5.0, 1.0));

        assert_eq!(layer.sub_layer_paths(), vec!["a.layer", "b.layer"]);
        assert_eq!(layer.sub_layer_offsets()[1], LayerOffset::new(5.0, 1.0));
    }

    #[test]
    fn variant_option_discovery() {
        let layer = Layer::create("root.layer");
        let prim = Path::new("/Char").unwrap();
        layer.add_spec(
            &prim.append_variant_selection("lod", "high"),
            SpecType::Prim,
        );
        layer.add_spec(&prim.append_variant_selection("lod", "low"), SpecType::Prim);
        layer.add_spec(&prim.append_variant_selection("rig", "full"), SpecType::Prim);

        let options = layer.variant_options(&prim, "lod");
        assert_eq!(options.into_iter().collect::<Vec<_>>(), vec!["high", "low"]);
    }

    #[test]
    fn relocates_collection() {
        let layer = Layer::create("root.layer");
        let prim = Path::new("/World").unwrap();
        layer.set_field(
            &prim,
            FieldKey::Relocates,
            Value::RelocatesList(vec![Relocate {
                source: Path::new("/World/Old").unwrap(),
                target: Path::new("/World/New").unwrap(),
            }]),
        );

        let (relocates, prim_paths) = layer.relocates();
        assert_eq!(relocates.len(), 1);
        assert_eq!(prim_paths, vec![prim]);
    }
}

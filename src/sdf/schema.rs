//! Well-known metadata field keys.

/// Keys for the metadata fields this crate reads off layer specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    SubLayers,
    SubLayerOffsets,
    DefaultPrim,
    References,
    Payload,
    InheritPaths,
    Specializes,
    VariantSetNames,
    VariantSelection,
    Relocates,
    Permission,
    Specifier,
    TypeName,
    Variability,
    Default,
    TargetPaths,
    ConnectionPaths,
}

impl FieldKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::SubLayers => "subLayers",
            FieldKey::SubLayerOffsets => "subLayerOffsets",
            FieldKey::DefaultPrim => "defaultPrim",
            FieldKey::References => "references",
            FieldKey::Payload => "payload",
            FieldKey::InheritPaths => "inheritPaths",
            FieldKey::Specializes => "specializes",
            FieldKey::VariantSetNames => "variantSetNames",
            FieldKey::VariantSelection => "variantSelection",
            FieldKey::Relocates => "relocates",
            FieldKey::Permission => "permission",
            FieldKey::Specifier => "specifier",
            FieldKey::TypeName => "typeName",
            FieldKey::Variability => "variability",
            FieldKey::Default => "default",
            FieldKey::TargetPaths => "targetPaths",
            FieldKey::ConnectionPaths => "connectionPaths",
        }
    }
}

/// Fields whose edits restructure composition. A change to one of these
/// requires rebuilding every dependent prim index, not just re-reading
/// values.
pub fn is_significant_field(field: &str) -> bool {
    matches!(
        field,
        "subLayers"
            | "subLayerOffsets"
            | "defaultPrim"
            | "references"
            | "payload"
            | "inheritPaths"
            | "specializes"
            | "variantSetNames"
            | "variantSelection"
            | "relocates"
            | "permission"
            | "specifier"
    )
}

//! Property indexes: the strength-ordered stack of property specs for one
//! property path, derived from the owning prim's index.
//!
//! The walk visits the prim index's nodes in strength order, translates the
//! property path into each node's namespace through its map function, and
//! collects every layer that has a spec there. Consistency of spec type,
//! attribute value type, and variability is judged against the strongest
//! opinion; offending weaker specs are reported and dropped.

use crate::error::{PcpError, PcpErrorVector};
use crate::prim_index::PrimIndex;
use crate::sdf::{schema::FieldKey, LayerHandle, Path, Permission, SpecType, Value, Variability};

/// One contributing property spec.
#[derive(Debug, Clone)]
pub struct PropertySite {
    pub layer: LayerHandle,
    pub path: Path,
    /// Arena index of the prim index node this spec came from, for
    /// translating relationship targets and connections.
    pub node_index: usize,
}

/// The computed index for one property path.
#[derive(Debug, Clone, Default)]
pub struct PropertyIndex {
    path: Path,
    property_stack: Vec<PropertySite>,
    errors: PcpErrorVector,
}

impl PropertyIndex {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contributing specs, strongest first.
    pub fn property_stack(&self) -> &[PropertySite] {
        &self.property_stack
    }

    pub fn is_empty(&self) -> bool {
        self.property_stack.is_empty()
    }

    pub fn errors(&self) -> &PcpErrorVector {
        &self.errors
    }

    /// The composed spec type, from the strongest spec.
    pub fn spec_type(&self) -> Option<SpecType> {
        let site = self.property_stack.first()?;
        site.layer.spec_type(&site.path)
    }

    /// The strongest authored value for `key` across the stack.
    pub fn strongest_value(&self, key: FieldKey) -> Option<Value> {
        self.property_stack
            .iter()
            .find_map(|site| site.layer.field(&site.path, key.as_str()))
    }
}

/// Build the index for the property `path` using the owning prim's index.
pub fn build_property_index(prim_index: &PrimIndex, path: &Path) -> PropertyIndex {
    let mut index = PropertyIndex {
        path: path.clone(),
        property_stack: Vec::new(),
        errors: Vec::new(),
    };
    if !path.is_property_path() {
        return index;
    }

    let mut expected_type: Option<SpecType> = None;
    let mut expected_value_type: Option<String> = None;
    let mut expected_variability: Option<Variability> = None;
    let mut blocked_by_private = false;

    for node_index in prim_index.nodes_in_strength_order() {
        let node = prim_index.node(node_index);
        if node.inert {
            continue;
        }
        let Some(local_path) = node.map_to_root.map_target_to_source(path) else {
            continue;
        };
        for layer in node.site.layer_stack.layers() {
            let Some(spec_type) = layer.spec_type(&local_path) else {
                continue;
            };
            if blocked_by_private {
                index.errors.push(PcpError::PropertyPermissionDenied {
                    path: local_path.clone(),
                    layer: layer.identifier().to_string(),
                });
                continue;
            }
            match expected_type {
                None => expected_type = Some(spec_type),
                Some(expected) if expected != spec_type => {
                    index.errors.push(PcpError::InconsistentPropertyType {
                        path: local_path.clone(),
                        layer: layer.identifier().to_string(),
                        expected,
                        found: spec_type,
                    });
                    continue;
                }
                Some(_) => {}
            }
            if spec_type == SpecType::Attribute {
                if let Some(value_type) = layer
                    .field(&local_path, FieldKey::TypeName.as_str())
                    .and_then(|v| v.try_as_string_ref().map(str::to_string))
                {
                    match &expected_value_type {
                        None => expected_value_type = Some(value_type),
                        Some(expected) if *expected != value_type => {
                            index.errors.push(PcpError::InconsistentAttributeType {
                                path: local_path.clone(),
                                layer: layer.identifier().to_string(),
                                expected: expected.clone(),
                                found: value_type,
                            });
                            continue;
                        }
                        Some(_) => {}
                    }
                }
                if let Some(Value::Variability(variability)) =
                    layer.field(&local_path, FieldKey::Variability.as_str())
                {
                    match expected_variability {
                        None => expected_variability = Some(variability),
                        Some(expected) if expected != variability => {
                            // Reported, but the spec still contributes; only
                            // its variability opinion is ignored.
                            index
                                .errors
                                .push(PcpError::InconsistentAttributeVariability {
                                    path: local_path.clone(),
                                    layer: layer.identifier().to_string(),
                                });
                        }
                        Some(_) => {}
                    }
                }
            }
            if let Some(Value::Permission(Permission::Private)) =
                layer.field(&local_path, FieldKey::Permission.as_str())
            {
                blocked_by_private = true;
            }
            index.property_stack.push(PropertySite {
                layer: layer.clone(),
                path: local_path.clone(),
                node_index,
            });
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer_stack::{LayerStackIdentifier, LayerStackRegistry};
    use crate::map_function::MapFunction;
    use crate::prim_index::{ArcType, Site};
    use crate::resolver::LayerRegistry;
    use crate::sdf::{path, Layer, LayerHandle, LayerOffset};

    fn stack_for(layers: &[&LayerHandle]) -> crate::layer_stack::LayerStackHandle {
        let provider = LayerRegistry::new();
        for layer in layers {
            provider.insert((*layer).clone());
        }
        let registry = LayerStackRegistry::new(provider);
        registry
            .compute(&LayerStackIdentifier::new(layers[0].clone()))
            .0
    }

    #[test]
    fn stacks_specs_strongest_first() {
        let strong = Layer::create("strong.layer");
        let weak = Layer::create("weak.layer");
        strong.add_sub_layer("weak.layer", LayerOffset::default());

        let prop = path("/World.x").unwrap();
        weak.set_field(&prop, FieldKey::Default, Value::Int(1));
        strong.set_field(&prop, FieldKey::Default, Value::Int(2));

        let stack = stack_for(&[&strong, &weak]);
        let world = path("/World").unwrap();
        let prim_index = PrimIndex::new(world.clone(), Site::new(stack, world));
        let index = build_property_index(&prim_index, &prop);

        assert!(index.errors().is_empty());
        assert_eq!(index.property_stack().len(), 2);
        assert_eq!(index.property_stack()[0].layer.identifier(), "strong.layer");
        assert_eq!(index.strongest_value(FieldKey::Default), Some(Value::Int(2)));
        assert_eq!(index.spec_type(), Some(SpecType::Attribute));
    }

    #[test]
    fn translates_through_arc_namespaces() {
        let root = Layer::create("root.layer");
        let model = Layer::create("model.layer");
        let model_prop = path("/Model.size").unwrap();
        model.set_field(&model_prop, FieldKey::Default, Value::Double(4.0));

        let root_stack = stack_for(&[&root]);
        let model_stack = stack_for(&[&model]);
        let world = path("/World").unwrap();
        let mut prim_index = PrimIndex::new(world.clone(), Site::new(root_stack, world.clone()));
        prim_index.add_node(
            0,
            ArcType::Reference,
            Site::new(model_stack, path("/Model").unwrap()),
            MapFunction::create(
                vec![(path("/Model").unwrap(), world)],
                LayerOffset::default(),
            ),
            false,
            false,
        );

        let index = build_property_index(&prim_index, &path("/World.size").unwrap());
        assert_eq!(index.property_stack().len(), 1);
        assert_eq!(index.property_stack()[0].path, model_prop);
        assert_eq!(index.property_stack()[0].node_index, 1);
    }

    #[test]
    fn reports_inconsistent_spec_types() {
        let strong = Layer::create("strong.layer");
        let weak = Layer::create("weak.layer");
        strong.add_sub_layer("weak.layer", LayerOffset::default());

        let prop = path("/World.rel").unwrap();
        strong.set_field(
            &prop,
            FieldKey::TargetPaths,
            Value::PathVec(vec![path("/Other").unwrap()]),
        );
        weak.set_field(&prop, FieldKey::Default, Value::Int(1));

        let stack = stack_for(&[&strong, &weak]);
        let world = path("/World").unwrap();
        let prim_index = PrimIndex::new(world.clone(), Site::new(stack, world));
        let index = build_property_index(&prim_index, &prop);

        assert_eq!(index.spec_type(), Some(SpecType::Relationship));
        assert_eq!(index.property_stack().len(), 1);
        assert!(matches!(
            index.errors()[0],
            PcpError::InconsistentPropertyType { .. }
        ));
    }

    #[test]
    fn reports_inconsistent_attribute_types() {
        let strong = Layer::create("strong.layer");
        let weak = Layer::create("weak.layer");
        strong.add_sub_layer("weak.layer", LayerOffset::default());

        let prop = path("/World.x").unwrap();
        strong.set_field(&prop, FieldKey::TypeName, Value::Token("double".to_string()));
        weak.set_field(&prop, FieldKey::TypeName, Value::Token("int".to_string()));

        let stack = stack_for(&[&strong, &weak]);
        let world = path("/World").unwrap();
        let prim_index = PrimIndex::new(world.clone(), Site::new(stack, world));
        let index = build_property_index(&prim_index, &prop);

        assert_eq!(index.property_stack().len(), 1);
        assert!(matches!(
            index.errors()[0],
            PcpError::InconsistentAttributeType { .. }
        ));
    }

    #[test]
    fn private_permission_blocks_weaker_opinions() {
        let strong = Layer::create("strong.layer");
        let weak = Layer::create("weak.layer");
        strong.add_sub_layer("weak.layer", LayerOffset::default());

        let prop = path("/World.x").unwrap();
        strong.set_field(&prop, FieldKey::Default, Value::Int(2));
        strong.set_field(
            &prop,
            FieldKey::Permission,
            Value::Permission(Permission::Private),
        );
        weak.set_field(&prop, FieldKey::Default, Value::Int(1));

        let stack = stack_for(&[&strong, &weak]);
        let world = path("/World").unwrap();
        let prim_index = PrimIndex::new(world.clone(), Site::new(stack, world));
        let index = build_property_index(&prim_index, &prop);

        assert_eq!(index.property_stack().len(), 1);
        assert!(matches!(
            index.errors()[0],
            PcpError::PropertyPermissionDenied { .. }
        ));
    }

    #[test]
    fn non_property_path_yields_empty_index() {
        let layer = Layer::create("a.layer");
        let stack = stack_for(&[&layer]);
        let world = path("/World").unwrap();
        let prim_index = PrimIndex::new(world.clone(), Site::new(stack, world.clone()));
        let index = build_property_index(&prim_index, &world);
        assert!(index.is_empty());
    }
}

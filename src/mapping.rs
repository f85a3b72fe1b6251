//! Mapping compiler.
//!
//! Resolves the textual attribute paths of the field, defaults, and
//! filter configurations against the metamodel and the reader's header
//! set, producing the immutable [`Mapping`] the row migrator runs from:
//! per-class path tables, default literals, compiled filters, the
//! creatable class sequence (owners before dependents), and the owner
//! closure added to host otherwise orphan dependents.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{DefaultsConfig, FieldConfig, FilterConfig};
use crate::error::{MappingError, MappingResult};
use crate::filter::{Filter, FilterSpec};
use crate::metamodel::{ClassId, Metamodel, Primitive, PropertyId};
use crate::object::fit_value;
use crate::reader::{CsvSource, FieldKey};
use crate::value::Value;

/// A resolved attribute path: a chain of non-collection properties from
/// a creatable class down to a terminal attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    hops: Vec<PropertyId>,
}

impl Path {
    pub fn hops(&self) -> &[PropertyId] {
        &self.hops
    }

    /// The attribute the path assigns.
    pub fn terminal(&self) -> PropertyId {
        *self.hops.last().expect("paths are non-empty")
    }

    /// The reference hops leading to the terminal's parent object.
    pub fn parents(&self) -> &[PropertyId] {
        &self.hops[..self.hops.len() - 1]
    }

    /// Dotted attribute form for diagnostics.
    pub fn display(&self, model: &Metamodel) -> String {
        self.hops
            .iter()
            .map(|pid| model.property_by_id(*pid).name.clone())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Compiled per-class tables.
#[derive(Debug, Default)]
pub struct ClassMapping {
    /// Path to the input column feeding it.
    pub paths: IndexMap<Path, FieldKey>,
    /// Path to the literal applied when the input stays unset.
    pub defaults: IndexMap<Path, Value>,
    /// Terminal attribute to its compiled filter.
    pub filters: HashMap<PropertyId, Arc<Filter>>,
}

impl ClassMapping {
    fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.defaults.is_empty()
    }
}

/// The compiled mapping; immutable once built.
#[derive(Debug)]
pub struct Mapping {
    target: ClassId,
    classes: IndexMap<ClassId, ClassMapping>,
    creatable: Vec<ClassId>,
    owner_closure: HashSet<ClassId>,
}

impl Mapping {
    /// Compile configuration against the metamodel and the reader's
    /// header set. All configuration errors surface here.
    pub fn compile(
        model: &Metamodel,
        target: ClassId,
        field_configs: &[FieldConfig],
        defaults: Option<&DefaultsConfig>,
        filters: Option<&FilterConfig>,
        source: &CsvSource,
    ) -> MappingResult<Self> {
        let mut classes: IndexMap<ClassId, ClassMapping> = IndexMap::new();

        // Field mappings: header -> [Class.attr...]. First binding for a
        // (class, path) wins across merged configs.
        for config in field_configs {
            for (header, paths) in config.entries() {
                if paths.is_empty() {
                    continue;
                }
                let field_key = source.accessor(header)?.clone();
                for text in paths {
                    let (class, path) = parse_path(model, target, text)?;
                    classes
                        .entry(class)
                        .or_default()
                        .paths
                        .entry(path)
                        .or_insert_with(|| field_key.clone());
                }
            }
        }

        // Defaults, fitted to their terminal property at compile time.
        if let Some(defaults) = defaults {
            for (text, literal) in defaults.entries() {
                let (class, path) = parse_path(model, target, text)?;
                let prop = model.property_by_id(path.terminal());
                let fitted = fit_value(prop, literal.clone()).ok_or_else(|| {
                    MappingError::BadDefault {
                        path: text.clone(),
                        message: format!("literal '{literal}' vs {:?}", prop.ty),
                    }
                })?;
                classes
                    .entry(class)
                    .or_default()
                    .defaults
                    .entry(path)
                    .or_insert(fitted);
            }
        }

        // Configured filters; boolean attributes get the split form.
        if let Some(filters) = filters {
            for (text, spec) in filters.entries() {
                let (class, path) = parse_path(model, target, text)?;
                let terminal = path.terminal();
                let filter = compile_filter(model, terminal, spec.clone())?;
                classes
                    .entry(class)
                    .or_default()
                    .filters
                    .insert(terminal, Arc::new(filter));
            }
        }

        // Boolean attributes always coerce, even without a spec.
        for mapping in classes.values_mut() {
            let booleans: Vec<PropertyId> = mapping
                .paths
                .keys()
                .map(Path::terminal)
                .filter(|pid| {
                    model.property_by_id(*pid).primitive() == Some(Primitive::Bool)
                })
                .collect();
            for pid in booleans {
                mapping
                    .filters
                    .entry(pid)
                    .or_insert_with(|| Arc::new(Filter::implicit_boolean()));
            }
        }

        merge_superclasses(model, &mut classes);

        // An entry with neither paths nor defaults maps nothing (a
        // filter alone is inert) and must not become creatable.
        classes.retain(|_, mapping| !mapping.is_empty());

        for &class in classes.keys() {
            if !model.is_concrete(class) {
                return Err(MappingError::AbstractClass(
                    model.class_name(class).to_string(),
                ));
            }
        }
        if classes.is_empty() {
            return Err(MappingError::Empty);
        }

        let owner_closure = close_over_owners(model, &mut classes);
        let creatable =
            model.toposort_by_ownership(&classes.keys().copied().collect::<Vec<_>>());

        Ok(Self {
            target,
            classes,
            creatable,
            owner_closure,
        })
    }

    pub fn target(&self) -> ClassId {
        self.target
    }

    /// Creatable classes, owners before dependents.
    pub fn creatable(&self) -> &[ClassId] {
        &self.creatable
    }

    /// Classes added only to host dependents.
    pub fn owner_closure(&self) -> &HashSet<ClassId> {
        &self.owner_closure
    }

    pub fn for_class(&self, class: ClassId) -> Option<&ClassMapping> {
        self.classes.get(&class)
    }

    /// Filter bound to a terminal attribute of a creatable class.
    pub fn filter_for(&self, class: ClassId, terminal: PropertyId) -> Option<&Arc<Filter>> {
        self.classes.get(&class)?.filters.get(&terminal)
    }
}

/// Compile a spec into a plain or boolean filter depending on the
/// terminal attribute's type.
fn compile_filter(
    model: &Metamodel,
    terminal: PropertyId,
    spec: FilterSpec,
) -> MappingResult<Filter> {
    let filter = if model.property_by_id(terminal).primitive() == Some(Primitive::Bool) {
        Filter::boolean(spec)?
    } else {
        Filter::new(spec)?
    };
    Ok(filter)
}

/// Resolve `"Class.attr1.attr2"` (or bare `"attr1.attr2"` rooted at the
/// target) into its creatable class and property chain.
fn parse_path(
    model: &Metamodel,
    target: ClassId,
    text: &str,
) -> MappingResult<(ClassId, Path)> {
    let tokens: Vec<&str> = text.split('.').map(str::trim).collect();
    let (class, attrs) = match tokens.first() {
        Some(first) if first.chars().next().is_some_and(char::is_uppercase) => {
            let class = model
                .lookup(first)
                .ok_or_else(|| MappingError::UnknownClass(first.to_string()))?;
            (class, &tokens[1..])
        }
        _ => (target, &tokens[..]),
    };
    if attrs.is_empty() || attrs.iter().any(|a| a.is_empty()) {
        return Err(MappingError::UnknownProperty {
            class: model.class_name(class).to_string(),
            name: text.to_string(),
        });
    }

    let mut hops = Vec::with_capacity(attrs.len());
    let mut cursor = class;
    for (i, name) in attrs.iter().enumerate() {
        let prop = model.property(cursor, name).ok_or_else(|| {
            MappingError::UnknownProperty {
                class: model.class_name(cursor).to_string(),
                name: name.to_string(),
            }
        })?;
        if prop.many {
            return Err(MappingError::CollectionInPath {
                class: model.class_name(cursor).to_string(),
                name: name.to_string(),
            });
        }
        hops.push(prop.id);
        if i + 1 < attrs.len() {
            let next = prop.target_class().ok_or_else(|| MappingError::PrimitiveHop {
                class: model.class_name(cursor).to_string(),
                name: name.to_string(),
            })?;
            // Intermediates get synthesized per row, so they must be
            // instantiable.
            if !model.is_concrete(next) {
                return Err(MappingError::AbstractClass(
                    model.class_name(next).to_string(),
                ));
            }
            cursor = next;
        }
    }
    Ok((class, Path { hops }))
}

/// Donate a configured superclass's entries to its configured strict
/// subclasses (existing entries win), then drop the superclass.
fn merge_superclasses(model: &Metamodel, classes: &mut IndexMap<ClassId, ClassMapping>) {
    let ids: Vec<ClassId> = classes.keys().copied().collect();
    let donors: Vec<ClassId> = ids
        .iter()
        .copied()
        .filter(|&sup| ids.iter().any(|&sub| model.is_strict_subclass(sub, sup)))
        .collect();

    for donor in donors {
        let Some(donated) = classes.shift_remove(&donor) else {
            continue;
        };
        let receivers: Vec<ClassId> = classes
            .keys()
            .copied()
            .filter(|&sub| model.is_strict_subclass(sub, donor))
            .collect();
        for receiver in receivers {
            let entry = classes.entry(receiver).or_default();
            for (path, key) in &donated.paths {
                entry
                    .paths
                    .entry(path.clone())
                    .or_insert_with(|| key.clone());
            }
            for (path, literal) in &donated.defaults {
                entry
                    .defaults
                    .entry(path.clone())
                    .or_insert_with(|| literal.clone());
            }
            for (pid, filter) in &donated.filters {
                entry.filters.entry(*pid).or_insert_with(|| filter.clone());
            }
        }
    }
}

/// Add owner classes until every creatable class with owners has one in
/// the set. Added hosts carry empty tables and are recorded for the
/// pruning pass.
fn close_over_owners(
    model: &Metamodel,
    classes: &mut IndexMap<ClassId, ClassMapping>,
) -> HashSet<ClassId> {
    let mut added = HashSet::new();
    loop {
        let current: Vec<ClassId> = classes.keys().copied().collect();
        let mut grew = false;
        for &class in &current {
            let owners = model.owners(class);
            if owners.is_empty() {
                continue;
            }
            let satisfied = owners.iter().any(|&owner| {
                classes
                    .keys()
                    .any(|&creatable| model.is_kind_of(creatable, owner))
            });
            if satisfied {
                continue;
            }
            // Prefer a concrete owner whose own owner chain reaches an
            // already-creatable class; settle for the first concrete one.
            let host = owners
                .iter()
                .copied()
                .filter(|&o| model.is_concrete(o))
                .find(|&o| {
                    classes
                        .keys()
                        .any(|&creatable| model.depends_on(o, creatable))
                })
                .or_else(|| owners.iter().copied().find(|&o| model.is_concrete(o)));
            if let Some(host) = host {
                classes.entry(host).or_default();
                added.insert(host);
                grew = true;
            }
        }
        if !grew {
            return added;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::ReferenceRole;
    use std::io::Cursor;

    fn model() -> Metamodel {
        let mut builder = Metamodel::builder();
        builder.class("Family").attr("surname", Primitive::Str);
        builder
            .class("Address")
            .attr("street1", Primitive::Str)
            .attr("city", Primitive::Str)
            .attr("state", Primitive::Str);
        builder
            .class("Household")
            .reference("address", "Address", ReferenceRole::Dependent);
        builder.abstract_class("Person").attr("name", Primitive::Str);
        builder
            .class("Parent")
            .subclass_of("Person")
            .attr("retired", Primitive::Bool)
            .reference("family", "Family", ReferenceRole::Owner)
            .reference("household", "Household", ReferenceRole::Dependent)
            .reference("spouse", "Parent", ReferenceRole::Independent);
        builder
            .class("Child")
            .subclass_of("Person")
            .reference("family", "Family", ReferenceRole::Owner)
            .collection("parents", "Parent", ReferenceRole::Independent);
        builder.build().unwrap()
    }

    fn reader(header: &str) -> CsvSource {
        CsvSource::from_reader(Cursor::new(format!("{header}\nx\n"))).unwrap()
    }

    #[test]
    fn test_compile_simple_mapping() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let source = reader("First,Street");
        let fields = FieldConfig::default()
            .map("First", "Parent.name")
            .map("Street", "Parent.household.address.street1");

        let mapping =
            Mapping::compile(&model, parent, &[fields], None, None, &source).unwrap();
        let class_mapping = mapping.for_class(parent).unwrap();
        assert_eq!(class_mapping.paths.len(), 2);
        let (path, key) = class_mapping.paths.get_index(1).unwrap();
        assert_eq!(key, "street");
        assert_eq!(path.hops().len(), 3);
        assert_eq!(path.display(&model), "household.address.street1");
    }

    #[test]
    fn test_bare_paths_root_at_target() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let source = reader("First");
        let fields = FieldConfig::default().map("First", "name");

        let mapping =
            Mapping::compile(&model, parent, &[fields], None, None, &source).unwrap();
        assert!(mapping.for_class(parent).is_some());
    }

    #[test]
    fn test_unknown_header_is_fatal() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let source = reader("First");
        let fields = FieldConfig::default().map("Missing", "Parent.name");

        assert!(matches!(
            Mapping::compile(&model, parent, &[fields], None, None, &source),
            Err(MappingError::Csv(_))
        ));
    }

    #[test]
    fn test_collection_in_path_is_fatal() {
        let model = model();
        let child = model.lookup("Child").unwrap();
        let source = reader("First");
        let fields = FieldConfig::default().map("First", "Child.parents.name");

        assert!(matches!(
            Mapping::compile(&model, child, &[fields], None, None, &source),
            Err(MappingError::CollectionInPath { .. })
        ));
    }

    #[test]
    fn test_unknown_property_is_fatal() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let source = reader("First");
        let fields = FieldConfig::default().map("First", "Parent.nickname");

        assert!(matches!(
            Mapping::compile(&model, parent, &[fields], None, None, &source),
            Err(MappingError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_abstract_creatable_is_fatal() {
        let model = model();
        let person = model.lookup("Person").unwrap();
        let source = reader("First");
        let fields = FieldConfig::default().map("First", "Person.name");

        assert!(matches!(
            Mapping::compile(&model, person, &[fields], None, None, &source),
            Err(MappingError::AbstractClass(_))
        ));
    }

    #[test]
    fn test_superclass_merges_into_subclasses() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let child = model.lookup("Child").unwrap();
        let person = model.lookup("Person").unwrap();
        let source = reader("First,Kid");
        let fields = FieldConfig::default()
            .map("First", "Person.name")
            .map("Kid", "Child.name");

        let mapping =
            Mapping::compile(&model, child, &[fields], None, None, &source).unwrap();
        // Person donated its entry to Child and left the creatable set;
        // Child's own binding for name won.
        assert!(mapping.for_class(person).is_none());
        let child_mapping = mapping.for_class(child).unwrap();
        assert_eq!(child_mapping.paths.len(), 1);
        let key = child_mapping.paths.values().next().unwrap();
        assert_eq!(key, "kid");
        assert!(mapping.for_class(parent).is_none());
    }

    #[test]
    fn test_defaults_fit_and_misfit() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let source = reader("First");
        let fields = FieldConfig::default().map("First", "Parent.name");

        let good = DefaultsConfig::default().set("Parent.household.address.state", "IL");
        let mapping = Mapping::compile(
            &model,
            parent,
            std::slice::from_ref(&fields),
            Some(&good),
            None,
            &source,
        )
        .unwrap();
        assert_eq!(mapping.for_class(parent).unwrap().defaults.len(), 1);

        let bad = DefaultsConfig::default().set("Parent.retired", "IL");
        assert!(matches!(
            Mapping::compile(&model, parent, &[fields], Some(&bad), None, &source),
            Err(MappingError::BadDefault { .. })
        ));
    }

    #[test]
    fn test_boolean_attribute_gets_implicit_filter() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let source = reader("First,Retired");
        let fields = FieldConfig::default()
            .map("First", "Parent.name")
            .map("Retired", "Parent.retired");

        let mapping =
            Mapping::compile(&model, parent, &[fields], None, None, &source).unwrap();
        let retired = model.property(parent, "retired").unwrap().id;
        let filter = mapping.filter_for(parent, retired).unwrap();
        assert_eq!(filter.apply(Value::Str("yes".into())), Value::Bool(true));
    }

    #[test]
    fn test_filter_only_class_is_not_creatable() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let child = model.lookup("Child").unwrap();
        let source = reader("First");
        let fields = FieldConfig::default().map("First", "Parent.name");
        let filters = FilterConfig::default()
            .with("Child.name", FilterSpec::new().rule("N/A", ""));

        let mapping =
            Mapping::compile(&model, parent, &[fields], None, Some(&filters), &source)
                .unwrap();
        assert!(mapping.for_class(child).is_none());
        assert!(!mapping.creatable().contains(&child));
        assert!(mapping.for_class(parent).is_some());
    }

    #[test]
    fn test_owner_closure_adds_host() {
        let model = model();
        let child = model.lookup("Child").unwrap();
        let family = model.lookup("Family").unwrap();
        let source = reader("Kid");
        let fields = FieldConfig::default().map("Kid", "Child.name");

        let mapping =
            Mapping::compile(&model, child, &[fields], None, None, &source).unwrap();
        // Family was pulled in to host the Child and ordered first.
        assert!(mapping.owner_closure().contains(&family));
        assert_eq!(mapping.creatable().first(), Some(&family));
        assert!(mapping.creatable().contains(&child));
    }

    #[test]
    fn test_first_header_binding_wins() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let source = reader("First,Alias");
        let first = FieldConfig::default().map("First", "Parent.name");
        let second = FieldConfig::default().map("Alias", "Parent.name");

        let mapping =
            Mapping::compile(&model, parent, &[first, second], None, None, &source)
                .unwrap();
        let class_mapping = mapping.for_class(parent).unwrap();
        assert_eq!(class_mapping.paths.len(), 1);
        assert_eq!(class_mapping.paths.values().next().unwrap(), "first");
    }
}

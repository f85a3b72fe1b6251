//! Runtime domain metamodel.
//!
//! The migration engine is driven by class and property metadata rather
//! than by concrete Rust types: a [`Metamodel`] registers classes, their
//! typed properties, reference roles, and inheritance, and answers the
//! narrow set of questions the mapping compiler and row migrator ask
//! (namespace lookup, property resolution, ownership, dependency order).
//!
//! Models are built programmatically through [`MetamodelBuilder`]; the
//! build step resolves reference targets and rejects ownership cycles.

use indexmap::IndexMap;

use crate::error::ModelError;

/// Identifies a class within its metamodel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) usize);

/// Identifies a property by owning class and declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyId {
    pub class: ClassId,
    pub index: usize,
}

/// Primitive attribute types; one per [`crate::value::Value`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Str,
    Int,
    Float,
    Date,
    Bool,
}

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyTy {
    Primitive(Primitive),
    Class(ClassId),
}

/// Role of a reference property.
///
/// `Owner` points from a dependent at the class that owns it; the
/// owned side's lifecycle follows the owner. `Dependent` is a
/// unidirectional reference the holder is responsible for. `Independent`
/// references peer objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceRole {
    Owner,
    Dependent,
    Independent,
}

/// Metadata for one attribute of a domain class.
#[derive(Debug, Clone)]
pub struct Property {
    pub id: PropertyId,
    pub name: String,
    pub ty: PropertyTy,
    /// True for collection-valued properties.
    pub many: bool,
    /// Set on class-typed properties only.
    pub role: Option<ReferenceRole>,
}

impl Property {
    pub fn is_reference(&self) -> bool {
        matches!(self.ty, PropertyTy::Class(_))
    }

    pub fn is_owner_ref(&self) -> bool {
        self.role == Some(ReferenceRole::Owner)
    }

    pub fn is_independent_ref(&self) -> bool {
        self.role == Some(ReferenceRole::Independent)
    }

    pub fn is_dependent_ref(&self) -> bool {
        self.role == Some(ReferenceRole::Dependent)
    }

    /// Target class of a reference property.
    pub fn target_class(&self) -> Option<ClassId> {
        match self.ty {
            PropertyTy::Class(id) => Some(id),
            PropertyTy::Primitive(_) => None,
        }
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self.ty {
            PropertyTy::Primitive(p) => Some(p),
            PropertyTy::Class(_) => None,
        }
    }
}

/// One domain class: name, abstractness, optional superclass, and its
/// declared properties in declaration order.
#[derive(Debug, Clone)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub is_abstract: bool,
    pub parent: Option<ClassId>,
    properties: Vec<Property>,
}

impl Class {
    /// Properties declared directly on this class.
    pub fn own_properties(&self) -> &[Property] {
        &self.properties
    }
}

/// The class registry the engine runs against.
#[derive(Debug, Default)]
pub struct Metamodel {
    classes: Vec<Class>,
    by_name: IndexMap<String, ClassId>,
}

impl Metamodel {
    pub fn builder() -> MetamodelBuilder {
        MetamodelBuilder::default()
    }

    /// Namespace lookup by class name.
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub fn class_name(&self, id: ClassId) -> &str {
        &self.classes[id.0].name
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }

    pub fn is_concrete(&self, id: ClassId) -> bool {
        !self.class(id).is_abstract
    }

    /// All properties visible on a class: ancestors' first, then its own.
    pub fn all_properties(&self, id: ClassId) -> Vec<&Property> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            chain.push(c);
            cursor = self.class(c).parent;
        }
        chain
            .iter()
            .rev()
            .flat_map(|c| self.class(*c).own_properties())
            .collect()
    }

    /// Resolve a property by name, walking the superclass chain.
    pub fn property(&self, class: ClassId, name: &str) -> Option<&Property> {
        let mut cursor = Some(class);
        while let Some(c) = cursor {
            if let Some(p) = self
                .class(c)
                .own_properties()
                .iter()
                .find(|p| p.name == name)
            {
                return Some(p);
            }
            cursor = self.class(c).parent;
        }
        None
    }

    pub fn property_by_id(&self, pid: PropertyId) -> &Property {
        &self.class(pid.class).properties[pid.index]
    }

    /// Slot position of a property within a class's combined layout.
    pub fn slot_index(&self, class: ClassId, pid: PropertyId) -> Option<usize> {
        self.all_properties(class).iter().position(|p| p.id == pid)
    }

    /// True when `sub` is `sup` or one of its strict subclasses.
    pub fn is_kind_of(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut cursor = Some(sub);
        while let Some(c) = cursor {
            if c == sup {
                return true;
            }
            cursor = self.class(c).parent;
        }
        false
    }

    pub fn is_strict_subclass(&self, sub: ClassId, sup: ClassId) -> bool {
        sub != sup && self.is_kind_of(sub, sup)
    }

    /// Declared owner classes of `class` (targets of its owner refs).
    pub fn owners(&self, class: ClassId) -> Vec<ClassId> {
        let mut result = Vec::new();
        for p in self.all_properties(class) {
            if p.is_owner_ref() {
                if let Some(target) = p.target_class() {
                    if !result.contains(&target) {
                        result.push(target);
                    }
                }
            }
        }
        result
    }

    /// Classes that declare an owner reference at `class` (or one of its
    /// ancestors).
    pub fn dependents(&self, class: ClassId) -> Vec<ClassId> {
        self.classes
            .iter()
            .filter(|c| {
                self.owners(c.id)
                    .iter()
                    .any(|&owner| self.is_kind_of(class, owner))
            })
            .map(|c| c.id)
            .collect()
    }

    /// True when `class` transitively depends on `other` through owner
    /// references.
    pub fn depends_on(&self, class: ClassId, other: ClassId) -> bool {
        let mut stack = self.owners(class);
        let mut seen = vec![class];
        while let Some(owner) = stack.pop() {
            if self.is_kind_of(other, owner) || owner == other {
                return true;
            }
            if !seen.contains(&owner) {
                seen.push(owner);
                stack.extend(self.owners(owner));
            }
        }
        false
    }

    /// Stable total order over `classes`: owners precede dependents,
    /// ties keep input order.
    pub fn toposort_by_ownership(&self, classes: &[ClassId]) -> Vec<ClassId> {
        let mut remaining: Vec<ClassId> = classes.to_vec();
        let mut ordered = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let pos = remaining
                .iter()
                .position(|&c| {
                    !remaining
                        .iter()
                        .any(|&o| o != c && self.depends_on(c, o))
                })
                // the builder rejects ownership cycles, so this only
                // guards against pathological hand-built input
                .unwrap_or(0);
            ordered.push(remaining.remove(pos));
        }
        ordered
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Clone)]
enum TyRef {
    Primitive(Primitive),
    Named(String),
}

#[derive(Debug, Clone)]
struct PropertyDecl {
    name: String,
    ty: TyRef,
    many: bool,
    role: Option<ReferenceRole>,
}

/// Declaration of one class, filled through the builder methods.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    name: String,
    is_abstract: bool,
    parent: Option<String>,
    properties: Vec<PropertyDecl>,
}

impl ClassBuilder {
    /// Primitive attribute.
    pub fn attr(&mut self, name: &str, primitive: Primitive) -> &mut Self {
        self.properties.push(PropertyDecl {
            name: name.to_string(),
            ty: TyRef::Primitive(primitive),
            many: false,
            role: None,
        });
        self
    }

    /// Single-valued reference.
    pub fn reference(&mut self, name: &str, class: &str, role: ReferenceRole) -> &mut Self {
        self.properties.push(PropertyDecl {
            name: name.to_string(),
            ty: TyRef::Named(class.to_string()),
            many: false,
            role: Some(role),
        });
        self
    }

    /// Collection-valued reference.
    pub fn collection(&mut self, name: &str, class: &str, role: ReferenceRole) -> &mut Self {
        self.properties.push(PropertyDecl {
            name: name.to_string(),
            ty: TyRef::Named(class.to_string()),
            many: true,
            role: Some(role),
        });
        self
    }

    /// Declare a superclass by name.
    pub fn subclass_of(&mut self, parent: &str) -> &mut Self {
        self.parent = Some(parent.to_string());
        self
    }
}

/// Accumulates class declarations; [`MetamodelBuilder::build`] resolves
/// names and validates the ownership graph.
#[derive(Debug, Default)]
pub struct MetamodelBuilder {
    declarations: Vec<ClassBuilder>,
}

impl MetamodelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a concrete class and return its builder.
    pub fn class(&mut self, name: &str) -> &mut ClassBuilder {
        self.declarations.push(ClassBuilder {
            name: name.to_string(),
            is_abstract: false,
            parent: None,
            properties: Vec::new(),
        });
        self.declarations.last_mut().unwrap()
    }

    /// Declare an abstract class.
    pub fn abstract_class(&mut self, name: &str) -> &mut ClassBuilder {
        let class = self.class(name);
        class.is_abstract = true;
        class
    }

    pub fn build(self) -> Result<Metamodel, ModelError> {
        let mut by_name: IndexMap<String, ClassId> = IndexMap::new();
        for (i, decl) in self.declarations.iter().enumerate() {
            if by_name.insert(decl.name.clone(), ClassId(i)).is_some() {
                return Err(ModelError::DuplicateClass(decl.name.clone()));
            }
        }

        let resolve = |class: &str, name: &str| -> Result<ClassId, ModelError> {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| ModelError::UnknownClass {
                    class: class.to_string(),
                    name: name.to_string(),
                })
        };

        let mut classes = Vec::with_capacity(self.declarations.len());
        for (i, decl) in self.declarations.iter().enumerate() {
            let id = ClassId(i);
            let parent = match &decl.parent {
                Some(name) => Some(resolve(&decl.name, name)?),
                None => None,
            };
            let mut properties = Vec::with_capacity(decl.properties.len());
            for (index, prop) in decl.properties.iter().enumerate() {
                let ty = match &prop.ty {
                    TyRef::Primitive(p) => PropertyTy::Primitive(*p),
                    TyRef::Named(name) => PropertyTy::Class(resolve(&decl.name, name)?),
                };
                properties.push(Property {
                    id: PropertyId { class: id, index },
                    name: prop.name.clone(),
                    ty,
                    many: prop.many,
                    role: prop.role,
                });
            }
            classes.push(Class {
                id,
                name: decl.name.clone(),
                is_abstract: decl.is_abstract,
                parent,
                properties,
            });
        }

        let model = Metamodel { classes, by_name };
        model.check_ownership_acyclic()?;
        Ok(model)
    }
}

impl Metamodel {
    fn check_ownership_acyclic(&self) -> Result<(), ModelError> {
        for class in &self.classes {
            let mut stack = self.owners(class.id);
            let mut seen = Vec::new();
            while let Some(owner) = stack.pop() {
                if owner == class.id {
                    return Err(ModelError::OwnershipCycle(class.name.clone()));
                }
                if !seen.contains(&owner) {
                    seen.push(owner);
                    stack.extend(self.owners(owner));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family_model() -> Metamodel {
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
        builder
            .class("Parent")
            .attr("name", Primitive::Str)
            .reference("family", "Family", ReferenceRole::Owner)
            .reference("household", "Household", ReferenceRole::Dependent)
            .reference("spouse", "Parent", ReferenceRole::Independent);
        builder
            .class("Child")
            .attr("name", Primitive::Str)
            .reference("family", "Family", ReferenceRole::Owner)
            .collection("parents", "Parent", ReferenceRole::Independent);
        builder.build().unwrap()
    }

    #[test]
    fn test_lookup_and_property() {
        let model = family_model();
        let parent = model.lookup("Parent").unwrap();
        assert!(model.lookup("Stranger").is_none());

        let prop = model.property(parent, "household").unwrap();
        assert!(prop.is_reference());
        assert!(prop.is_dependent_ref());
        assert_eq!(
            prop.target_class(),
            Some(model.lookup("Household").unwrap())
        );
        assert!(model.property(parent, "missing").is_none());
    }

    #[test]
    fn test_inherited_property_resolution() {
        let mut builder = Metamodel::builder();
        builder.abstract_class("Person").attr("name", Primitive::Str);
        builder
            .class("Employee")
            .subclass_of("Person")
            .attr("salary", Primitive::Int);
        let model = builder.build().unwrap();

        let employee = model.lookup("Employee").unwrap();
        let person = model.lookup("Person").unwrap();
        let name = model.property(employee, "name").unwrap();
        assert_eq!(name.id.class, person);

        // inherited first, own after
        let all = model.all_properties(employee);
        assert_eq!(all[0].name, "name");
        assert_eq!(all[1].name, "salary");
        assert_eq!(model.slot_index(employee, name.id), Some(0));
        assert!(model.is_strict_subclass(employee, person));
        assert!(!model.is_concrete(person));
    }

    #[test]
    fn test_owners_and_dependents() {
        let model = family_model();
        let family = model.lookup("Family").unwrap();
        let parent = model.lookup("Parent").unwrap();
        let child = model.lookup("Child").unwrap();

        assert_eq!(model.owners(parent), vec![family]);
        assert!(model.owners(family).is_empty());
        let deps = model.dependents(family);
        assert!(deps.contains(&parent) && deps.contains(&child));
        assert!(model.depends_on(parent, family));
        assert!(!model.depends_on(family, parent));
    }

    #[test]
    fn test_toposort_owners_first_stable() {
        let model = family_model();
        let family = model.lookup("Family").unwrap();
        let parent = model.lookup("Parent").unwrap();
        let child = model.lookup("Child").unwrap();
        let household = model.lookup("Household").unwrap();

        let order = model.toposort_by_ownership(&[child, household, parent, family]);
        // household has no owners and comes before the blocked child;
        // child keeps its lead over parent once family is placed
        assert_eq!(order, vec![household, family, child, parent]);
    }

    #[test]
    fn test_unknown_reference_target_rejected() {
        let mut builder = Metamodel::builder();
        builder
            .class("Orphan")
            .reference("owner", "Nowhere", ReferenceRole::Owner);
        assert!(matches!(
            builder.build(),
            Err(ModelError::UnknownClass { .. })
        ));
    }

    #[test]
    fn test_ownership_cycle_rejected() {
        let mut builder = Metamodel::builder();
        builder
            .class("A")
            .reference("owner", "B", ReferenceRole::Owner);
        builder
            .class("B")
            .reference("owner", "A", ReferenceRole::Owner);
        assert!(matches!(
            builder.build(),
            Err(ModelError::OwnershipCycle(_))
        ));
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut builder = Metamodel::builder();
        builder.class("Twin");
        builder.class("Twin");
        assert!(matches!(
            builder.build(),
            Err(ModelError::DuplicateClass(_))
        ));
    }
}

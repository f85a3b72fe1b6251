//! Shim registry: user transforms and hooks bound to domain classes.
//!
//! Where the engine needs domain-specific behavior it consults this
//! registry instead of reopening domain classes: per-attribute value
//! transforms (run after the filter), reference transforms, per-instance
//! finalizers, validity predicates, target extractors, preferred-owner
//! hints, and secondary-key uniquifiers. A shim "module" is ordinary
//! code that registers closures here before the engine is built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ShimError;
use crate::metamodel::{ClassId, Metamodel, PropertyId};
use crate::object::{Arena, ObjId};
use crate::reader::{ExtractSink, Row};
use crate::value::Value;

/// Per-attribute value transform, `migrate_<attr>` in spirit: receives
/// the owning object, the filtered value, and the source row.
pub type AttrTransform = Box<dyn Fn(&Arena, ObjId, Value, &Row) -> Result<Value, ShimError>>;

/// Reference-resolution transform: may redirect or veto the candidate.
pub type RefTransform = Box<dyn Fn(&Arena, ObjId, ObjId, &Row) -> Option<ObjId>>;

/// Per-instance finalizer, the `migrate(row, migrated)` hook.
pub type Finalizer = Box<dyn Fn(&mut Arena, ObjId, &Row) -> Result<(), ShimError>>;

/// Validity predicate, the `migration_valid?` hook.
pub type Validator = Box<dyn Fn(&Arena, ObjId) -> bool>;

/// Target serializer for the extract sink.
pub type Extractor = Box<dyn Fn(&Arena, ObjId, &mut ExtractSink) -> Result<(), ShimError>>;

/// Disambiguation hint when several owner candidates remain.
pub type PreferredOwner = Box<dyn Fn(&Arena, ObjId, &[ObjId]) -> Option<ObjId>>;

/// Secondary-key uniquifier, applied when the engine runs with
/// `unique_keys`.
pub type Uniquifier = Box<dyn Fn(&mut Arena, ObjId)>;

/// All hooks registered for a migration, keyed by class and attribute.
///
/// Attribute registrations silently ignore names that do not resolve to
/// a property of the class, mirroring how a `migrate_<attr>` method with
/// no matching attribute would simply never be called.
pub struct ShimRegistry {
    model: Arc<Metamodel>,
    attr_transforms: HashMap<(ClassId, PropertyId), AttrTransform>,
    ref_transforms: HashMap<(ClassId, PropertyId), RefTransform>,
    finalizers: HashMap<ClassId, Finalizer>,
    validators: HashMap<ClassId, Validator>,
    extractors: HashMap<ClassId, Extractor>,
    preferred_owner: HashMap<ClassId, PreferredOwner>,
    uniquifiers: HashMap<ClassId, Uniquifier>,
}

impl ShimRegistry {
    pub fn new(model: Arc<Metamodel>) -> Self {
        Self {
            model,
            attr_transforms: HashMap::new(),
            ref_transforms: HashMap::new(),
            finalizers: HashMap::new(),
            validators: HashMap::new(),
            extractors: HashMap::new(),
            preferred_owner: HashMap::new(),
            uniquifiers: HashMap::new(),
        }
    }

    fn resolve_attr(&self, class: ClassId, attr: &str) -> Option<PropertyId> {
        self.model.property(class, attr).map(|p| p.id)
    }

    /// Register a `migrate_<attr>` transform. Unknown attributes are
    /// ignored.
    pub fn register_attr_transform(
        &mut self,
        class: ClassId,
        attr: &str,
        transform: AttrTransform,
    ) {
        if let Some(pid) = self.resolve_attr(class, attr) {
            self.attr_transforms.insert((class, pid), transform);
        }
    }

    /// Register a reference transform consulted during resolution.
    /// Unknown attributes are ignored.
    pub fn register_reference_transform(
        &mut self,
        class: ClassId,
        attr: &str,
        transform: RefTransform,
    ) {
        if let Some(pid) = self.resolve_attr(class, attr) {
            self.ref_transforms.insert((class, pid), transform);
        }
    }

    pub fn register_finalizer(&mut self, class: ClassId, finalizer: Finalizer) {
        self.finalizers.insert(class, finalizer);
    }

    pub fn register_validator(&mut self, class: ClassId, validator: Validator) {
        self.validators.insert(class, validator);
    }

    pub fn register_extractor(&mut self, class: ClassId, extractor: Extractor) {
        self.extractors.insert(class, extractor);
    }

    pub fn register_preferred_owner(&mut self, class: ClassId, hook: PreferredOwner) {
        self.preferred_owner.insert(class, hook);
    }

    pub fn register_uniquifier(&mut self, class: ClassId, uniquifier: Uniquifier) {
        self.uniquifiers.insert(class, uniquifier);
    }

    pub fn attr_transform(
        &self,
        class: ClassId,
        pid: PropertyId,
    ) -> Option<&AttrTransform> {
        self.attr_transforms.get(&(class, pid))
    }

    pub fn reference_transform(
        &self,
        class: ClassId,
        pid: PropertyId,
    ) -> Option<&RefTransform> {
        self.ref_transforms.get(&(class, pid))
    }

    pub fn finalizer(&self, class: ClassId) -> Option<&Finalizer> {
        self.finalizers.get(&class)
    }

    /// Validity of an instance; classes without a validator are valid.
    pub fn is_valid(&self, arena: &Arena, obj: ObjId) -> bool {
        match self.validators.get(&arena.class_of(obj)) {
            Some(validator) => validator(arena, obj),
            None => true,
        }
    }

    pub fn extractor(&self, class: ClassId) -> Option<&Extractor> {
        self.extractors.get(&class)
    }

    pub fn preferred_owner(&self, class: ClassId) -> Option<&PreferredOwner> {
        self.preferred_owner.get(&class)
    }

    pub fn uniquifier(&self, class: ClassId) -> Option<&Uniquifier> {
        self.uniquifiers.get(&class)
    }
}

impl std::fmt::Debug for ShimRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimRegistry")
            .field("attr_transforms", &self.attr_transforms.len())
            .field("ref_transforms", &self.ref_transforms.len())
            .field("finalizers", &self.finalizers.len())
            .field("validators", &self.validators.len())
            .field("extractors", &self.extractors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::{Metamodel, Primitive};
    use indexmap::IndexMap;

    fn model() -> Arc<Metamodel> {
        let mut builder = Metamodel::builder();
        builder.class("Parent").attr("name", Primitive::Str);
        Arc::new(builder.build().unwrap())
    }

    fn row() -> Row {
        Row {
            record: 1,
            raw: vec![],
            fields: IndexMap::new(),
        }
    }

    #[test]
    fn test_attr_transform_registration_and_dispatch() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let name = model.property(parent, "name").unwrap().id;

        let mut registry = ShimRegistry::new(model.clone());
        registry.register_attr_transform(
            parent,
            "name",
            Box::new(|_, _, value, _| Ok(Value::Str(format!("{}!", value.render())))),
        );

        let arena = Arena::new(model);
        let transform = registry.attr_transform(parent, name).unwrap();
        let out = transform(&arena, ObjId(0), Value::Str("Joe".into()), &row()).unwrap();
        assert_eq!(out, Value::Str("Joe!".into()));
    }

    #[test]
    fn test_unknown_attr_silently_ignored() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let mut registry = ShimRegistry::new(model);
        registry.register_attr_transform(
            parent,
            "nickname",
            Box::new(|_, _, value, _| Ok(value)),
        );
        assert!(registry.attr_transforms.is_empty());
    }

    #[test]
    fn test_default_validity_is_true() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let registry = ShimRegistry::new(model.clone());

        let mut arena = Arena::new(model);
        let joe = arena.alloc(parent).unwrap();
        assert!(registry.is_valid(&arena, joe));
    }

    #[test]
    fn test_validator_dispatch() {
        let model = model();
        let parent = model.lookup("Parent").unwrap();
        let name = model.property(parent, "name").unwrap().id;

        let mut registry = ShimRegistry::new(model.clone());
        registry.register_validator(
            parent,
            Box::new(move |arena, obj| !arena.value(obj, name).is_absent()),
        );

        let mut arena = Arena::new(model);
        let joe = arena.alloc(parent).unwrap();
        assert!(!registry.is_valid(&arena, joe));
        arena
            .write_value(joe, name, Value::Str("Joe".into()))
            .unwrap();
        assert!(registry.is_valid(&arena, joe));
    }
}

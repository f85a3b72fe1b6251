//! Per-row object arena.
//!
//! All objects created while migrating one row live in an [`Arena`];
//! references between them are arena indices, which keeps the cyclic
//! parent/spouse/household shapes safe without interior mutability. The
//! arena is dropped (or handed to the caller inside [`Emitted`]) before
//! the next row starts, so resident memory does not grow with the row
//! count.

use std::sync::Arc;

use crate::error::{RowError, RowResult};
use crate::metamodel::{ClassId, Metamodel, Primitive, Property, PropertyId};
use crate::value::Value;

/// Index of an object within its row's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub usize);

/// One property binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Unset,
    Value(Value),
    Ref(ObjId),
    Many(Vec<ObjId>),
}

impl Slot {
    pub fn is_unset(&self) -> bool {
        matches!(self, Slot::Unset)
    }

    pub fn as_ref_id(&self) -> Option<ObjId> {
        match self {
            Slot::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A domain object under construction: its class and one slot per
/// visible property (inherited first, own after).
#[derive(Debug, Clone)]
pub struct Instance {
    pub class: ClassId,
    slots: Vec<Slot>,
}

/// Arena of the objects instantiated for a single row.
#[derive(Debug, Clone)]
pub struct Arena {
    model: Arc<Metamodel>,
    objects: Vec<Instance>,
}

impl Arena {
    pub fn new(model: Arc<Metamodel>) -> Self {
        Self {
            model,
            objects: Vec::new(),
        }
    }

    pub fn model(&self) -> &Metamodel {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Arena ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = ObjId> {
        (0..self.objects.len()).map(ObjId)
    }

    /// Instantiate an empty object; abstract classes cannot be
    /// synthesized.
    pub fn alloc(&mut self, class: ClassId) -> RowResult<ObjId> {
        if !self.model.is_concrete(class) {
            return Err(RowError::AbstractIntermediate(
                self.model.class_name(class).to_string(),
            ));
        }
        let width = self.model.all_properties(class).len();
        self.objects.push(Instance {
            class,
            slots: vec![Slot::Unset; width],
        });
        Ok(ObjId(self.objects.len() - 1))
    }

    pub fn class_of(&self, obj: ObjId) -> ClassId {
        self.objects[obj.0].class
    }

    /// Objects that are instances of `class` (subclasses included), in
    /// allocation order.
    pub fn instances_of(&self, class: ClassId) -> Vec<ObjId> {
        self.ids()
            .filter(|&id| self.model.is_kind_of(self.class_of(id), class))
            .collect()
    }

    fn slot_position(&self, obj: ObjId, pid: PropertyId) -> usize {
        self.model
            .slot_index(self.class_of(obj), pid)
            .unwrap_or_else(|| {
                panic!(
                    "property {:?} is not part of class '{}'",
                    pid,
                    self.model.class_name(self.class_of(obj))
                )
            })
    }

    pub fn get(&self, obj: ObjId, pid: PropertyId) -> &Slot {
        &self.objects[obj.0].slots[self.slot_position(obj, pid)]
    }

    pub fn set(&mut self, obj: ObjId, pid: PropertyId, slot: Slot) {
        let pos = self.slot_position(obj, pid);
        self.objects[obj.0].slots[pos] = slot;
    }

    pub fn is_unset(&self, obj: ObjId, pid: PropertyId) -> bool {
        self.get(obj, pid).is_unset()
    }

    /// Referenced object, when the slot holds a single reference.
    pub fn read_ref(&self, obj: ObjId, pid: PropertyId) -> Option<ObjId> {
        self.get(obj, pid).as_ref_id()
    }

    /// Primitive value of a slot; absent when unset or non-value.
    pub fn value(&self, obj: ObjId, pid: PropertyId) -> Value {
        match self.get(obj, pid) {
            Slot::Value(v) => v.clone(),
            _ => Value::Absent,
        }
    }

    pub fn set_ref(&mut self, obj: ObjId, pid: PropertyId, target: ObjId) {
        self.set(obj, pid, Slot::Ref(target));
    }

    /// Append to a collection slot, materializing it on first use.
    pub fn push_many(&mut self, obj: ObjId, pid: PropertyId, target: ObjId) {
        let pos = self.slot_position(obj, pid);
        match &mut self.objects[obj.0].slots[pos] {
            Slot::Many(items) => items.push(target),
            slot @ Slot::Unset => *slot = Slot::Many(vec![target]),
            other => panic!("push into non-collection slot {other:?}"),
        }
    }

    /// Type-checked primitive assignment through the property writer.
    ///
    /// String attributes accept any scalar (rendered); the other
    /// primitives insist on their own variant, except integers widening
    /// into floats.
    pub fn write_value(&mut self, obj: ObjId, pid: PropertyId, value: Value) -> RowResult<()> {
        let prop = self.model.property_by_id(pid);
        let fitted = fit_value(prop, value).ok_or_else(|| RowError::WriterRejected {
            class: self.model.class_name(self.class_of(obj)).to_string(),
            property: prop.name.clone(),
            value: "incompatible value".into(),
        })?;
        self.set(obj, pid, Slot::Value(fitted));
        Ok(())
    }

    /// Unset every reference slot of an object.
    pub fn clear_references(&mut self, obj: ObjId) {
        let pids: Vec<PropertyId> = self
            .model
            .all_properties(self.class_of(obj))
            .iter()
            .filter(|p| p.is_reference())
            .map(|p| p.id)
            .collect();
        for pid in pids {
            self.set(obj, pid, Slot::Unset);
        }
    }

    /// Unset the owner-role reference slots of an object.
    pub fn clear_owner_refs(&mut self, obj: ObjId) {
        let pids: Vec<PropertyId> = self
            .model
            .all_properties(self.class_of(obj))
            .iter()
            .filter(|p| p.is_owner_ref())
            .map(|p| p.id)
            .collect();
        for pid in pids {
            self.set(obj, pid, Slot::Unset);
        }
    }
}

/// Coerce `value` into the property's declared primitive; `None` when it
/// does not fit.
pub(crate) fn fit_value(prop: &Property, value: Value) -> Option<Value> {
    let primitive = prop.primitive()?;
    match (primitive, value) {
        (Primitive::Str, Value::Str(s)) => Some(Value::Str(s)),
        (Primitive::Str, other) if !other.is_absent() => Some(Value::Str(other.render())),
        (Primitive::Int, Value::Int(n)) => Some(Value::Int(n)),
        (Primitive::Float, Value::Float(f)) => Some(Value::Float(f)),
        (Primitive::Float, Value::Int(n)) => Some(Value::Float(n as f64)),
        (Primitive::Date, Value::Date(d)) => Some(Value::Date(d)),
        (Primitive::Bool, Value::Bool(b)) => Some(Value::Bool(b)),
        _ => None,
    }
}

// =============================================================================
// Emitted target
// =============================================================================

/// A successfully migrated row: the surviving arena plus the target
/// object.
#[derive(Debug, Clone)]
pub struct Emitted {
    arena: Arena,
    target: ObjId,
}

impl Emitted {
    pub fn new(arena: Arena, target: ObjId) -> Self {
        Self { arena, target }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn target(&self) -> ObjId {
        self.target
    }

    /// Walk a dotted attribute path from the target and return the
    /// primitive value at its end; absent when any hop is unset.
    pub fn value_at(&self, path: &str) -> Value {
        match self.resolve(path) {
            Some((obj, pid)) => self.arena.value(obj, pid),
            None => Value::Absent,
        }
    }

    /// Walk a dotted path and return the object the final reference
    /// points at.
    pub fn ref_at(&self, path: &str) -> Option<ObjId> {
        let (obj, pid) = self.resolve(path)?;
        self.arena.read_ref(obj, pid)
    }

    /// Objects in a collection at a dotted path.
    pub fn many_at(&self, path: &str) -> Vec<ObjId> {
        match self.resolve(path) {
            Some((obj, pid)) => match self.arena.get(obj, pid) {
                Slot::Many(items) => items.clone(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Resolve a dotted path to (parent object, terminal property).
    fn resolve(&self, path: &str) -> Option<(ObjId, PropertyId)> {
        let model = self.arena.model();
        let mut obj = self.target;
        let tokens: Vec<&str> = path.split('.').collect();
        let (last, hops) = tokens.split_last()?;
        for token in hops {
            let prop = model.property(self.arena.class_of(obj), token)?;
            obj = self.arena.read_ref(obj, prop.id)?;
        }
        let prop = model.property(self.arena.class_of(obj), last)?;
        Some((obj, prop.id))
    }
}

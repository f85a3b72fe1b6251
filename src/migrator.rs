//! Row migrator: one CSV record in, one object graph out.
//!
//! Migration of a row runs in phases:
//!
//! - **A** instantiate one object per creatable class;
//! - **B** assign mapped cells along their attribute paths, synthesizing
//!   missing intermediate objects and applying filter and shim;
//! - **C** apply defaults to still-unset attributes;
//! - **D** run secondary-key uniquifiers when enabled;
//! - **E** run per-instance finalizers;
//! - **F** validate, resolve owner and peer references, and prune
//!   invalid objects;
//! - **G** select the unique surviving target instance.
//!
//! Everything lives in a per-row [`Arena`]; a successful row moves the
//! arena into the returned [`Emitted`], a rejected row drops it.

use std::sync::Arc;

use crate::error::RowResult;
use crate::mapping::Mapping;
use crate::metamodel::{ClassId, Metamodel, Property, PropertyId};
use crate::object::{Arena, Emitted, ObjId, Slot};
use crate::reader::Row;
use crate::shim::ShimRegistry;
use crate::value::Value;

/// Migrates rows against a compiled mapping and shim registry.
pub struct RowMigrator<'a> {
    model: Arc<Metamodel>,
    mapping: &'a Mapping,
    shims: &'a ShimRegistry,
    unique_keys: bool,
}

impl<'a> RowMigrator<'a> {
    pub fn new(
        model: Arc<Metamodel>,
        mapping: &'a Mapping,
        shims: &'a ShimRegistry,
        unique_keys: bool,
    ) -> Self {
        Self {
            model,
            mapping,
            shims,
            unique_keys,
        }
    }

    /// Migrate one row. `Ok(None)` is a reject (no surviving target);
    /// errors follow the per-row failure policy in the driver.
    pub fn migrate(&self, row: &Row) -> RowResult<Option<Emitted>> {
        if self.all_mapped_cells_absent(row) {
            return Ok(None);
        }

        let mut arena = Arena::new(self.model.clone());

        // Phase A: one instance per creatable class, owners first.
        let mut creatable = Vec::with_capacity(self.mapping.creatable().len());
        for &class in self.mapping.creatable() {
            let obj = arena.alloc(class)?;
            creatable.push((class, obj));
        }

        // Phase B: mapped values.
        for &(class, obj) in &creatable {
            let Some(class_mapping) = self.mapping.for_class(class) else {
                continue;
            };
            for (path, field_key) in &class_mapping.paths {
                let value = row.get(field_key).clone().rstrip();
                if value.is_absent() {
                    continue;
                }
                let parent = self.walk(&mut arena, obj, path.parents(), row)?;
                let terminal = path.terminal();
                let effective = self.transform(&arena, class, obj, terminal, value, row)?;
                if effective.is_absent() {
                    continue;
                }
                arena.write_value(parent, terminal, effective)?;
            }
        }

        // Phase C: defaults, merge semantics.
        for &(class, obj) in &creatable {
            let Some(class_mapping) = self.mapping.for_class(class) else {
                continue;
            };
            for (path, literal) in &class_mapping.defaults {
                let parent = self.walk(&mut arena, obj, path.parents(), row)?;
                let terminal = path.terminal();
                if arena.is_unset(parent, terminal) {
                    arena.set(parent, terminal, Slot::Value(literal.clone()));
                }
            }
        }

        // Phase D: uniquifiers.
        if self.unique_keys {
            for &(class, obj) in &creatable {
                if let Some(uniquify) = self.shims.uniquifier(class) {
                    uniquify(&mut arena, obj);
                }
            }
        }

        // Phase E: per-instance finalizers over the whole migrated set.
        for obj in arena.ids().collect::<Vec<_>>() {
            let class = arena.class_of(obj);
            if let Some(finalizer) = self.shims.finalizer(class) {
                finalizer(&mut arena, obj, row)?;
            }
        }

        // Phase F: validity and reference resolution.
        let valid = self.validate_and_resolve(&mut arena, row);

        // Phase G: unique surviving target among the creatable
        // instances (shim-synthesized extras do not compete).
        let target = self.mapping.target();
        let survivors: Vec<ObjId> = creatable
            .iter()
            .filter(|(class, obj)| {
                valid[obj.0] && self.model.is_kind_of(*class, target)
            })
            .map(|&(_, obj)| obj)
            .collect();
        match survivors.as_slice() {
            [] => Ok(None),
            [winner] => Ok(Some(Emitted::new(arena, *winner))),
            many => Err(crate::error::RowError::MultipleTargets {
                class: self.model.class_name(target).to_string(),
                count: many.len(),
            }),
        }
    }

    /// True when every mapped input cell of the row is absent.
    fn all_mapped_cells_absent(&self, row: &Row) -> bool {
        let mut saw_any = false;
        for &class in self.mapping.creatable() {
            let Some(class_mapping) = self.mapping.for_class(class) else {
                continue;
            };
            for field_key in class_mapping.paths.values() {
                saw_any = true;
                if !row.get(field_key).is_absent() {
                    return false;
                }
            }
        }
        saw_any
    }

    /// Walk the parent hops of a path from `root`, synthesizing missing
    /// intermediates (running their finalizer on an otherwise empty
    /// migrated set) and linking them to their parent.
    fn walk(
        &self,
        arena: &mut Arena,
        root: ObjId,
        parents: &[PropertyId],
        row: &Row,
    ) -> RowResult<ObjId> {
        let mut cursor = root;
        for &pid in parents {
            cursor = match arena.read_ref(cursor, pid) {
                Some(next) => next,
                None => {
                    let class = self
                        .model
                        .property_by_id(pid)
                        .target_class()
                        .expect("path hops are reference-typed");
                    let fresh = arena.alloc(class)?;
                    if let Some(finalizer) = self.shims.finalizer(class) {
                        finalizer(arena, fresh, row)?;
                    }
                    arena.set_ref(cursor, pid, fresh);
                    fresh
                }
            };
        }
        Ok(cursor)
    }

    /// Filter then shim transform for a terminal attribute.
    fn transform(
        &self,
        arena: &Arena,
        class: ClassId,
        obj: ObjId,
        terminal: PropertyId,
        value: Value,
        row: &Row,
    ) -> RowResult<Value> {
        let filtered = match self.mapping.filter_for(class, terminal) {
            Some(filter) => filter.apply(value),
            None => value,
        };
        if filtered.is_absent() {
            return Ok(Value::Absent);
        }
        match self.shims.attr_transform(class, terminal) {
            Some(shim) => Ok(shim(arena, obj, filtered, row)?),
            None => Ok(filtered),
        }
    }

    /// Phase F. Returns the per-object validity flags.
    fn validate_and_resolve(&self, arena: &mut Arena, row: &Row) -> Vec<bool> {
        // F.1: order objects so owners come first; the reverse visits
        // dependents first.
        let mut present: Vec<ClassId> = Vec::new();
        for obj in arena.ids() {
            let class = arena.class_of(obj);
            if !present.contains(&class) {
                present.push(class);
            }
        }
        let rank_order = self.model.toposort_by_ownership(&present);
        let rank = |class: ClassId| {
            rank_order
                .iter()
                .position(|&c| c == class)
                .unwrap_or(usize::MAX)
        };
        let mut owners_first: Vec<ObjId> = arena.ids().collect();
        owners_first.sort_by_key(|&obj| rank(arena.class_of(obj)));
        let dependents_first: Vec<ObjId> = owners_first.iter().rev().copied().collect();

        // F.2: partition by validity; break invalid back-links.
        let mut valid = vec![false; arena.len()];
        for &obj in &dependents_first {
            valid[obj.0] = self.shims.is_valid(arena, obj);
        }
        for &obj in &dependents_first {
            if !valid[obj.0] {
                arena.clear_owner_refs(obj);
            }
        }

        // F.3: owner references.
        for &obj in &dependents_first {
            if valid[obj.0] {
                self.resolve_owner(arena, obj, row);
            }
        }

        // F.4: peer references.
        for &obj in &dependents_first {
            if valid[obj.0] {
                self.resolve_peers(arena, obj, row);
            }
        }

        // F.5: owners first, invalidate objects whose owner type exists
        // only as invalid instances.
        for &obj in &owners_first {
            if !valid[obj.0] {
                continue;
            }
            let orphaned = self
                .owner_properties(arena.class_of(obj))
                .into_iter()
                .any(|prop| {
                    let target = prop_target(&self.model, prop);
                    let candidates = arena.instances_of(target);
                    !candidates.is_empty() && candidates.iter().all(|c| !valid[c.0])
                });
            if orphaned {
                valid[obj.0] = false;
                arena.clear_owner_refs(obj);
            }
        }

        // F.6: dependents first, drop closure hosts left with nothing
        // to host.
        for &obj in &dependents_first {
            if !valid[obj.0] {
                continue;
            }
            let class = arena.class_of(obj);
            if !self.mapping.owner_closure().contains(&class) {
                continue;
            }
            let dependent_classes = self.model.dependents(class);
            let dependents: Vec<ObjId> = arena
                .ids()
                .filter(|&d| d != obj && dependent_classes.contains(&arena.class_of(d)))
                .collect();
            if dependents.iter().all(|d| !valid[d.0]) {
                arena.clear_references(obj);
                valid[obj.0] = false;
            }
        }

        // Surviving owner references must point at surviving objects.
        for &obj in &owners_first {
            if !valid[obj.0] {
                continue;
            }
            let owner_pids: Vec<PropertyId> = self
                .owner_properties(arena.class_of(obj))
                .into_iter()
                .map(|p| p.id)
                .collect();
            for pid in owner_pids {
                if let Some(owner) = arena.read_ref(obj, pid) {
                    if !valid[owner.0] {
                        arena.set(obj, pid, Slot::Unset);
                    }
                }
            }
        }

        valid
    }

    fn owner_properties(&self, class: ClassId) -> Vec<&Property> {
        self.model
            .all_properties(class)
            .into_iter()
            .filter(|p| p.is_owner_ref() && !p.many)
            .collect()
    }

    /// F.3: pick and assign the owner reference of one object.
    fn resolve_owner(&self, arena: &mut Arena, obj: ObjId, _row: &Row) {
        let class = arena.class_of(obj);
        let mut resolved: Vec<(PropertyId, ObjId)> = Vec::new();
        for prop in self.owner_properties(class) {
            let target = prop_target(&self.model, prop);
            let candidates: Vec<ObjId> = arena
                .instances_of(target)
                .into_iter()
                .filter(|&c| c != obj)
                .collect();
            if let [only] = candidates.as_slice() {
                resolved.push((prop.id, *only));
            }
        }

        let chosen = match resolved.as_slice() {
            [] => return,
            [only] => Some(*only),
            many => {
                // Prefer the property whose candidate is the target
                // class, then the per-class hook; otherwise leave unset.
                let preferred: Vec<(PropertyId, ObjId)> = many
                    .iter()
                    .copied()
                    .filter(|(_, cand)| {
                        self.model
                            .is_kind_of(arena.class_of(*cand), self.mapping.target())
                    })
                    .collect();
                match preferred.as_slice() {
                    [only] => Some(*only),
                    _ => self.shims.preferred_owner(class).and_then(|hook| {
                        let candidates: Vec<ObjId> =
                            many.iter().map(|&(_, c)| c).collect();
                        let pick = hook(arena, obj, &candidates)?;
                        many.iter().copied().find(|&(_, c)| c == pick)
                    }),
                }
            }
        };

        if let Some((pid, owner)) = chosen {
            if arena.is_unset(obj, pid) {
                arena.set_ref(obj, pid, owner);
            }
        }
    }

    /// F.4: independent and unidirectional-dependent references, single
    /// or collection, assigned when exactly one candidate exists.
    fn resolve_peers(&self, arena: &mut Arena, obj: ObjId, row: &Row) {
        let class = arena.class_of(obj);
        let peer_props: Vec<(PropertyId, ClassId, bool)> = self
            .model
            .all_properties(class)
            .into_iter()
            .filter(|p| p.is_independent_ref() || p.is_dependent_ref())
            .map(|p| (p.id, prop_target(&self.model, p), p.many))
            .collect();

        for (pid, target, many) in peer_props {
            if !arena.is_unset(obj, pid) {
                continue;
            }
            let candidates: Vec<ObjId> = arena
                .instances_of(target)
                .into_iter()
                .filter(|&c| c != obj)
                .collect();
            let [candidate] = candidates.as_slice() else {
                continue;
            };
            let candidate = match self.shims.reference_transform(class, pid) {
                Some(transform) => match transform(arena, obj, *candidate, row) {
                    Some(redirected) => redirected,
                    None => continue,
                },
                None => *candidate,
            };
            if many {
                arena.push_many(obj, pid, candidate);
            } else {
                arena.set_ref(obj, pid, candidate);
            }
        }
    }
}

fn prop_target(model: &Metamodel, prop: &Property) -> ClassId {
    prop.target_class().unwrap_or_else(|| {
        panic!(
            "reference property '{}' has no class target",
            prop.name
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultsConfig, FieldConfig, FilterConfig};
    use crate::error::ShimError;
    use crate::filter::FilterSpec;
    use crate::fixtures::{family_model, family_reader};
    use indexmap::IndexMap;

    fn parent_mapping(
        model: &Metamodel,
        defaults: Option<&DefaultsConfig>,
        filters: Option<&FilterConfig>,
    ) -> Mapping {
        let source = family_reader("First,Last,Street,City,Spouse");
        let fields = FieldConfig::default()
            .map("First", "Parent.name")
            .map("Street", "Parent.household.address.street1")
            .map("City", "Parent.household.address.city");
        let parent = model.lookup("Parent").unwrap();
        Mapping::compile(model, parent, &[fields], defaults, filters, &source).unwrap()
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        let mut raw = Vec::new();
        let mut fields = IndexMap::new();
        for (key, cell) in pairs {
            raw.push(cell.to_string());
            fields.insert(key.to_string(), Value::coerce(cell));
        }
        Row {
            record: 1,
            raw,
            fields,
        }
    }

    #[test]
    fn test_happy_path_materializes_intermediates() {
        let model = family_model();
        let defaults =
            DefaultsConfig::default().set("Parent.household.address.state", "IL");
        let filters = FilterConfig::default().with(
            "Parent.household.address.street1",
            FilterSpec::new().rule("/Street/", "St"),
        );
        let mapping = parent_mapping(&model, Some(&defaults), Some(&filters));
        let shims = ShimRegistry::new(model.clone());
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        let emitted = migrator
            .migrate(&row(&[
                ("first", "Joe"),
                ("street", "123 Oak Street"),
                ("city", "Chicago"),
            ]))
            .unwrap()
            .expect("row should emit");

        assert_eq!(emitted.value_at("name"), Value::Str("Joe".into()));
        assert!(emitted.ref_at("household").is_some());
        assert_eq!(
            emitted.value_at("household.address.street1"),
            Value::Str("123 Oak St".into())
        );
        assert_eq!(
            emitted.value_at("household.address.city"),
            Value::Str("Chicago".into())
        );
        // default filled the unmapped attribute
        assert_eq!(
            emitted.value_at("household.address.state"),
            Value::Str("IL".into())
        );
    }

    #[test]
    fn test_default_does_not_overwrite_mapped_value() {
        let model = family_model();
        let defaults =
            DefaultsConfig::default().set("Parent.household.address.city", "Springfield");
        let mapping = parent_mapping(&model, Some(&defaults), None);
        let shims = ShimRegistry::new(model.clone());
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        let emitted = migrator
            .migrate(&row(&[("first", "Joe"), ("city", "Chicago")]))
            .unwrap()
            .unwrap();
        assert_eq!(
            emitted.value_at("household.address.city"),
            Value::Str("Chicago".into())
        );
    }

    #[test]
    fn test_all_mapped_cells_absent_rejects() {
        let model = family_model();
        let mapping = parent_mapping(&model, None, None);
        let shims = ShimRegistry::new(model.clone());
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        let result = migrator
            .migrate(&row(&[("first", ""), ("street", ""), ("city", "")]))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_shim_error_aborts_row() {
        let model = family_model();
        let mapping = parent_mapping(&model, None, None);
        let parent = model.lookup("Parent").unwrap();
        let mut shims = ShimRegistry::new(model.clone());
        shims.register_attr_transform(
            parent,
            "name",
            Box::new(|_, _, value, _| {
                if value.render() == "Mark" {
                    Err(ShimError::new("migrate_name", "Parent", "bad record"))
                } else {
                    Ok(value)
                }
            }),
        );
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        assert!(migrator.migrate(&row(&[("first", "Mark")])).is_err());
        assert!(migrator.migrate(&row(&[("first", "Tom")])).unwrap().is_some());
    }

    #[test]
    fn test_invalid_target_rejects_row() {
        let model = family_model();
        let mapping = parent_mapping(&model, None, None);
        let parent = model.lookup("Parent").unwrap();
        let name = model.property(parent, "name").unwrap().id;
        let mut shims = ShimRegistry::new(model.clone());
        shims.register_validator(
            parent,
            Box::new(move |arena, obj| arena.value(obj, name).render() == "Tom"),
        );
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        assert!(migrator.migrate(&row(&[("first", "Sue")])).unwrap().is_none());
        assert!(migrator.migrate(&row(&[("first", "Tom")])).unwrap().is_some());
    }

    #[test]
    fn test_owner_closure_host_survives_with_valid_dependent() {
        let model = family_model();
        let mapping = parent_mapping(&model, None, None);
        let family = model.lookup("Family").unwrap();
        assert!(mapping.owner_closure().contains(&family));
        let shims = ShimRegistry::new(model.clone());
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        let emitted = migrator
            .migrate(&row(&[("first", "Joe")]))
            .unwrap()
            .unwrap();
        // owner reference resolved onto the closure-created Family
        assert!(emitted.ref_at("family").is_some());
    }

    #[test]
    fn test_spouse_shim_shares_household() {
        let model = family_model();
        let mapping = parent_mapping(&model, None, None);
        let parent = model.lookup("Parent").unwrap();
        let name = model.property(parent, "name").unwrap().id;
        let spouse = model.property(parent, "spouse").unwrap().id;
        let household = model.property(parent, "household").unwrap().id;

        let creatable_count = mapping.creatable().len();
        let mut shims = ShimRegistry::new(model.clone());
        shims.register_finalizer(
            parent,
            Box::new(move |arena, obj, row| {
                // only the creatable parent reacts, not the synthesized
                // spouse itself
                if obj.0 >= creatable_count {
                    return Ok(());
                }
                let spouse_name = row.get("spouse").clone();
                if spouse_name.is_absent() {
                    return Ok(());
                }
                let other = arena.alloc(arena.class_of(obj)).map_err(|_| {
                    ShimError::new("migrate", "Parent", "cannot synthesize spouse")
                })?;
                arena.write_value(other, name, spouse_name).map_err(|_| {
                    ShimError::new("migrate", "Parent", "cannot name spouse")
                })?;
                arena.set_ref(obj, spouse, other);
                arena.set_ref(other, spouse, obj);
                if let Some(home) = arena.read_ref(obj, household) {
                    arena.set_ref(other, household, home);
                }
                Ok(())
            }),
        );
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        let emitted = migrator
            .migrate(&row(&[
                ("first", "Joe"),
                ("street", "123 Oak Street"),
                ("spouse", "Jane"),
            ]))
            .unwrap()
            .expect("spouse instance must not compete for the target");

        let jane = emitted.ref_at("spouse").expect("spouse linked");
        assert_eq!(
            emitted.arena().value(jane, name),
            Value::Str("Jane".into())
        );
        assert_eq!(emitted.ref_at("spouse.household"), emitted.ref_at("household"));
        assert_eq!(
            emitted.arena().read_ref(jane, spouse),
            Some(emitted.target())
        );
    }

    #[test]
    fn test_child_parents_collection_resolved() {
        let model = family_model();
        let child = model.lookup("Child").unwrap();
        let parent = model.lookup("Parent").unwrap();
        let source = family_reader("Kid,First");
        let fields = FieldConfig::default()
            .map("Kid", "Child.name")
            .map("First", "Parent.name");
        let mapping =
            Mapping::compile(&model, child, &[fields], None, None, &source).unwrap();
        let shims = ShimRegistry::new(model.clone());
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        let emitted = migrator
            .migrate(&row(&[("kid", "Tim"), ("first", "Joe")]))
            .unwrap()
            .unwrap();
        let parents = emitted.many_at("parents");
        assert_eq!(parents.len(), 1);
        assert_eq!(emitted.arena().class_of(parents[0]), parent);
    }

    #[test]
    fn test_writer_mismatch_is_row_error() {
        let model = family_model();
        let child = model.lookup("Child").unwrap();
        let source = family_reader("Kid,Born");
        let fields = FieldConfig::default()
            .map("Kid", "Child.name")
            .map("Born", "Child.birthday");
        let mapping =
            Mapping::compile(&model, child, &[fields], None, None, &source).unwrap();
        let shims = ShimRegistry::new(model.clone());
        let migrator = RowMigrator::new(model.clone(), &mapping, &shims, false);

        // a date attribute fed a plain string
        let result = migrator.migrate(&row(&[("kid", "Tim"), ("born", "not a date")]));
        assert!(matches!(
            result,
            Err(crate::error::RowError::WriterRejected { .. })
        ));
        // a real date is fine
        assert!(migrator
            .migrate(&row(&[("kid", "Tim"), ("born", "1999-1-5")]))
            .unwrap()
            .is_some());
    }
}

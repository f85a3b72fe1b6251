//! Shared test fixtures: the family metamodel used across migrator and
//! engine tests.

use std::io::Cursor;
use std::sync::Arc;

use crate::metamodel::{Metamodel, Primitive, ReferenceRole};
use crate::reader::CsvSource;

/// Family / Parent / Child / Household / Address model.
///
/// Parent and Child are owned by Family; Parent keeps a household whose
/// address hangs off it; spouse is a peer reference between parents and
/// children hold their parents in a collection.
pub fn family_model() -> Arc<Metamodel> {
    let mut builder = Metamodel::builder();
    builder.class("Family").attr("surname", Primitive::Str);
    builder
        .class("Address")
        .attr("street1", Primitive::Str)
        .attr("street2", Primitive::Str)
        .attr("city", Primitive::Str)
        .attr("state", Primitive::Str)
        .attr("zip", Primitive::Str);
    builder
        .class("Household")
        .reference("address", "Address", ReferenceRole::Dependent);
    builder
        .class("Parent")
        .attr("name", Primitive::Str)
        .attr("retired", Primitive::Bool)
        .reference("family", "Family", ReferenceRole::Owner)
        .reference("household", "Household", ReferenceRole::Dependent)
        .reference("spouse", "Parent", ReferenceRole::Independent);
    builder
        .class("Child")
        .attr("name", Primitive::Str)
        .attr("birthday", Primitive::Date)
        .reference("family", "Family", ReferenceRole::Owner)
        .collection("parents", "Parent", ReferenceRole::Independent);
    Arc::new(builder.build().expect("family model is well-formed"))
}

/// In-memory reader carrying just the given header (plus one throwaway
/// row so the source is non-degenerate).
pub fn family_reader(header: &str) -> CsvSource {
    let cells = header.split(',').count();
    let dummy = vec!["x"; cells].join(",");
    CsvSource::from_reader(Cursor::new(format!("{header}\n{dummy}\n")))
        .expect("fixture header parses")
}

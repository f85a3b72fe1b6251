//! # graphload - CSV to object-graph migration
//!
//! graphload projects tabular CSV records onto a graph of typed domain
//! objects: each row is mapped through configurable attribute paths,
//! missing structural objects are synthesized, defaults and filters and
//! user shims are applied, references between the row's objects are
//! resolved, invalid objects are pruned, and one target instance is
//! emitted per row.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────┐    ┌────────────┐
//! │ CSV File │───▶│  Reader  │───▶│  Migrator │───▶│  Targets   │
//! │          │    │ (coerce) │    │ (mapping, │    │ (+ rejects,│
//! └──────────┘    └──────────┘    │  shims)   │    │  extract)  │
//!                                 └───────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use graphload::{Engine, FieldConfig};
//!
//! let engine = Engine::builder()
//!     .model(model)
//!     .input("parents.csv")?
//!     .target("Parent")
//!     .fields(FieldConfig::from_path("fields.yml")?)
//!     .build()?;
//! let report = engine.run(|parent, _row| println!("{parent:?}"))?;
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`value`] - Tagged cell values and coercion
//! - [`reader`] - Streaming CSV source and sinks
//! - [`filter`] - Declarative value filters
//! - [`metamodel`] - Runtime domain metamodel
//! - [`config`] - YAML configuration
//! - [`mapping`] - Mapping compiler
//! - [`shim`] - Transform and hook registry
//! - [`object`] - Per-row object arena
//! - [`migrator`] - Row migration phases
//! - [`engine`] - Driver, windowing, sinks
//! - [`join`] - Sort-merge CSV joiner

// Core modules
pub mod error;
pub mod value;

// Input and output
pub mod reader;

// Transformation
pub mod filter;
pub mod mapping;
pub mod migrator;

// Domain model
pub mod metamodel;
pub mod object;

// Configuration
pub mod config;

// Hooks
pub mod shim;

// Driver
pub mod engine;
pub mod progress;

// Joiner
pub mod join;

#[cfg(test)]
pub(crate) mod fixtures;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, CsvError, EngineError, FilterError, JoinError, MappingError, ModelError,
    RowError, ShimError,
};

// =============================================================================
// Re-exports - Values and reading
// =============================================================================

pub use reader::{Converter, CsvSink, CsvSource, ExtractSink, FieldKey, LineSink, Row};
pub use value::Value;

// =============================================================================
// Re-exports - Metamodel
// =============================================================================

pub use metamodel::{
    ClassBuilder, ClassId, Metamodel, MetamodelBuilder, Primitive, Property, PropertyId,
    PropertyTy, ReferenceRole,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{DefaultsConfig, EngineOptions, FieldConfig, FilterConfig};

// =============================================================================
// Re-exports - Filters and mapping
// =============================================================================

pub use filter::{Filter, FilterSpec, SpecKey};
pub use mapping::{ClassMapping, Mapping, Path};

// =============================================================================
// Re-exports - Objects and shims
// =============================================================================

pub use object::{Arena, Emitted, Instance, ObjId, Slot};
pub use shim::{
    AttrTransform, Extractor, Finalizer, PreferredOwner, RefTransform, ShimRegistry,
    Uniquifier, Validator,
};

// =============================================================================
// Re-exports - Engine
// =============================================================================

pub use engine::{Engine, EngineBuilder, Migration, MigrationReport};
pub use migrator::RowMigrator;

// =============================================================================
// Re-exports - Joiner
// =============================================================================

pub use join::{join_strings, CsvJoiner, JoinRecord, JoinTransform};

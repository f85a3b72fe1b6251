//! Error types for the graphload migration engine.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`CsvError`] - CSV reading and writing errors
//! - [`FilterError`] - filter compilation errors
//! - [`ConfigError`] - YAML configuration errors
//! - [`MappingError`] - mapping compilation errors
//! - [`ShimError`] - failures raised by registered transform hooks
//! - [`RowError`] - recoverable per-row migration errors
//! - [`JoinError`] - CSV join errors
//! - [`EngineError`] - top-level driver errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries. Configuration-time
//! errors ([`ConfigError`], [`MappingError`], [`FilterError`]) surface
//! from the engine builder; [`RowError`] is caught in the row loop and
//! routed to the rejects sink when one is configured.

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors while reading or writing CSV data.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to open or read a file.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Write to a sink failed.
    #[error("Failed to write record: {0}")]
    Write(#[from] std::io::Error),

    /// Input has no header row.
    #[error("CSV input is empty (no header row)")]
    EmptyInput,

    /// A data row could not be decoded.
    #[error("Line {line}: {message}")]
    BadRow { line: usize, message: String },

    /// A header name was looked up that the input does not carry.
    #[error("Unknown header '{0}'")]
    UnknownHeader(String),
}

// =============================================================================
// Filter Errors
// =============================================================================

/// Errors while compiling a value filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Regex key carries a flag other than `i`.
    #[error("Unsupported regex flag '{flag}' in filter key '{key}'")]
    UnsupportedFlag { key: String, flag: char },

    /// Regex key failed to compile.
    #[error("Invalid regex '{key}': {message}")]
    BadPattern { key: String, message: String },

    /// Neither a spec nor a pre-block was supplied.
    #[error("Filter needs a spec, a block, or both")]
    EmptySpec,
}

// =============================================================================
// Metamodel Errors
// =============================================================================

/// Errors while building a domain metamodel.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Two classes were declared with the same name.
    #[error("Duplicate class '{0}'")]
    DuplicateClass(String),

    /// A reference or superclass names a class that was never declared.
    #[error("Class '{class}' references unknown class '{name}'")]
    UnknownClass { class: String, name: String },

    /// Owner references form a cycle.
    #[error("Ownership cycle involving class '{0}'")]
    OwnershipCycle(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading YAML configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The YAML document did not parse.
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A config value has the wrong shape.
    #[error("Invalid config entry '{key}': {message}")]
    BadEntry { key: String, message: String },
}

// =============================================================================
// Mapping Errors
// =============================================================================

/// Errors while compiling the field mapping against the metamodel.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Leading path token does not name a known class.
    #[error("Unknown class '{0}' in attribute path")]
    UnknownClass(String),

    /// A path token does not name a property of the current class.
    #[error("Class '{class}' has no property '{name}'")]
    UnknownProperty { class: String, name: String },

    /// A collection property appeared inside an attribute path.
    #[error("Collection property '{class}.{name}' cannot appear in a path")]
    CollectionInPath { class: String, name: String },

    /// A path hop traverses a primitive-typed property.
    #[error("Property '{class}.{name}' is primitive and cannot be traversed")]
    PrimitiveHop { class: String, name: String },

    /// An intermediate or creatable class is abstract.
    #[error("Class '{0}' is abstract and cannot be instantiated")]
    AbstractClass(String),

    /// Header named by the mapping is absent from the input.
    #[error(transparent)]
    Csv(#[from] CsvError),

    /// A filter spec failed to compile.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Default literal does not fit the terminal property type.
    #[error("Default for '{path}' does not fit the property type: {message}")]
    BadDefault { path: String, message: String },

    /// The mapping names no creatable class at all.
    #[error("Field mapping produced no creatable classes")]
    Empty,
}

// =============================================================================
// Shim Errors
// =============================================================================

/// Failure raised by a registered transform, finalizer, or extractor.
#[derive(Debug, Error)]
#[error("{hook} on {class}: {message}")]
pub struct ShimError {
    /// Hook kind, e.g. `migrate_street1` or `migrate`.
    pub hook: String,
    /// Class the hook is bound to.
    pub class: String,
    pub message: String,
}

impl ShimError {
    pub fn new(
        hook: impl Into<String>,
        class: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            hook: hook.into(),
            class: class.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Per-row Errors
// =============================================================================

/// Recoverable errors raised while migrating a single row.
///
/// When a rejects sink is configured the driver appends the raw row and
/// continues; otherwise the error aborts the migration.
#[derive(Debug, Error)]
pub enum RowError {
    /// A registered hook failed.
    #[error(transparent)]
    Shim(#[from] ShimError),

    /// A value did not fit the property it was assigned to.
    #[error("Cannot assign {value} to '{class}.{property}'")]
    WriterRejected {
        class: String,
        property: String,
        value: String,
    },

    /// Path materialization hit an abstract declared type.
    #[error("Cannot synthesize abstract class '{0}' along a path")]
    AbstractIntermediate(String),

    /// More than one surviving instance of the target class.
    #[error("Row produced {count} instances of target '{class}'")]
    MultipleTargets { class: String, count: usize },
}

// =============================================================================
// Join Errors
// =============================================================================

/// Errors from the sort-merge CSV joiner.
#[derive(Debug, Error)]
pub enum JoinError {
    /// Reading either input failed.
    #[error(transparent)]
    Csv(#[from] CsvError),

    /// The two inputs share no columns.
    #[error("Source and target share no columns to join on")]
    NoCommonColumns,

    /// A requested source column does not exist.
    #[error("Source has no column '{0}'")]
    UnknownColumn(String),
}

// =============================================================================
// Engine Errors (top-level)
// =============================================================================

/// Top-level errors from the migration driver.
///
/// This is the main error type returned by [`crate::engine::Engine`].
/// It wraps all lower-level errors and adds driver-specific variants.
#[derive(Debug, Error)]
pub enum EngineError {
    /// CSV error on the input or a sink.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Configuration file error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Mapping compilation error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// A row failed and no rejects sink was configured.
    #[error("Record {record}: {source}")]
    Row {
        record: usize,
        #[source]
        source: RowError,
    },

    /// An extract file was configured but the target class has no
    /// registered extractor.
    #[error("Extract file configured but '{0}' registers no extractor")]
    MissingExtractor(String),

    /// Required builder option was not supplied.
    #[error("Missing required option: {0}")]
    MissingOption(&'static str),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for mapping compilation.
pub type MappingResult<T> = Result<T, MappingError>;

/// Result type for per-row migration.
pub type RowResult<T> = Result<T, RowError>;

/// Result type for join operations.
pub type JoinResult<T> = Result<T, JoinError>;

/// Result type for driver operations.
pub type EngineResult<T> = Result<T, EngineError>;

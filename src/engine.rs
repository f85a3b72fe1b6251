//! Migration driver.
//!
//! An [`Engine`] is a value built from configuration: input source,
//! metamodel, target class, field/defaults/filter configs, shims, and
//! options. Construction compiles the mapping, so configuration errors
//! surface before the first row. Iteration is lazy and single-threaded;
//! one row is processed to completion before the next begins, rejected
//! rows are routed to the rejects sink, and emitted targets optionally
//! append to the extract sink.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{DefaultsConfig, FieldConfig, FilterConfig, EngineOptions};
use crate::error::{EngineError, EngineResult};
use crate::mapping::Mapping;
use crate::metamodel::Metamodel;
use crate::migrator::RowMigrator;
use crate::object::Emitted;
use crate::progress::{log_success, log_warning, Progress};
use crate::reader::{CsvSink, CsvSource, ExtractSink, LineSink, Row};
use crate::shim::ShimRegistry;

/// Counts reported after a migration run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MigrationReport {
    /// Rows inside the record window.
    pub total: usize,
    /// Rows that emitted a target.
    pub migrated: usize,
    /// Rows rejected or failed.
    pub rejected: usize,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.rejected == 0
    }
}

/// Builder for [`Engine`]; all configuration errors surface in
/// [`EngineBuilder::build`].
#[derive(Default)]
pub struct EngineBuilder {
    model: Option<Arc<Metamodel>>,
    source: Option<CsvSource>,
    target: Option<String>,
    field_configs: Vec<FieldConfig>,
    defaults: Option<DefaultsConfig>,
    filters: Option<FilterConfig>,
    shims: Option<ShimRegistry>,
    options: EngineOptions,
    rejects_path: Option<PathBuf>,
    extract_path: Option<PathBuf>,
    extract_headers: Option<Vec<String>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: Arc<Metamodel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Open the input CSV file.
    pub fn input(mut self, path: impl Into<PathBuf>) -> EngineResult<Self> {
        self.source = Some(CsvSource::open(path.into())?);
        Ok(self)
    }

    /// Use an already-constructed source (stdin, in-memory).
    pub fn source(mut self, source: CsvSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Name of the target class.
    pub fn target(mut self, class: &str) -> Self {
        self.target = Some(class.to_string());
        self
    }

    /// Add a field-mapping config; multiple configs merge in order.
    pub fn fields(mut self, config: FieldConfig) -> Self {
        self.field_configs.push(config);
        self
    }

    pub fn defaults(mut self, config: DefaultsConfig) -> Self {
        self.defaults = Some(config);
        self
    }

    pub fn filters(mut self, config: FilterConfig) -> Self {
        self.filters = Some(config);
        self
    }

    pub fn shims(mut self, registry: ShimRegistry) -> Self {
        self.shims = Some(registry);
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Route failed rows to a rejects CSV instead of aborting.
    pub fn rejects_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.rejects_path = Some(path.into());
        self
    }

    /// Append one extract record per emitted target to this file.
    pub fn extract_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.extract_path = Some(path.into());
        self
    }

    /// Give the extract file a CSV header; without headers it is a
    /// plain line file.
    pub fn extract_headers(mut self, headers: Vec<String>) -> Self {
        self.extract_headers = Some(headers);
        self
    }

    pub fn build(self) -> EngineResult<Engine> {
        let model = self.model.ok_or(EngineError::MissingOption("metamodel"))?;
        let source = self.source.ok_or(EngineError::MissingOption("input"))?;
        let target_name = self
            .target
            .ok_or(EngineError::MissingOption("target class"))?;
        if self.field_configs.is_empty() {
            return Err(EngineError::MissingOption("field mapping"));
        }
        let target = model.lookup(&target_name).ok_or_else(|| {
            EngineError::Mapping(crate::error::MappingError::UnknownClass(target_name))
        })?;

        let mapping = Mapping::compile(
            &model,
            target,
            &self.field_configs,
            self.defaults.as_ref(),
            self.filters.as_ref(),
            &source,
        )?;

        let shims = self
            .shims
            .unwrap_or_else(|| ShimRegistry::new(model.clone()));
        if self.extract_path.is_some() && shims.extractor(target).is_none() {
            return Err(EngineError::MissingExtractor(
                model.class_name(target).to_string(),
            ));
        }

        Ok(Engine {
            model,
            source,
            mapping,
            shims,
            options: self.options,
            rejects_path: self.rejects_path,
            extract_path: self.extract_path,
            extract_headers: self.extract_headers,
        })
    }
}

/// A configured migration, ready to iterate.
pub struct Engine {
    model: Arc<Metamodel>,
    source: CsvSource,
    mapping: Mapping,
    shims: ShimRegistry,
    options: EngineOptions,
    rejects_path: Option<PathBuf>,
    extract_path: Option<PathBuf>,
    extract_headers: Option<Vec<String>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Start the migration and return its lazy iterator. The extract
    /// sink (when configured) is opened here, headers and all.
    pub fn iter(self) -> EngineResult<Migration> {
        let extract = match &self.extract_path {
            Some(path) => Some(match &self.extract_headers {
                Some(headers) => ExtractSink::Csv(CsvSink::create(path, headers)?),
                None => ExtractSink::Lines(LineSink::create(path)?),
            }),
            None => None,
        };
        let progress = Progress::new(self.options.progress);
        Ok(Migration {
            model: self.model,
            source: self.source,
            mapping: self.mapping,
            shims: self.shims,
            options: self.options,
            rejects_path: self.rejects_path,
            rejects: None,
            extract,
            progress,
            report: MigrationReport::default(),
            done: false,
        })
    }

    /// Run to completion, handing every emitted target (with its source
    /// row) to the visitor.
    pub fn run(
        self,
        mut visitor: impl FnMut(&Emitted, &Row),
    ) -> EngineResult<MigrationReport> {
        let mut migration = self.iter()?;
        while let Some(item) = migration.step() {
            let (emitted, row) = item?;
            visitor(&emitted, &row);
        }
        Ok(migration.report())
    }
}

/// Lazy migration iterator. Dropping it closes the sinks; the report is
/// readable at any point.
pub struct Migration {
    model: Arc<Metamodel>,
    source: CsvSource,
    mapping: Mapping,
    shims: ShimRegistry,
    options: EngineOptions,
    rejects_path: Option<PathBuf>,
    rejects: Option<CsvSink>,
    extract: Option<ExtractSink>,
    progress: Progress,
    report: MigrationReport,
    done: bool,
}

impl Migration {
    pub fn report(&self) -> MigrationReport {
        self.report
    }

    /// Advance to the next emitted target, applying the record window
    /// and the per-row failure policy.
    pub fn step(&mut self) -> Option<EngineResult<(Emitted, Row)>> {
        if self.done {
            return None;
        }
        loop {
            let row = match self.source.next() {
                None => {
                    self.finish();
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                Some(Ok(row)) => row,
            };

            if row.record < self.options.from {
                continue;
            }
            if let Some(to) = self.options.to {
                if row.record >= to {
                    self.finish();
                    return None;
                }
            }
            self.report.total += 1;

            let migrator = RowMigrator::new(
                self.model.clone(),
                &self.mapping,
                &self.shims,
                self.options.unique_keys,
            );
            match migrator.migrate(&row) {
                Ok(Some(emitted)) => {
                    self.report.migrated += 1;
                    if let Err(e) = self.run_extract(&emitted, row.record) {
                        self.done = true;
                        return Some(Err(e));
                    }
                    self.progress.tick();
                    return Some(Ok((emitted, row)));
                }
                Ok(None) => {
                    self.report.rejected += 1;
                    if let Err(e) = self.write_reject(&row) {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                Err(row_error) => {
                    self.report.rejected += 1;
                    if self.rejects_path.is_some() {
                        log_warning(format!(
                            "record {} rejected: {}",
                            row.record, row_error
                        ));
                        if let Err(e) = self.write_reject(&row) {
                            self.done = true;
                            return Some(Err(e));
                        }
                    } else {
                        self.done = true;
                        return Some(Err(EngineError::Row {
                            record: row.record,
                            source: row_error,
                        }));
                    }
                }
            }
        }
    }

    fn run_extract(&mut self, emitted: &Emitted, record: usize) -> EngineResult<()> {
        let Some(sink) = self.extract.as_mut() else {
            return Ok(());
        };
        // presence checked at build time
        let extractor = self
            .shims
            .extractor(self.mapping.target())
            .expect("extract sink implies a registered extractor");
        extractor(emitted.arena(), emitted.target(), sink).map_err(|e| EngineError::Row {
            record,
            source: e.into(),
        })
    }

    /// Append the raw row to the rejects sink, opening it (with the
    /// input's headers) on first use.
    fn write_reject(&mut self, row: &Row) -> EngineResult<()> {
        let Some(path) = &self.rejects_path else {
            return Ok(());
        };
        if self.rejects.is_none() {
            self.rejects = Some(CsvSink::create(path, self.source.field_names())?);
        }
        if let Some(sink) = self.rejects.as_mut() {
            sink.append(&row.raw)?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.progress.finish();
        if self.options.progress {
            log_success(format!(
                "migrated {} of {} records ({} rejected)",
                self.report.migrated, self.report.total, self.report.rejected
            ));
        }
    }
}

impl Iterator for Migration {
    type Item = EngineResult<Emitted>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().map(|item| item.map(|(emitted, _)| emitted))
    }
}

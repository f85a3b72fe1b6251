//! Streaming sort-merge outer join of two CSV files.
//!
//! Joins a source CSV against a target CSV on their shared columns
//! (taken in source-header order), assuming both inputs are sorted
//! ascending by those columns. One lookahead record per side keeps the
//! join in constant memory; duplicate keys on one side fan out against
//! the other side's matching record.
//!
//! Output header: common columns (source order), then source-only
//! columns (source order), then target-only columns (target order).
//! Absent key components sort before any present value.

use indexmap::IndexSet;
use std::io::Write;
use std::sync::Arc;

use crate::error::{CsvError, JoinError, JoinResult};
use crate::reader::{CsvSink, CsvSource};

/// One output record under construction, addressable by column name.
#[derive(Debug, Clone)]
pub struct JoinRecord {
    headers: Arc<Vec<String>>,
    cells: Vec<Option<String>>,
}

impl JoinRecord {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.cells[idx].as_deref()
    }

    pub fn set(&mut self, column: &str, value: Option<String>) {
        if let Some(idx) = self.headers.iter().position(|h| h == column) {
            self.cells[idx] = value;
        }
    }

    fn render(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|cell| cell.clone().unwrap_or_default())
            .collect()
    }
}

/// Per-record rewrite hook; returning `None` drops the record.
pub type JoinTransform = Box<dyn FnMut(JoinRecord) -> Option<JoinRecord>>;

/// Join key: the common-column values of one record; `None` components
/// sort before any present value, which `Option`'s ordering gives us.
type Key = Vec<Option<String>>;

/// One side of the merge: the current record and one record of
/// lookahead, with their keys.
struct Lookahead {
    rows: CsvSource,
    key_indices: Vec<usize>,
    width: usize,
    current: Option<(Key, Vec<String>)>,
    next: Option<(Key, Vec<String>)>,
}

impl Lookahead {
    fn new(rows: CsvSource, key_indices: Vec<usize>) -> JoinResult<Self> {
        let width = rows.field_names().len();
        let mut side = Self {
            rows,
            key_indices,
            width,
            current: None,
            next: None,
        };
        side.advance()?; // prime next
        side.advance()?; // shift into current
        Ok(side)
    }

    fn advance(&mut self) -> JoinResult<()> {
        self.current = self.next.take();
        self.next = match self.rows.next() {
            None => None,
            Some(Err(e)) => return Err(JoinError::Csv(e)),
            Some(Ok(row)) => {
                let mut raw = row.raw;
                raw.resize(self.width, String::new());
                let key = self
                    .key_indices
                    .iter()
                    .map(|&i| {
                        let cell = raw[i].trim();
                        (!cell.is_empty()).then(|| cell.to_string())
                    })
                    .collect();
                Some((key, raw))
            }
        };
        Ok(())
    }

    fn key(&self) -> Option<&Key> {
        self.current.as_ref().map(|(key, _)| key)
    }

    fn next_key(&self) -> Option<&Key> {
        self.next.as_ref().map(|(key, _)| key)
    }

    fn record(&self) -> &[String] {
        self.current
            .as_ref()
            .map(|(_, raw)| raw.as_slice())
            .expect("record read past end of side")
    }
}

/// Streaming sort-merge outer joiner.
pub struct CsvJoiner {
    source: CsvSource,
    target: CsvSource,
    columns: Option<Vec<String>>,
    transform: Option<JoinTransform>,
}

impl CsvJoiner {
    pub fn new(source: CsvSource, target: CsvSource) -> Self {
        Self {
            source,
            target,
            columns: None,
            transform: None,
        }
    }

    /// Restrict the source-side columns copied into the output (common
    /// columns are always kept).
    pub fn source_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Install a per-record transform.
    pub fn transform(mut self, transform: JoinTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Run the join, writing merged CSV records to `out`. Returns the
    /// number of records written.
    pub fn run(mut self, out: Box<dyn Write>) -> JoinResult<usize> {
        let source_names = self.source.field_names().to_vec();
        let target_names = self.target.field_names().to_vec();

        // Common columns in source-header order.
        let common: Vec<String> = source_names
            .iter()
            .filter(|name| target_names.contains(name))
            .cloned()
            .collect();
        if common.is_empty() {
            return Err(JoinError::NoCommonColumns);
        }

        let mut source_only: Vec<String> = source_names
            .iter()
            .filter(|name| !common.contains(name))
            .cloned()
            .collect();
        if let Some(wanted) = &self.columns {
            for name in wanted {
                if !source_names.contains(name) {
                    return Err(JoinError::UnknownColumn(name.clone()));
                }
            }
            source_only.retain(|name| wanted.contains(name));
        }
        let target_only: Vec<String> = target_names
            .iter()
            .filter(|name| !common.contains(name))
            .cloned()
            .collect();

        let position = |names: &[String], name: &String| {
            names
                .iter()
                .position(|n| n == name)
                .expect("column resolved against its own header")
        };
        let src_key_idx: Vec<usize> =
            common.iter().map(|c| position(&source_names, c)).collect();
        let tgt_key_idx: Vec<usize> =
            common.iter().map(|c| position(&target_names, c)).collect();
        let src_only_idx: Vec<usize> = source_only
            .iter()
            .map(|c| position(&source_names, c))
            .collect();
        let tgt_only_idx: Vec<usize> = target_only
            .iter()
            .map(|c| position(&target_names, c))
            .collect();

        let headers: Vec<String> = common
            .iter()
            .chain(source_only.iter())
            .chain(target_only.iter())
            .cloned()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        let headers = Arc::new(headers);
        let mut sink = CsvSink::from_writer(out, &headers).map_err(JoinError::Csv)?;

        let mut source = Lookahead::new(self.source, src_key_idx)?;
        let mut target = Lookahead::new(self.target, tgt_key_idx)?;
        let mut written = 0usize;

        loop {
            let ordering = match (source.key(), target.key()) {
                (None, None) => break,
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(s), Some(t)) => s.cmp(t),
            };

            let record = match ordering {
                std::cmp::Ordering::Less => {
                    let cells = merge_cells(
                        &headers,
                        Some((source.record(), &source.key_indices, &src_only_idx)),
                        None,
                        common.len(),
                        source_only.len(),
                        target_only.len(),
                    );
                    source.advance()?;
                    cells
                }
                std::cmp::Ordering::Greater => {
                    let cells = merge_cells(
                        &headers,
                        None,
                        Some((target.record(), &target.key_indices, &tgt_only_idx)),
                        common.len(),
                        source_only.len(),
                        target_only.len(),
                    );
                    target.advance()?;
                    cells
                }
                std::cmp::Ordering::Equal => {
                    let cells = merge_cells(
                        &headers,
                        Some((source.record(), &source.key_indices, &src_only_idx)),
                        Some((target.record(), &target.key_indices, &tgt_only_idx)),
                        common.len(),
                        source_only.len(),
                        target_only.len(),
                    );
                    // Duplicate tie-break: a side whose lookahead
                    // repeats its key holds the other side in place.
                    let source_repeats = source.next_key() == source.key();
                    let target_repeats = target.next_key() == target.key();
                    if source_repeats {
                        source.advance()?;
                    } else if target_repeats {
                        target.advance()?;
                    } else {
                        source.advance()?;
                        target.advance()?;
                    }
                    cells
                }
            };

            let record = match &mut self.transform {
                Some(transform) => match transform(record) {
                    Some(rewritten) => rewritten,
                    None => continue,
                },
                None => record,
            };
            sink.append(&record.render()).map_err(JoinError::Csv)?;
            written += 1;
        }

        Ok(written)
    }
}

/// Assemble one output record from whichever sides are present.
fn merge_cells(
    headers: &Arc<Vec<String>>,
    source: Option<(&[String], &Vec<usize>, &Vec<usize>)>,
    target: Option<(&[String], &Vec<usize>, &Vec<usize>)>,
    common_len: usize,
    source_only_len: usize,
    target_only_len: usize,
) -> JoinRecord {
    let mut cells: Vec<Option<String>> =
        vec![None; common_len + source_only_len + target_only_len];

    let keyed = source.or(target);
    if let Some((record, key_idx, _)) = keyed {
        for (slot, &idx) in key_idx.iter().enumerate() {
            let cell = record[idx].trim();
            cells[slot] = (!cell.is_empty()).then(|| cell.to_string());
        }
    }
    if let Some((record, _, only_idx)) = source {
        for (slot, &idx) in only_idx.iter().enumerate() {
            let cell = record[idx].trim();
            cells[common_len + slot] = (!cell.is_empty()).then(|| cell.to_string());
        }
    }
    if let Some((record, _, only_idx)) = target {
        for (slot, &idx) in only_idx.iter().enumerate() {
            let cell = record[idx].trim();
            cells[common_len + source_only_len + slot] =
                (!cell.is_empty()).then(|| cell.to_string());
        }
    }

    JoinRecord {
        headers: headers.clone(),
        cells,
    }
}

/// Convenience: join two CSV texts in memory (tests, small inputs).
pub fn join_strings(
    source: &str,
    target: &str,
    columns: Option<Vec<String>>,
) -> JoinResult<String> {
    use std::io::Cursor;
    use std::sync::{Arc as SyncArc, Mutex};

    #[derive(Clone)]
    struct Buf(SyncArc<Mutex<Vec<u8>>>);
    impl Write for Buf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let source = CsvSource::from_reader(Cursor::new(source.to_string()))
        .map_err(JoinError::Csv)?;
    let target = CsvSource::from_reader(Cursor::new(target.to_string()))
        .map_err(JoinError::Csv)?;
    let mut joiner = CsvJoiner::new(source, target);
    if let Some(columns) = columns {
        joiner = joiner.source_columns(columns);
    }

    let buf = Buf(SyncArc::new(Mutex::new(Vec::new())));
    joiner.run(Box::new(buf.clone()))?;
    let bytes = buf.0.lock().expect("buffer lock").clone();
    String::from_utf8(bytes).map_err(|e| {
        JoinError::Csv(CsvError::BadRow {
            line: 0,
            message: e.to_string(),
        })
    })
}

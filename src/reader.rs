//! CSV source and sinks with encoding auto-detection and value coercion.
//!
//! [`CsvSource`] streams one record at a time: the header row is read at
//! construction, every data row arrives as a [`Row`] keyed by normalized
//! field keys with coerced [`Value`]s. [`CsvSink`] mirrors the source for
//! writing (header first, flushed appends); [`LineSink`] appends plain
//! lines for header-less extract files.

use indexmap::IndexMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{CsvError, CsvResult};
use crate::value::Value;

/// Normalized column identifier derived from a header string.
pub type FieldKey = String;

/// How many bytes of the input feed encoding detection.
const ENCODING_SNIFF_BYTES: usize = 8192;

/// Per-line decoding mode, resolved once from a chardet sniff of the
/// input's first bytes. Rows are decoded lazily as they stream, so the
/// charset is collapsed to a decode strategy up front instead of being
/// re-interpreted per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEncoding {
    Utf8,
    Latin1,
    Windows1252,
}

impl LineEncoding {
    fn sniff(prefix: &[u8]) -> Self {
        let (charset, _confidence, _) = chardet::detect(prefix);
        match charset.to_lowercase().as_str() {
            "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => Self::Latin1,
            "windows-1252" | "cp1252" => Self::Windows1252,
            // ascii, utf-8, and anything exotic decode lossily as UTF-8
            _ => Self::Utf8,
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Latin1 => encoding_rs::ISO_8859_15.decode(bytes).0.to_string(),
            Self::Windows1252 => encoding_rs::WINDOWS_1252.decode(bytes).0.to_string(),
            Self::Utf8 => String::from_utf8_lossy(bytes).to_string(),
        }
    }
}

/// Lowercase a header and collapse non-alphanumeric runs to a single
/// underscore: `"Code ISWC"` becomes `code_iswc`.
pub fn normalize_header(header: &str) -> FieldKey {
    let mut key = String::with_capacity(header.len());
    let mut last_was_sep = false;
    for ch in header.trim().chars() {
        if ch.is_alphanumeric() {
            key.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !key.is_empty() {
            key.push('_');
            last_was_sep = true;
        }
    }
    if key.ends_with('_') {
        key.pop();
    }
    key
}

/// One input record: raw field strings plus coerced values keyed by
/// field key, in header order.
#[derive(Debug, Clone)]
pub struct Row {
    /// 1-based data record number (the header row does not count).
    pub record: usize,
    /// Original field strings, padded to the header width.
    pub raw: Vec<String>,
    /// Coerced values in header order.
    pub fields: IndexMap<FieldKey, Value>,
}

impl Row {
    /// Value for a field key; absent when the key is unknown.
    pub fn get(&self, key: &str) -> &Value {
        self.fields.get(key).unwrap_or(&Value::Absent)
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(Value::is_absent)
    }
}

/// Optional reader-level coercion hook; a `Some` result wins over the
/// built-in ladder.
pub type Converter = Box<dyn Fn(&str) -> Option<Value>>;

/// Streaming CSV reader.
pub struct CsvSource {
    input: Box<dyn BufRead>,
    encoding: LineEncoding,
    delimiter: char,
    field_names: Vec<String>,
    accessors: Vec<FieldKey>,
    converter: Option<Converter>,
    next_record: usize,
    line: usize,
    done: bool,
}

impl CsvSource {
    /// Open a CSV file, sniffing its encoding from a bounded prefix and
    /// reading the header row.
    pub fn open(path: impl AsRef<Path>) -> CsvResult<Self> {
        let path = path.as_ref();
        let io_err = |source| CsvError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut file = File::open(path).map_err(io_err)?;
        let mut prefix = vec![0u8; ENCODING_SNIFF_BYTES];
        let n = file.read(&mut prefix).map_err(io_err)?;
        prefix.truncate(n);
        let encoding = LineEncoding::sniff(&prefix);
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;

        Self::build(Box::new(BufReader::new(file)), encoding, ',')
    }

    /// Read from an in-memory or already-open source; assumes UTF-8.
    pub fn from_reader(reader: impl BufRead + 'static) -> CsvResult<Self> {
        Self::build(Box::new(reader), LineEncoding::Utf8, ',')
    }

    /// Replace the delimiter before any rows are read.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Install a user converter that runs before built-in coercion.
    pub fn set_converter(&mut self, converter: Converter) {
        self.converter = Some(converter);
    }

    fn build(
        mut input: Box<dyn BufRead>,
        encoding: LineEncoding,
        delimiter: char,
    ) -> CsvResult<Self> {
        let header_line = match read_line(&mut input, encoding).map_err(|e| CsvError::BadRow {
            line: 1,
            message: e.to_string(),
        })? {
            Some(line) => line,
            None => return Err(CsvError::EmptyInput),
        };

        let field_names: Vec<String> = header_line
            .split(delimiter)
            .map(|s| s.trim().trim_matches('"').to_string())
            .collect();
        if field_names.iter().all(|h| h.is_empty()) {
            return Err(CsvError::EmptyInput);
        }
        let accessors: Vec<FieldKey> = field_names.iter().map(|h| normalize_header(h)).collect();

        Ok(Self {
            input,
            encoding,
            delimiter,
            field_names,
            accessors,
            converter: None,
            next_record: 1,
            line: 1,
            done: false,
        })
    }

    /// Original header strings, in order.
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Normalized field keys, in header order.
    pub fn accessors(&self) -> &[FieldKey] {
        &self.accessors
    }

    /// Resolve a header string (or an already-normalized key) to its
    /// field key.
    pub fn accessor(&self, header: &str) -> CsvResult<&FieldKey> {
        if let Some(pos) = self.field_names.iter().position(|h| h == header) {
            return Ok(&self.accessors[pos]);
        }
        // Accept pre-normalized keys too
        self.accessors
            .iter()
            .find(|key| key.as_str() == header)
            .ok_or_else(|| CsvError::UnknownHeader(header.to_string()))
    }

    fn coerce(&self, raw: &str) -> Value {
        if let Some(converter) = &self.converter {
            if let Some(value) = converter(raw) {
                return value;
            }
        }
        Value::coerce(raw)
    }

    fn next_row(&mut self) -> Option<CsvResult<Row>> {
        if self.done {
            return None;
        }
        loop {
            self.line += 1;
            let line = match read_line(&mut self.input, self.encoding) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(CsvError::BadRow {
                        line: self.line,
                        message: source.to_string(),
                    }));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let cells: Vec<&str> = line.split(self.delimiter).collect();
            let mut raw = Vec::with_capacity(self.field_names.len());
            let mut fields = IndexMap::with_capacity(self.field_names.len());
            for (i, key) in self.accessors.iter().enumerate() {
                let cell = cells.get(i).map(|s| s.trim().trim_matches('"')).unwrap_or("");
                raw.push(cell.to_string());
                fields.insert(key.clone(), self.coerce(cell));
            }

            let record = self.next_record;
            self.next_record += 1;
            return Some(Ok(Row {
                record,
                raw,
                fields,
            }));
        }
    }
}

impl Iterator for CsvSource {
    type Item = CsvResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}

/// Read one line as raw bytes and decode it; `None` at end of input.
fn read_line(
    input: &mut Box<dyn BufRead>,
    encoding: LineEncoding,
) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = input.read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    Ok(Some(encoding.decode(&buf)))
}

// =============================================================================
// Sinks
// =============================================================================

/// Header-bearing CSV writer; every append is flushed so partial output
/// survives an aborted migration.
pub struct CsvSink {
    out: Box<dyn Write>,
    headers: Vec<String>,
    delimiter: char,
}

impl CsvSink {
    /// Create (truncate) a CSV file and write the header row.
    pub fn create(path: impl AsRef<Path>, headers: &[String]) -> CsvResult<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| CsvError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_writer(Box::new(file), headers)
    }

    /// Write to an arbitrary sink (tests, stdout).
    pub fn from_writer(out: Box<dyn Write>, headers: &[String]) -> CsvResult<Self> {
        let mut sink = Self {
            out,
            headers: headers.to_vec(),
            delimiter: ',',
        };
        let header_row = sink.headers.clone();
        sink.append(&header_row)?;
        Ok(sink)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Append one record and flush.
    pub fn append(&mut self, fields: &[String]) -> CsvResult<()> {
        let mut line = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                line.push(self.delimiter);
            }
            line.push_str(&quote_field(field, self.delimiter));
        }
        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    /// Append coerced values, rendered to their canonical strings.
    pub fn append_values(&mut self, values: &[Value]) -> CsvResult<()> {
        let fields: Vec<String> = values.iter().map(Value::render).collect();
        self.append(&fields)
    }
}

/// Quote a field when it carries the delimiter, a quote, or a newline.
fn quote_field(field: &str, delimiter: char) -> String {
    if field.contains(delimiter) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Side-output sink handed to extract hooks: a plain line file, or a
/// header-bearing CSV when extract headers were configured.
pub enum ExtractSink {
    Lines(LineSink),
    Csv(CsvSink),
}

impl ExtractSink {
    /// Append one extract record; rendered comma-joined in line mode.
    pub fn append_record(&mut self, values: &[Value]) -> CsvResult<()> {
        match self {
            ExtractSink::Csv(sink) => sink.append_values(values),
            ExtractSink::Lines(sink) => {
                let line = values
                    .iter()
                    .map(Value::render)
                    .collect::<Vec<_>>()
                    .join(",");
                sink.append_line(&line)
            }
        }
    }
}

/// Plain line-appending sink for header-less extract files.
pub struct LineSink {
    out: Box<dyn Write>,
}

impl LineSink {
    pub fn create(path: impl AsRef<Path>) -> CsvResult<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| CsvError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            out: Box::new(file),
        })
    }

    pub fn from_writer(out: Box<dyn Write>) -> Self {
        Self { out }
    }

    /// Append one line and flush.
    pub fn append_line(&mut self, line: &str) -> CsvResult<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

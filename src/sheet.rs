use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::assemble::{RecordAssembler, TypeMap};
use crate::domain::Record;
use crate::error::SheetError;

/// Marker searched for in the first cell of the sidecar type row.
pub const TYPE_ROW_TOKEN: &str = "Type";

/// Leading row index/title columns. They drive the skip-row convention and
/// never become record fields.
pub const INDEX_COLUMNS: usize = 1;

/// Tab for `.tsv`/`.txt` files, comma otherwise.
pub fn delimiter_for(path: &Utf8Path) -> u8 {
    match path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("tsv") | Some("txt") | Some("tab") => b'\t',
        _ => b',',
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    /// 1-based row number within the sheet, header row included.
    pub number: usize,
    pub cells: Vec<String>,
}

impl SheetRow {
    /// Comment, placeholder and blank rows: first cell empty or starting with `#`.
    pub fn is_skipped(&self) -> bool {
        match self.cells.first() {
            Some(first) => {
                let first = first.trim();
                first.is_empty() || first.starts_with('#')
            }
            None => true,
        }
    }
}

#[derive(Debug)]
pub struct RowOutcome {
    pub row: usize,
    pub result: Result<Record, SheetError>,
}

/// One worksheet exported as CSV/TSV: header row, optional sidecar type row,
/// then data rows.
#[derive(Debug, Clone)]
pub struct Sheet {
    name: String,
    headers: Vec<String>,
    type_labels: Option<Vec<String>>,
    rows: Vec<SheetRow>,
}

impl Sheet {
    pub fn read_path(path: &Utf8Path, delimiter: Option<u8>) -> Result<Self, SheetError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| SheetError::Filesystem(format!("open {path}: {err}")))?;
        let delimiter = delimiter.unwrap_or_else(|| delimiter_for(path));
        let name = path.file_stem().unwrap_or(path.as_str()).to_string();
        Self::from_reader(file, delimiter, &name)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8, name: &str) -> Result<Self, SheetError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut headers = None;
        let mut type_labels = None;
        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let cells: Vec<String> = record?.iter().map(str::to_string).collect();
            let number = index + 1;
            if headers.is_none() {
                headers = Some(cells);
                continue;
            }
            if number == 2
                && cells
                    .first()
                    .map(|cell| cell.contains(TYPE_ROW_TOKEN))
                    .unwrap_or(false)
            {
                type_labels = Some(cells);
                continue;
            }
            rows.push(SheetRow { number, cells });
        }

        let headers = headers.ok_or_else(|| SheetError::EmptySheet(name.to_string()))?;
        debug!(
            sheet = name,
            columns = headers.len(),
            rows = rows.len(),
            type_row = type_labels.is_some(),
            "read sheet"
        );
        Ok(Self {
            name: name.to_string(),
            headers,
            type_labels,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn has_type_row(&self) -> bool {
        self.type_labels.is_some()
    }

    pub fn type_map(&self) -> TypeMap {
        match &self.type_labels {
            Some(labels) => TypeMap::from_rows(field_cells(&self.headers), field_cells(labels)),
            None => TypeMap::new(),
        }
    }

    pub fn assembler(&self) -> RecordAssembler {
        RecordAssembler::new(self.type_map())
    }

    /// Rows that should become records, in file order.
    pub fn data_rows(&self) -> impl Iterator<Item = &SheetRow> {
        self.rows.iter().filter(|row| {
            let skipped = row.is_skipped();
            if skipped {
                debug!(sheet = %self.name, row = row.number, "skipping comment row");
            }
            !skipped
        })
    }

    /// Pairs each data row with the header row and assembles it. The index
    /// column is never part of a record. Every row is attempted; a failing
    /// row is reported without touching the others.
    pub fn records(&self, assembler: &RecordAssembler) -> Vec<RowOutcome> {
        self.data_rows()
            .map(|row| {
                let pairs: Vec<(&str, &str)> = field_cells(&self.headers)
                    .iter()
                    .map(String::as_str)
                    .zip(field_cells(&row.cells).iter().map(String::as_str))
                    .collect();
                let result = assembler.assemble(&pairs);
                if let Err(err) = &result {
                    warn!(sheet = %self.name, row = row.number, error = %err, "row failed");
                }
                RowOutcome {
                    row: row.number,
                    result,
                }
            })
            .collect()
    }
}

/// Cells after the row index column.
fn field_cells(cells: &[String]) -> &[String] {
    cells.get(INDEX_COLUMNS..).unwrap_or_default()
}

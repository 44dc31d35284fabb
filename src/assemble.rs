use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::coerce::coerce;
use crate::domain::{ColumnHeader, DeclaredType, Record};
use crate::error::SheetError;
use crate::header::{ParsedColumn, parse_header};

/// Highest `-N` suffix accepted on an embedded member column.
pub const MAX_REPETITION_INDEX: usize = 999;

/// Column types taken from the sidecar type row, keyed by field path
/// (`base` for plain columns, `base.sub` for embedded members).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMap {
    types: HashMap<String, DeclaredType>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs header cells with type-row labels column by column. Placeholder
    /// columns and blank labels are ignored.
    pub fn from_rows<H, L>(headers: &[H], labels: &[L]) -> Self
    where
        H: AsRef<str>,
        L: AsRef<str>,
    {
        let mut map = Self::new();
        for (header, label) in headers.iter().zip(labels) {
            let label = label.as_ref().trim();
            if label.is_empty() {
                continue;
            }
            if let ParsedColumn::Field(column) = parse_header(header.as_ref()) {
                map.insert(column.field_path(), DeclaredType::from_type_label(label));
            }
        }
        map
    }

    pub fn insert(&mut self, field_path: impl Into<String>, declared: DeclaredType) {
        self.types.insert(field_path.into(), declared);
    }

    pub fn get(&self, column: &ColumnHeader) -> Option<DeclaredType> {
        self.types
            .get(&column.field_path())
            .or_else(|| self.types.get(&column.base_field))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Builds one nested record per sheet row. Holds only the static type map, so
/// assembling the same row twice gives equal records.
#[derive(Debug, Clone, Default)]
pub struct RecordAssembler {
    type_map: TypeMap,
}

impl RecordAssembler {
    pub fn new(type_map: TypeMap) -> Self {
        Self { type_map }
    }

    pub fn assemble<H, V>(&self, row: &[(H, V)]) -> Result<Record, SheetError>
    where
        H: AsRef<str>,
        V: AsRef<str>,
    {
        let mut record = Record::new();
        for (raw_header, raw_value) in row {
            let raw_header = raw_header.as_ref();
            let raw_value = raw_value.as_ref();
            if raw_value.trim().is_empty() {
                continue;
            }
            let ParsedColumn::Field(column) = parse_header(raw_header) else {
                debug!(header = raw_header, "skipping placeholder column");
                continue;
            };

            if column.repetition_index > MAX_REPETITION_INDEX {
                return Err(SheetError::RepetitionIndex {
                    column: raw_header.trim().to_string(),
                    index: column.repetition_index,
                    max: MAX_REPETITION_INDEX,
                });
            }

            let declared = self.resolve_type(&column);
            let value = coerce(raw_header.trim(), raw_value, declared)?;

            match &column.sub_field {
                None => {
                    record.insert(column.base_field.clone(), value);
                }
                Some(sub_field) => {
                    if !matches!(record.get(&column.base_field), Some(Value::Array(_))) {
                        record.insert(column.base_field.clone(), Value::Array(Vec::new()));
                    }
                    let Some(Value::Array(members)) = record.get_mut(&column.base_field) else {
                        continue;
                    };
                    while members.len() <= column.repetition_index {
                        members.push(Value::Object(Map::new()));
                    }
                    if let Value::Object(member) = &mut members[column.repetition_index] {
                        member.insert(sub_field.clone(), value);
                    }
                }
            }
        }
        Ok(record)
    }

    /// Header tag first, then the type row, then string. Embedded members
    /// only keep array unpacking; any other type reads as a string.
    fn resolve_type(&self, column: &ColumnHeader) -> DeclaredType {
        let declared = column
            .declared_type
            .or_else(|| self.type_map.get(column))
            .unwrap_or(DeclaredType::String);
        if column.is_embedded() && declared != DeclaredType::Array {
            return DeclaredType::String;
        }
        declared
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_cells_never_become_keys() {
        let assembler = RecordAssembler::default();
        let record = assembler
            .assemble(&row(&[
                ("award", "/awards/OD008540-01/"),
                ("file_format", "fastq"),
                ("paired_end", ""),
                ("filesets", ""),
            ]))
            .unwrap();
        assert_eq!(
            Value::Object(record),
            json!({"award": "/awards/OD008540-01/", "file_format": "fastq"})
        );
    }

    #[test]
    fn single_embedded_group() {
        let assembler = RecordAssembler::default();
        let record = assembler
            .assemble(&row(&[
                ("related_files.file", "testfile.fastq"),
                ("related_files.relationship_type", "related_to"),
            ]))
            .unwrap();
        assert_eq!(
            record["related_files"],
            json!([{"file": "testfile.fastq", "relationship_type": "related_to"}])
        );
    }

    #[test]
    fn repeated_embedded_groups_follow_index() {
        let assembler = RecordAssembler::default();
        let record = assembler
            .assemble(&row(&[
                ("experiment_relation.experiment", "test:exp002"),
                ("experiment_relation.relationship_type", "controlled by"),
                ("experiment_relation.experiment-1", "test:exp003"),
                ("experiment_relation.relationship_type-1", "source for"),
                ("experiment_relation.experiment-2", "test:exp004"),
                ("experiment_relation.relationship_type-2", "source for"),
            ]))
            .unwrap();
        assert_eq!(
            record["experiment_relation"],
            json!([
                {"experiment": "test:exp002", "relationship_type": "controlled by"},
                {"experiment": "test:exp003", "relationship_type": "source for"},
                {"experiment": "test:exp004", "relationship_type": "source for"}
            ])
        );
    }

    #[test]
    fn gaps_are_filled_with_empty_members() {
        let assembler = RecordAssembler::default();
        let record = assembler
            .assemble(&row(&[("files.file-2", "c.fastq"), ("files.file", "a.fastq")]))
            .unwrap();
        assert_eq!(
            record["files"],
            json!([{"file": "a.fastq"}, {}, {"file": "c.fastq"}])
        );
    }

    #[test]
    fn repetition_index_is_capped() {
        let assembler = RecordAssembler::default();
        let record = assembler
            .assemble(&row(&[("files.file-999", "last.fastq")]))
            .unwrap();
        assert_eq!(record["files"].as_array().map(Vec::len), Some(1000));

        let err = assembler
            .assemble(&row(&[("title", "t"), ("files.file-2000000", "x")]))
            .unwrap_err();
        assert_matches!(
            err,
            SheetError::RepetitionIndex { ref column, index: 2000000, max: MAX_REPETITION_INDEX }
                if column == "files.file-2000000"
        );

        let err = assembler
            .assemble(&row(&[("files.file-18446744073709551615", "x")]))
            .unwrap_err();
        assert_matches!(err, SheetError::RepetitionIndex { index: usize::MAX, .. });
    }

    #[test]
    fn header_tag_beats_type_map() {
        let mut types = TypeMap::new();
        types.insert("read_length", DeclaredType::String);
        types.insert("aliases", DeclaredType::Array);
        let assembler = RecordAssembler::new(types);
        let record = assembler
            .assemble(&row(&[
                ("read_length:int", "150"),
                ("aliases", "[lab:a, lab:b]"),
            ]))
            .unwrap();
        assert_eq!(record["read_length"], json!(150));
        assert_eq!(record["aliases"], json!(["lab:a", "lab:b"]));
    }

    #[test]
    fn embedded_members_stay_strings_unless_arrays() {
        let mut types = TypeMap::new();
        types.insert("files.size", DeclaredType::Integer);
        types.insert("files.tags", DeclaredType::Array);
        let assembler = RecordAssembler::new(types);
        let record = assembler
            .assemble(&row(&[("files.size", "42"), ("files.tags", "a,b")]))
            .unwrap();
        assert_eq!(record["files"], json!([{"size": "42", "tags": ["a", "b"]}]));
    }

    #[test]
    fn placeholder_columns_are_excluded() {
        let assembler = RecordAssembler::default();
        let record = assembler
            .assemble(&row(&[("#Field Name:", "row 1"), ("", "x"), ("title", "t")]))
            .unwrap();
        assert_eq!(Value::Object(record), json!({"title": "t"}));
    }

    #[test]
    fn duplicate_plain_column_last_write_wins() {
        let assembler = RecordAssembler::default();
        let record = assembler
            .assemble(&row(&[("title", "first"), ("title", "second")]))
            .unwrap();
        assert_eq!(record["title"], json!("second"));
    }

    #[test]
    fn bad_cell_aborts_row_with_column() {
        let assembler = RecordAssembler::default();
        let err = assembler
            .assemble(&row(&[("title", "t"), ("read_length:integer", "long")]))
            .unwrap_err();
        assert_matches!(
            err,
            SheetError::Format { ref column, ref value, expected: DeclaredType::Integer }
                if column == "read_length:integer" && value == "long"
        );
    }

    #[test]
    fn assembling_twice_is_idempotent() {
        let assembler = RecordAssembler::default();
        let input = row(&[
            ("title", "t"),
            ("related_files.file-1", "b.fastq"),
            ("aliases:list", "a, b"),
        ]);
        let first = assembler.assemble(&input).unwrap();
        let second = assembler.assemble(&input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn type_map_from_sidecar_row() {
        let headers = ["#Field Name:", "*title", "aliases", "files.file", "read_length"];
        let labels = [
            "#Field Type:",
            "string",
            "array of strings",
            "array of embedded objects, string",
            "integer",
        ];
        let types = TypeMap::from_rows(&headers, &labels);
        let aliases = match parse_header("aliases") {
            ParsedColumn::Field(column) => column,
            ParsedColumn::Skip => unreachable!(),
        };
        assert_eq!(types.get(&aliases), Some(DeclaredType::Array));
        let read_length = match parse_header("read_length") {
            ParsedColumn::Field(column) => column,
            ParsedColumn::Skip => unreachable!(),
        };
        assert_eq!(types.get(&read_length), Some(DeclaredType::Integer));
    }
}

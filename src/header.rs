use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{ColumnHeader, DeclaredType};

pub const REQUIRED_MARKER: char = '*';

static TYPE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<rest>.+):(?P<tag>[A-Za-z]+)$").unwrap());
static INDEX_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.+)-(?P<index>\d+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedColumn {
    /// Blank, comment or placeholder column; never contributes to a record.
    Skip,
    Field(ColumnHeader),
}

/// Decodes `[*]base[.sub][-N][:type]`.
pub fn parse_header(raw: &str) -> ParsedColumn {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return ParsedColumn::Skip;
    }

    let (required, rest) = match trimmed.strip_prefix(REQUIRED_MARKER) {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };

    let (rest, declared_type) = match TYPE_SUFFIX.captures(rest) {
        Some(caps) => (
            caps.name("rest").map(|m| m.as_str()).unwrap_or_default(),
            caps.name("tag").map(|m| DeclaredType::from_tag(m.as_str())),
        ),
        None => (rest, None),
    };
    if rest.is_empty() {
        return ParsedColumn::Skip;
    }

    let Some((base, sub)) = rest.split_once('.') else {
        return ParsedColumn::Field(ColumnHeader {
            base_field: rest.to_string(),
            sub_field: None,
            repetition_index: 0,
            declared_type,
            required,
        });
    };

    let (base, base_index) = split_index(base);
    let (sub, sub_index) = split_index(sub);
    if base.is_empty() || sub.is_empty() {
        return ParsedColumn::Skip;
    }

    ParsedColumn::Field(ColumnHeader {
        base_field: base.to_string(),
        sub_field: Some(sub.to_string()),
        repetition_index: sub_index.or(base_index).unwrap_or(0),
        declared_type,
        required,
    })
}

fn split_index(segment: &str) -> (&str, Option<usize>) {
    let Some(caps) = INDEX_SUFFIX.captures(segment) else {
        return (segment, None);
    };
    let index = caps
        .name("index")
        .and_then(|m| m.as_str().parse::<usize>().ok());
    match (caps.name("name"), index) {
        (Some(name), Some(index)) => (name.as_str(), Some(index)),
        _ => (segment, None),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn field(raw: &str) -> ColumnHeader {
        match parse_header(raw) {
            ParsedColumn::Field(header) => header,
            ParsedColumn::Skip => panic!("{raw} was skipped"),
        }
    }

    #[test]
    fn plain_and_required_headers() {
        for raw in ["title", "*title", " *title "] {
            let header = field(raw);
            assert_eq!(header.base_field, "title");
            assert_eq!(header.sub_field, None);
            assert_eq!(header.repetition_index, 0);
        }
        assert!(field("*title").required);
        assert!(!field("title").required);
    }

    #[test]
    fn non_embedded_header_keeps_literal_name() {
        let header = field("paired_end-1");
        assert_eq!(header.base_field, "paired_end-1");
        assert_eq!(header.repetition_index, 0);
    }

    #[test]
    fn embedded_header_with_index() {
        let header = field("experiment_relation.relationship_type-1");
        assert_eq!(header.base_field, "experiment_relation");
        assert_eq!(header.sub_field.as_deref(), Some("relationship_type"));
        assert_eq!(header.repetition_index, 1);

        let header = field("experiment_relation-2.experiment");
        assert_eq!(header.base_field, "experiment_relation");
        assert_eq!(header.sub_field.as_deref(), Some("experiment"));
        assert_eq!(header.repetition_index, 2);

        let header = field("related_files.file");
        assert_eq!(header.repetition_index, 0);
    }

    #[test]
    fn type_suffix() {
        let header = field("aliases:array");
        assert_eq!(header.base_field, "aliases");
        assert_eq!(header.declared_type, Some(DeclaredType::Array));

        let header = field("*read_length:int");
        assert!(header.required);
        assert_eq!(header.declared_type, Some(DeclaredType::Integer));

        let header = field("files.size-3:num");
        assert_eq!(header.sub_field.as_deref(), Some("size"));
        assert_eq!(header.repetition_index, 3);
        assert_eq!(header.declared_type, Some(DeclaredType::Number));
    }

    #[test]
    fn placeholder_columns_are_skipped() {
        for raw in ["", "   ", "#Field Name:", "*", ".sub", "base."] {
            assert_matches!(parse_header(raw), ParsedColumn::Skip, "{raw:?}");
        }
    }
}

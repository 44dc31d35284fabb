use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One submittable object as assembled from a sheet row.
pub type Record = Map<String, Value>;

/// Type a column's cells are coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    String,
    Integer,
    Number,
    Array,
}

impl DeclaredType {
    /// Short tags as written after `:` in a header. Unknown tags read as strings.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => DeclaredType::Integer,
            "num" | "number" => DeclaredType::Number,
            "list" | "array" => DeclaredType::Array,
            _ => DeclaredType::String,
        }
    }

    /// Human readable labels from the sidecar type row, e.g. `array of strings`
    /// or `array of embedded objects, integer`. For embedded groups the label
    /// after the last comma describes the member.
    pub fn from_type_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase();
        let leaf = if normalized.contains("embedded") {
            normalized
                .rsplit(',')
                .next()
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        } else {
            normalized
        };
        if leaf.starts_with("array") || leaf.starts_with("list") {
            return DeclaredType::Array;
        }
        Self::from_tag(&leaf)
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::String => write!(f, "string"),
            DeclaredType::Integer => write!(f, "integer"),
            DeclaredType::Number => write!(f, "number"),
            DeclaredType::Array => write!(f, "array"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Array,
    EmbeddedObject,
}

impl FieldKind {
    /// Maps a JSON schema `type` keyword onto a sheet field kind. Types without
    /// a dedicated coercion (boolean, null, ...) are carried as strings.
    pub fn from_schema_type(value: &str) -> Self {
        match value {
            "integer" => FieldKind::Integer,
            "number" => FieldKind::Number,
            "array" => FieldKind::Array,
            "object" => FieldKind::EmbeddedObject,
            _ => FieldKind::String,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Array => "array of strings",
            FieldKind::EmbeddedObject => "embedded object",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Parsed form of one spreadsheet column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
    pub base_field: String,
    pub sub_field: Option<String>,
    pub repetition_index: usize,
    pub declared_type: Option<DeclaredType>,
    pub required: bool,
}

impl ColumnHeader {
    pub fn is_embedded(&self) -> bool {
        self.sub_field.is_some()
    }

    /// `base` or `base.sub`, without marker, index or type tag.
    pub fn field_path(&self) -> String {
        match &self.sub_field {
            Some(sub) => format!("{}.{}", self.base_field, sub),
            None => self.base_field.clone(),
        }
    }

    pub fn to_header_string(&self) -> String {
        let mut header = String::new();
        if self.required {
            header.push('*');
        }
        header.push_str(&self.base_field);
        if let Some(sub) = &self.sub_field {
            header.push('.');
            header.push_str(sub);
            if self.repetition_index > 0 {
                header.push_str(&format!("-{}", self.repetition_index));
            }
        }
        if let Some(declared) = self.declared_type {
            header.push_str(&format!(":{declared}"));
        }
        header
    }
}

/// One field of a submittable type, as enumerated from its schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Own type of an embedded group member.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_kind: Option<FieldKind>,
    /// Embedded group declared as an array of objects.
    pub repeated: bool,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldDescriptor>,
}

impl FieldDescriptor {
    pub fn leaf(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value_kind: None,
            repeated: false,
            required: false,
            description: None,
            comment: None,
            choices: Vec::new(),
            order: None,
            children: Vec::new(),
        }
    }

    /// Column name as written in a template header row.
    pub fn header_name(&self) -> String {
        if self.required {
            format!("*{}", self.name)
        } else {
            self.name.clone()
        }
    }

    /// Label written to the sidecar type row.
    pub fn type_label(&self) -> String {
        match (self.kind, self.value_kind) {
            (FieldKind::EmbeddedObject, Some(member)) => {
                let group = if self.repeated {
                    "array of embedded objects"
                } else {
                    "embedded object"
                };
                format!("{group}, {}", member.label())
            }
            (kind, _) => kind.label().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_map_to_declared_types() {
        assert_eq!(DeclaredType::from_tag("int"), DeclaredType::Integer);
        assert_eq!(DeclaredType::from_tag("Integer"), DeclaredType::Integer);
        assert_eq!(DeclaredType::from_tag("num"), DeclaredType::Number);
        assert_eq!(DeclaredType::from_tag("list"), DeclaredType::Array);
        assert_eq!(DeclaredType::from_tag("boolean"), DeclaredType::String);
        assert_eq!(DeclaredType::from_tag(""), DeclaredType::String);
    }

    #[test]
    fn type_labels_from_sidecar_row() {
        assert_eq!(
            DeclaredType::from_type_label("array of strings"),
            DeclaredType::Array
        );
        assert_eq!(
            DeclaredType::from_type_label("array of embedded objects, string"),
            DeclaredType::String
        );
        assert_eq!(
            DeclaredType::from_type_label("array of embedded objects, array of strings"),
            DeclaredType::Array
        );
        assert_eq!(
            DeclaredType::from_type_label("integer"),
            DeclaredType::Integer
        );
    }

    #[test]
    fn header_string_round_trips_fields() {
        let header = ColumnHeader {
            base_field: "experiment_relation".to_string(),
            sub_field: Some("experiment".to_string()),
            repetition_index: 2,
            declared_type: None,
            required: true,
        };
        assert_eq!(header.to_header_string(), "*experiment_relation.experiment-2");
        assert_eq!(header.field_path(), "experiment_relation.experiment");
    }

    #[test]
    fn embedded_member_type_label() {
        let mut field = FieldDescriptor::leaf("related_files.file", FieldKind::EmbeddedObject);
        field.value_kind = Some(FieldKind::String);
        field.repeated = true;
        assert_eq!(field.type_label(), "array of embedded objects, string");
        assert_eq!(
            DeclaredType::from_type_label(&field.type_label()),
            DeclaredType::String
        );
    }
}

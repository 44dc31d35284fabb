use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{FieldDescriptor, FieldKind};
use crate::error::SheetError;

/// Permission tag that restricts a property to administrators.
pub const ADMIN_PERMISSION: &str = "import_items";
pub const DEFAULT_EXCLUSION_TAG: &str = "submit4dn";

#[derive(Debug, Clone)]
pub struct EnumerateOptions {
    pub admin: bool,
    pub exclusion_tag: String,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            admin: false,
            exclusion_tag: DEFAULT_EXCLUSION_TAG.to_string(),
        }
    }
}

/// Lists the submittable fields of a type from its JSON schema, in template
/// column order.
#[derive(Debug, Clone, Default)]
pub struct FieldEnumerator {
    options: EnumerateOptions,
}

impl FieldEnumerator {
    pub fn new(options: EnumerateOptions) -> Self {
        Self { options }
    }

    /// Flattened leaves of a whole schema document (`properties` + `required`).
    pub fn enumerate_schema(&self, schema: &Value) -> Result<Vec<FieldDescriptor>, SheetError> {
        Ok(self.enumerate(schema_properties(schema)?, &required_fields(schema)))
    }

    /// Flattened leaves: embedded members come out as `parent.child` with
    /// kind [`FieldKind::EmbeddedObject`].
    pub fn enumerate(
        &self,
        properties: &Map<String, Value>,
        required: &BTreeSet<String>,
    ) -> Vec<FieldDescriptor> {
        flatten(&self.describe_properties(properties, required, false))
    }

    /// Tree form: embedded groups own their members as children.
    pub fn describe(&self, schema: &Value) -> Result<Vec<FieldDescriptor>, SheetError> {
        Ok(self.describe_properties(schema_properties(schema)?, &required_fields(schema), false))
    }

    fn describe_properties(
        &self,
        properties: &Map<String, Value>,
        required: &BTreeSet<String>,
        nested: bool,
    ) -> Vec<FieldDescriptor> {
        let mut fields = Vec::new();
        for (name, property) in properties {
            if !self.is_submittable(name, property) {
                continue;
            }

            if let Some((members, repeated, holder)) = embedded_group(property) {
                if nested {
                    debug!(field = %name, "skipping doubly embedded object");
                    continue;
                }
                let children = self.describe_properties(members, &required_fields(holder), true);
                if children.is_empty() {
                    continue;
                }
                let mut field = describe_leaf(name, property, FieldKind::EmbeddedObject, required);
                field.repeated = repeated;
                field.children = children;
                fields.push(field);
                continue;
            }

            let kind = property
                .get("type")
                .and_then(Value::as_str)
                .map(FieldKind::from_schema_type)
                .unwrap_or(FieldKind::String);
            fields.push(describe_leaf(name, property, kind, required));
        }
        sort_fields(&mut fields);
        fields
    }

    fn is_submittable(&self, name: &str, property: &Value) -> bool {
        if property
            .get("calculatedProperty")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            debug!(field = name, "skipping calculated property");
            return false;
        }
        let excluded = property
            .get("exclude_from")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .any(|tag| tag.as_str() == Some(self.options.exclusion_tag.as_str()))
            })
            .unwrap_or(false);
        if excluded {
            debug!(field = name, "skipping property excluded from submission");
            return false;
        }
        if !self.options.admin
            && property.get("permission").and_then(Value::as_str) == Some(ADMIN_PERMISSION)
        {
            debug!(field = name, "skipping admin-only property");
            return false;
        }
        true
    }
}

/// Expands tree descriptors into template columns.
pub fn flatten(fields: &[FieldDescriptor]) -> Vec<FieldDescriptor> {
    let mut flat = Vec::new();
    for field in fields {
        if field.kind != FieldKind::EmbeddedObject || field.children.is_empty() {
            flat.push(FieldDescriptor {
                children: Vec::new(),
                ..field.clone()
            });
            continue;
        }
        for child in &field.children {
            flat.push(FieldDescriptor {
                name: format!("{}.{}", field.name, child.name),
                kind: FieldKind::EmbeddedObject,
                value_kind: Some(child.kind),
                repeated: field.repeated,
                children: Vec::new(),
                ..child.clone()
            });
        }
    }
    flat
}

pub fn required_fields(schema: &Value) -> BTreeSet<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn schema_properties(schema: &Value) -> Result<&Map<String, Value>, SheetError> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| SheetError::InvalidSchema {
            item_type: schema_title(schema),
            message: "schema has no properties".to_string(),
        })
}

fn schema_title(schema: &Value) -> String {
    schema
        .get("title")
        .or_else(|| schema.get("$id"))
        .and_then(Value::as_str)
        .unwrap_or("schema")
        .to_string()
}

/// An object with properties, or an array of such objects.
fn embedded_group(property: &Value) -> Option<(&Map<String, Value>, bool, &Value)> {
    match property.get("type").and_then(Value::as_str) {
        Some("object") => property
            .get("properties")
            .and_then(Value::as_object)
            .map(|members| (members, false, property)),
        Some("array") => {
            let items = property.get("items")?;
            if items.get("type").and_then(Value::as_str) != Some("object") {
                return None;
            }
            items
                .get("properties")
                .and_then(Value::as_object)
                .map(|members| (members, true, items))
        }
        _ => None,
    }
}

fn describe_leaf(
    name: &str,
    property: &Value,
    kind: FieldKind,
    required: &BTreeSet<String>,
) -> FieldDescriptor {
    let text = |key: &str| {
        property
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let choices = property
        .get("enum")
        .or_else(|| property.get("items").and_then(|items| items.get("enum")))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    FieldDescriptor {
        required: required.contains(name),
        description: text("description"),
        comment: text("comment"),
        choices,
        order: property.get("lookup").and_then(Value::as_f64),
        ..FieldDescriptor::leaf(name, kind)
    }
}

/// Hinted fields first by hint, the rest alphabetically.
fn sort_fields(fields: &mut [FieldDescriptor]) {
    fields.sort_by(|a, b| match (a.order, b.order) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn names(fields: &[FieldDescriptor]) -> Vec<String> {
        fields.iter().map(FieldDescriptor::header_name).collect()
    }

    #[test]
    fn filters_unsubmittable_properties() {
        let schema = json!({
            "title": "FileFastq",
            "required": ["award"],
            "properties": {
                "award": {"type": "string", "lookup": 1},
                "display_title": {"type": "string", "calculatedProperty": true},
                "date_created": {"type": "string", "exclude_from": ["submit4dn", "FFedit-create"]},
                "status": {"type": "string", "permission": "import_items"},
                "title": {"type": "string"}
            }
        });

        let fields = FieldEnumerator::default().enumerate_schema(&schema).unwrap();
        assert_eq!(names(&fields), vec!["*award", "title"]);

        let admin = FieldEnumerator::new(EnumerateOptions {
            admin: true,
            ..EnumerateOptions::default()
        });
        let fields = admin.enumerate_schema(&schema).unwrap();
        assert_eq!(names(&fields), vec!["*award", "status", "title"]);
    }

    #[test]
    fn hinted_fields_sort_first() {
        let schema = json!({
            "properties": {
                "zeta": {"type": "string"},
                "alpha": {"type": "string"},
                "lab": {"type": "string", "lookup": 3},
                "award": {"type": "string", "lookup": 2}
            }
        });
        let fields = FieldEnumerator::default().enumerate_schema(&schema).unwrap();
        assert_eq!(names(&fields), vec!["award", "lab", "alpha", "zeta"]);
    }

    #[test]
    fn embedded_groups_flatten_to_dotted_members() {
        let schema = json!({
            "properties": {
                "related_files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["file"],
                        "properties": {
                            "relationship_type": {
                                "type": "string",
                                "enum": ["related_to", "derived from"]
                            },
                            "file": {"type": "string", "description": "The related file"}
                        }
                    }
                },
                "read_length": {"type": "integer"}
            }
        });

        let tree = FieldEnumerator::default().describe(&schema).unwrap();
        assert_eq!(tree.len(), 2);
        let group = tree.iter().find(|f| f.name == "related_files").unwrap();
        assert_eq!(group.kind, FieldKind::EmbeddedObject);
        assert!(group.repeated);
        assert_eq!(group.children.len(), 2);

        let fields = flatten(&tree);
        assert_eq!(
            names(&fields),
            vec![
                "read_length",
                "*related_files.file",
                "related_files.relationship_type"
            ]
        );
        assert_eq!(fields[0].kind, FieldKind::Integer);
        assert_eq!(fields[1].kind, FieldKind::EmbeddedObject);
        assert_eq!(fields[1].value_kind, Some(FieldKind::String));
        assert_eq!(fields[1].description.as_deref(), Some("The related file"));
        assert_eq!(fields[2].choices, vec!["related_to", "derived from"]);
        assert_eq!(fields[2].type_label(), "array of embedded objects, string");
    }

    #[test]
    fn doubly_embedded_objects_are_not_expanded() {
        let schema = json!({
            "properties": {
                "outer": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "inner": {"type": "object", "properties": {"x": {"type": "string"}}}
                    }
                }
            }
        });
        let fields = FieldEnumerator::default().enumerate_schema(&schema).unwrap();
        assert_eq!(names(&fields), vec!["outer.name"]);
        assert!(!fields[0].repeated);
    }

    #[test]
    fn enumerates_bare_property_maps() {
        let schema = json!({
            "lab": {"type": "string", "lookup": 2},
            "uuid": {"type": "string", "exclude_from": ["submit4dn"]},
            "files": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {"file": {"type": "string"}}
                }
            },
            "read_length": {"type": "integer"}
        });
        let properties = schema.as_object().unwrap();
        let required = BTreeSet::from(["lab".to_string()]);

        let fields = FieldEnumerator::default().enumerate(properties, &required);
        assert_eq!(names(&fields), vec!["*lab", "files.file", "read_length"]);
        assert!(fields[1].repeated);
        assert_eq!(fields[1].value_kind, Some(FieldKind::String));
        assert_eq!(fields[2].kind, FieldKind::Integer);
    }

    #[test]
    fn schema_without_properties_is_invalid() {
        let err = FieldEnumerator::default()
            .enumerate_schema(&json!({"title": "Broken"}))
            .unwrap_err();
        assert_matches!(err, SheetError::InvalidSchema { ref item_type, .. } if item_type == "Broken");
    }
}

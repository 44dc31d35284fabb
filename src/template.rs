use std::fs;
use std::io::Write;

use camino::Utf8Path;
use csv::WriterBuilder;
use tracing::info;

use crate::domain::FieldDescriptor;
use crate::error::SheetError;
use crate::sheet::delimiter_for;

pub const FIELD_NAME_MARKER: &str = "#Field Name:";
pub const FIELD_TYPE_MARKER: &str = "#Field Type:";
pub const DESCRIPTION_MARKER: &str = "#Description:";
pub const ADDITIONAL_INFO_MARKER: &str = "#Additional Info:";

/// Writes the four template header rows. The first column holds the row
/// markers and is left for row indexes in the data section.
pub fn write_template<W: Write>(
    writer: W,
    fields: &[FieldDescriptor],
    delimiter: u8,
) -> Result<(), SheetError> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(false)
        .from_writer(writer);

    let rows: [(&str, Vec<String>); 4] = [
        (
            FIELD_NAME_MARKER,
            fields.iter().map(FieldDescriptor::header_name).collect(),
        ),
        (
            FIELD_TYPE_MARKER,
            fields.iter().map(FieldDescriptor::type_label).collect(),
        ),
        (
            DESCRIPTION_MARKER,
            fields
                .iter()
                .map(|field| field.description.clone().unwrap_or_default())
                .collect(),
        ),
        (
            ADDITIONAL_INFO_MARKER,
            fields.iter().map(additional_info).collect(),
        ),
    ];

    for (marker, cells) in rows {
        let mut record = Vec::with_capacity(cells.len() + 1);
        record.push(marker.to_string());
        record.extend(cells);
        writer.write_record(&record)?;
    }
    writer
        .flush()
        .map_err(|err| SheetError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_template_file(
    path: &Utf8Path,
    fields: &[FieldDescriptor],
    delimiter: Option<u8>,
) -> Result<(), SheetError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SheetError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("psheets-template")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SheetError::Filesystem(err.to_string()))?;
    write_template(
        temp.as_file(),
        fields,
        delimiter.unwrap_or_else(|| delimiter_for(path)),
    )?;
    temp.persist(path.as_std_path())
        .map_err(|err| SheetError::Filesystem(err.to_string()))?;
    info!(path = %path, columns = fields.len(), "wrote template");
    Ok(())
}

fn additional_info(field: &FieldDescriptor) -> String {
    let mut parts = Vec::new();
    if !field.choices.is_empty() {
        parts.push(format!("Choices:[{}]", field.choices.join(", ")));
    }
    if let Some(comment) = &field.comment {
        parts.push(comment.clone());
    }
    parts.join(" ")
}

use std::time::{Duration, Instant};

use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::client::{PortalClient, SchemaCache, missing_required, record_identifier};
use crate::domain::{FieldDescriptor, Record};
use crate::error::SheetError;
use crate::schema::{EnumerateOptions, FieldEnumerator};
use crate::sheet::Sheet;
use crate::template::write_template_file;

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Update objects that already exist instead of skipping them.
    pub patch: bool,
    /// Look objects up but write nothing.
    pub dry_run: bool,
    /// Stop at the first failing row.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateResult {
    pub item_type: String,
    pub path: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub sheet: String,
    pub rows: Vec<RowResult>,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowResult {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitAction {
    Posted,
    Patched,
    SkippedExisting,
    WouldPost,
    WouldPatch,
    Failed,
}

impl SubmitAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitAction::Posted => "posted",
            SubmitAction::Patched => "patched",
            SubmitAction::SkippedExisting => "skipped-existing",
            SubmitAction::WouldPost => "would-post",
            SubmitAction::WouldPatch => "would-patch",
            SubmitAction::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitItem {
    pub row: usize,
    pub action: SubmitAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub item_type: String,
    pub sheet: String,
    pub submitted_at: String,
    pub dry_run: bool,
    pub items: Vec<SubmitItem>,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Assembles every data row of a sheet. Needs no portal access.
pub fn convert(sheet: &Sheet, sink: &dyn ProgressSink) -> ConvertResult {
    let started = Instant::now();
    sink.event(ProgressEvent {
        message: format!(
            "phase=Assemble; sheet={} type_row={}",
            sheet.name(),
            sheet.has_type_row()
        ),
        elapsed: None,
    });

    let rows: Vec<RowResult> = sheet
        .records(&sheet.assembler())
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(record) => RowResult {
                row: outcome.row,
                record: Some(record),
                error: None,
            },
            Err(err) => RowResult {
                row: outcome.row,
                record: None,
                error: Some(err.to_string()),
            },
        })
        .collect();
    let failed = rows.iter().filter(|row| row.error.is_some()).count();

    sink.event(ProgressEvent {
        message: format!("phase=Done; rows={} failed={failed}", rows.len()),
        elapsed: Some(started.elapsed()),
    });
    ConvertResult {
        sheet: sheet.name().to_string(),
        rows,
        failed,
    }
}

pub struct App<C: PortalClient> {
    client: C,
    schemas: SchemaCache,
    enumerator: FieldEnumerator,
}

impl<C: PortalClient> App<C> {
    pub fn new(client: C, options: EnumerateOptions) -> Self {
        Self {
            client,
            schemas: SchemaCache::new(),
            enumerator: FieldEnumerator::new(options),
        }
    }

    pub fn schemas(&self) -> &SchemaCache {
        &self.schemas
    }

    /// Enumerates the submittable fields of `item_type` and, when `out` is
    /// given, writes them as a template sheet.
    pub fn template(
        &self,
        item_type: &str,
        out: Option<&Utf8Path>,
        delimiter: Option<u8>,
        sink: &dyn ProgressSink,
    ) -> Result<TemplateResult, SheetError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; fetching schema {item_type}"),
            elapsed: None,
        });
        let schema = self.schemas.get_or_fetch(&self.client, item_type)?;
        let fields = self.enumerator.enumerate_schema(&schema)?;

        if let Some(path) = out {
            sink.event(ProgressEvent {
                message: format!("phase=Write; {} columns to {path}", fields.len()),
                elapsed: None,
            });
            write_template_file(path, &fields, delimiter)?;
        }

        Ok(TemplateResult {
            item_type: item_type.to_string(),
            path: out.map(|path| path.to_string()),
            fields,
        })
    }

    /// Assembles each row and posts or patches it. Row failures are recorded
    /// per row; only `fail_fast` stops the run early.
    pub fn submit(
        &self,
        item_type: &str,
        sheet: &Sheet,
        options: SubmitOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SubmitResult, SheetError> {
        let started = Instant::now();
        let schema = self.schemas.get_or_fetch(&self.client, item_type)?;
        let assembler = sheet.assembler();

        let mut items = Vec::new();
        for outcome in sheet.records(&assembler) {
            let item = match outcome.result {
                Ok(record) => self.submit_record(item_type, outcome.row, record, &schema, options),
                Err(err) => SubmitItem {
                    row: outcome.row,
                    action: SubmitAction::Failed,
                    identifier: None,
                    error: Some(err.to_string()),
                },
            };
            sink.event(ProgressEvent {
                message: format!("phase=Submit; row={} action={}", item.row, item.action.as_str()),
                elapsed: Some(started.elapsed()),
            });
            let failed = item.action == SubmitAction::Failed;
            items.push(item);
            if failed && options.fail_fast {
                warn!(row = outcome.row, "stopping at first failed row");
                break;
            }
        }

        let failed = items
            .iter()
            .filter(|item| item.action == SubmitAction::Failed)
            .count();
        Ok(SubmitResult {
            item_type: item_type.to_string(),
            sheet: sheet.name().to_string(),
            submitted_at: Utc::now().to_rfc3339(),
            dry_run: options.dry_run,
            items,
            failed,
        })
    }

    fn submit_record(
        &self,
        item_type: &str,
        row: usize,
        record: Record,
        schema: &serde_json::Value,
        options: SubmitOptions,
    ) -> SubmitItem {
        let identifier = record_identifier(&record);
        let action = self.plan_and_send(item_type, identifier.as_deref(), record, schema, options);
        match action {
            Ok(action) => {
                info!(row, item_type, action = action.as_str(), "row submitted");
                SubmitItem {
                    row,
                    action,
                    identifier,
                    error: None,
                }
            }
            Err(err) => {
                warn!(row, item_type, error = %err, "row failed");
                SubmitItem {
                    row,
                    action: SubmitAction::Failed,
                    identifier,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn plan_and_send(
        &self,
        item_type: &str,
        identifier: Option<&str>,
        mut record: Record,
        schema: &serde_json::Value,
        options: SubmitOptions,
    ) -> Result<SubmitAction, SheetError> {
        let existing = match identifier {
            Some(identifier) => self.client.get_object(identifier)?,
            None => None,
        };

        match (existing, identifier) {
            (Some(_), Some(identifier)) => {
                if !options.patch {
                    return Ok(SubmitAction::SkippedExisting);
                }
                if options.dry_run {
                    return Ok(SubmitAction::WouldPatch);
                }
                record.remove("uuid");
                self.client.patch_object(identifier, &record)?;
                Ok(SubmitAction::Patched)
            }
            _ => {
                let missing = missing_required(&record, schema);
                if !missing.is_empty() {
                    return Err(SheetError::MissingRequiredField(missing.join(", ")));
                }
                if options.dry_run {
                    return Ok(SubmitAction::WouldPost);
                }
                self.client.post_object(item_type, &record)?;
                Ok(SubmitAction::Posted)
            }
        }
    }
}

//! Cell parsing and coercion.
//!
//! Raw workbench cells are coerced into typed field values driven by the
//! schema metadata: picklist and formatter bindings first, then the field
//! datatype. The result separates the fields used to locate an existing
//! match from the full payload written on insert.

use indexmap::{IndexMap, indexmap};
use serde::Serialize;

use crate::{
    plan::{ColumnOptions, MatchBehavior},
    schema::{Datatype, FieldInfo, Picklist, PicklistKind, SchemaMetadata},
    value::{Fields, Row, Value},
};

mod date;
mod latlong;

pub use date::parse_date;
pub use latlong::{is_latlong, parse_coord, parse_latlong};

/// A picklist item to create when the owning record is inserted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PicklistAddition {
    pub picklist_id: i64,
    pub caption: String,
    pub value: String,
}

/// Successfully coerced cell content.
#[derive(Clone, Debug, Default)]
pub struct ParseResult {
    /// Subset used to locate an existing match.
    pub filter_on: Fields,
    /// Full payload written on insert.
    pub upload: Fields,
    pub add_to_picklist: Option<PicklistAddition>,
}

impl ParseResult {
    fn filter_and_upload(fields: Fields) -> Self {
        Self {
            filter_on: fields.clone(),
            upload: fields,
            add_to_picklist: None,
        }
    }
}

/// A cell that could not be coerced.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseFailure {
    pub message: String,
}

impl ParseFailure {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// A parse failure tied to its spreadsheet column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellIssue {
    pub column: String,
    pub message: String,
}

/// Trim a raw cell, mapping whitespace-only content to `None`.
pub fn trimmed(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

const AGENT_TYPES: [&str; 4] = ["Organization", "Person", "Other", "Group"];

/// Parse every mapped cell of one plan node, splitting successes from
/// per-cell issues.
pub fn parse_many(
    metadata: &SchemaMetadata,
    table: &str,
    wbcols: &IndexMap<String, ColumnOptions>,
    row: &Row,
) -> (Vec<ParseResult>, Vec<CellIssue>) {
    let mut results = Vec::new();
    let mut issues = Vec::new();
    for (field, options) in wbcols {
        let raw = row.get(&options.column).map(String::as_str).unwrap_or("");
        match parse_value(metadata, table, field, raw, options) {
            Ok(result) => results.push(result),
            Err(failure) => issues.push(CellIssue {
                column: options.column.clone(),
                message: failure.message,
            }),
        }
    }
    (results, issues)
}

/// Coerce one raw cell into typed field values.
///
/// Dispatch order: blank handling, the fixed agent-type enumeration,
/// picklists, UI formatters, then the field datatype.
pub fn parse_value(
    metadata: &SchemaMetadata,
    table: &str,
    field: &str,
    raw: &str,
    options: &ColumnOptions,
) -> Result<ParseResult, ParseFailure> {
    let info = metadata.field_info(table, field).cloned().unwrap_or_default();

    let mut value = raw.trim();
    if value.is_empty() {
        if let Some(default) = &options.default {
            value = default.trim();
        }
    }

    if value.is_empty() {
        if info.required {
            return Err(ParseFailure::new("field is required"));
        }
        if !options.null_allowed {
            return Err(ParseFailure::new("field is required by upload plan mapping"));
        }
        let result = ParseResult {
            filter_on: indexmap! { field.to_owned() => Value::Null },
            upload: Fields::new(),
            add_to_picklist: None,
        };
        return Ok(apply_match_behavior(result, options, true));
    }

    let result = parse_non_blank(metadata, &info, table, field, value, &options.column)?;
    Ok(apply_match_behavior(result, options, false))
}

fn apply_match_behavior(mut result: ParseResult, options: &ColumnOptions, blank: bool) -> ParseResult {
    let drop_filter = match options.match_behavior {
        MatchBehavior::IgnoreAlways => true,
        MatchBehavior::IgnoreWhenBlank => blank,
        MatchBehavior::IgnoreNever => false,
    };
    if drop_filter {
        result.filter_on.clear();
    }
    result
}

fn parse_non_blank(
    metadata: &SchemaMetadata,
    info: &FieldInfo,
    table: &str,
    field: &str,
    value: &str,
    caption: &str,
) -> Result<ParseResult, ParseFailure> {
    if table.eq_ignore_ascii_case("agent") && field.eq_ignore_ascii_case("agenttype") {
        return parse_agenttype(value);
    }

    if let Some(name) = &info.picklist {
        if let Some(picklist) = metadata.picklist(name) {
            if let Some(result) = parse_with_picklist(picklist, field, value, caption)? {
                return Ok(result);
            }
        }
    }

    if let Some(name) = &info.uiformatter {
        if let Some(formatter) = metadata.formatter(name) {
            return match formatter.canonicalize(value) {
                Ok(canonical) => Ok(ParseResult::filter_and_upload(
                    indexmap! { field.to_owned() => Value::String(canonical) },
                )),
                Err(mismatch) => Err(ParseFailure::new(mismatch.message)),
            };
        }
    }

    if latlong::is_latlong(table, field) {
        return latlong::parse_latlong(field, value);
    }

    match info.datatype {
        Datatype::Boolean => parse_boolean(field, value),
        Datatype::Date => date::parse_date(metadata, table, field, value),
        _ => Ok(ParseResult::filter_and_upload(
            indexmap! { field.to_owned() => Value::String(value.to_owned()) },
        )),
    }
}

fn parse_boolean(field: &str, value: &str) -> Result<ParseResult, ParseFailure> {
    let result = match value.to_lowercase().as_str() {
        "yes" | "true" => true,
        "no" | "false" => false,
        _ => {
            return Err(ParseFailure::new(format!(
                "value {value} not resolvable to true or false"
            )));
        }
    };
    Ok(ParseResult::filter_and_upload(
        indexmap! { field.to_owned() => Value::Boolean(result) },
    ))
}

/// Agent types are a fixed ordered enumeration stored by index.
fn parse_agenttype(value: &str) -> Result<ParseResult, ParseFailure> {
    let value = capitalize(value);
    let index = AGENT_TYPES.iter().position(|t| *t == value).ok_or_else(|| {
        ParseFailure::new(format!("bad agent type: {value}. expected one of {AGENT_TYPES:?}"))
    })?;
    Ok(ParseResult::filter_and_upload(
        indexmap! { "agenttype".to_owned() => Value::Integer(index as i64) },
    ))
}

fn parse_with_picklist(
    picklist: &Picklist,
    field: &str,
    value: &str,
    caption: &str,
) -> Result<Option<ParseResult>, ParseFailure> {
    match picklist.kind {
        PicklistKind::Items => {
            if let Some(stored) = picklist.items.get(value) {
                return Ok(Some(ParseResult::filter_and_upload(
                    indexmap! { field.to_owned() => Value::String(stored.clone()) },
                )));
            }
            if picklist.readonly {
                return Err(ParseFailure::new(format!(
                    "value {value} not in picklist {}",
                    picklist.name
                )));
            }
            let mut result = ParseResult::filter_and_upload(
                indexmap! { field.to_owned() => Value::String(value.to_owned()) },
            );
            result.add_to_picklist = Some(PicklistAddition {
                picklist_id: picklist.id,
                caption: caption.to_owned(),
                value: value.to_owned(),
            });
            Ok(Some(result))
        }
        // table-driven picklists choose records on forms, never field values
        PicklistKind::RowsOfTable | PicklistKind::FieldOfTable => Ok(None),
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

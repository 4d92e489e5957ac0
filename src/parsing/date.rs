//! Temporal cell parsing.
//!
//! Dates arrive in a handful of recognized shapes. Fields with a companion
//! `<field>precision` column accept month and year granularity, clamping the
//! missing components to 1; fields without one accept full dates only.

use chrono::{Datelike, NaiveDate};
use indexmap::indexmap;

use crate::{schema::SchemaMetadata, value::Value};

use super::{ParseFailure, ParseResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Granularity {
    Day,
    Month,
    Year,
}

/// Parse a temporal cell, honoring the companion precision field when the
/// data model defines one.
pub fn parse_date(
    metadata: &SchemaMetadata,
    table: &str,
    field: &str,
    value: &str,
) -> Result<ParseResult, ParseFailure> {
    let precision_field = format!("{field}precision");
    let precision_field = metadata.has_field(table, &precision_field).then_some(precision_field);

    let Some((date, granularity)) = recognize(value) else {
        return Err(ParseFailure::new(format!("bad date value: {value}")));
    };

    let Some(precision_field) = precision_field else {
        if granularity == Granularity::Day {
            return Ok(ParseResult::filter_and_upload(
                indexmap! { field.to_owned() => Value::Date(date) },
            ));
        }
        return Err(ParseFailure::new(format!("bad date value: {value}")));
    };

    let (date, precision) = match granularity {
        Granularity::Day => (date, 0),
        Granularity::Month => (first_of_month(date), 1),
        Granularity::Year => (first_of_year(date), 2),
    };
    Ok(ParseResult::filter_and_upload(indexmap! {
        field.to_owned() => Value::Date(date),
        precision_field => Value::Integer(precision),
    }))
}

/// The date shapes the workbench accepts. Explicit day/month/year forms come
/// first; the remainder are the freeform formats spreadsheets commonly hold.
fn recognize(value: &str) -> Option<(NaiveDate, Granularity)> {
    const DAY_FORMATS: [&str; 6] = ["%d/%m/%Y", "%Y-%m-%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y"];
    const MONTH_FORMATS: [&str; 3] = ["%m/%Y", "%B %Y", "%b %Y"];

    for format in DAY_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some((date, Granularity::Day));
        }
    }
    for format in MONTH_FORMATS {
        // chrono only parses complete dates; substitute the first of the month
        if let Ok(date) = NaiveDate::parse_from_str(&format!("1 {value}"), &format!("%d {format}")) {
            return Some((date, Granularity::Month));
        }
    }
    if let Ok(year) = value.parse::<i32>() {
        if (1000..=9999).contains(&year) {
            return NaiveDate::from_ymd_opt(year, 1, 1).map(|date| (date, Granularity::Year));
        }
    }
    None
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

fn first_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

//! Latitude and longitude cell parsing.
//!
//! Three coordinate shapes are tried in order: decimal degrees, degrees with
//! decimal minutes, and degrees/minutes/decimal seconds. The matched shape
//! is recorded as the original unit, and the trimmed literal input is kept
//! in a parallel text field that matching uses instead of the float.

use std::sync::LazyLock;

use indexmap::indexmap;
use regex::Regex;

use crate::value::Value;

use super::{ParseFailure, ParseResult, trimmed};

struct CoordForm {
    regex: Regex,
    comp_groups: &'static [usize],
    dir_group: usize,
    unit: i64,
}

static COORD_FORMS: LazyLock<[CoordForm; 3]> = LazyLock::new(|| {
    [
        // decimal degrees
        CoordForm {
            regex: Regex::new(r"(?i)^(-?\d{0,3}(\.\d*)?)[^\d\.nsew]*([nsew]?)$").unwrap(),
            comp_groups: &[1],
            dir_group: 3,
            unit: 0,
        },
        // degrees and decimal minutes
        CoordForm {
            regex: Regex::new(r"(?i)^(-?\d{1,3})[^\d\.]+(\d{0,2}(\.\d*)?)[^\d\.nsew]*([nsew]?)$")
                .unwrap(),
            comp_groups: &[1, 2],
            dir_group: 4,
            unit: 2,
        },
        // degrees, minutes and decimal seconds
        CoordForm {
            regex: Regex::new(
                r"(?i)^(-?\d{1,3})[^\d\.]+(\d{1,2})[^\d\.]+(\d{0,2}(\.\d*)?)[^\d\.nsew]*([nsew]?)$",
            )
            .unwrap(),
            comp_groups: &[1, 2, 3],
            dir_group: 5,
            unit: 1,
        },
    ]
});

impl CoordForm {
    fn parse(&self, value: &str) -> Option<(f64, i64)> {
        let caps = self.regex.captures(value)?;
        if caps.get(1).is_none_or(|m| m.as_str().is_empty()) {
            return None;
        }
        let mut comps = Vec::with_capacity(self.comp_groups.len());
        for group in self.comp_groups {
            comps.push(caps.get(*group)?.as_str().parse::<f64>().ok()?);
        }
        let mut result = 0.0;
        let mut divisor = 1.0;
        for comp in &comps {
            result += comp.abs() / divisor;
            divisor *= 60.0;
        }
        // the degrees component carries the sign, signed zero included
        result = result.copysign(comps[0]);
        let direction = caps.get(self.dir_group).map(|m| m.as_str().to_lowercase());
        if matches!(direction.as_deref(), Some("s") | Some("w")) {
            result = -result;
        }
        Some((result, self.unit))
    }
}

/// Whether a field holds a coordinate the locality parsers apply to.
pub fn is_latlong(table: &str, field: &str) -> bool {
    table.eq_ignore_ascii_case("locality")
        && matches!(
            field.to_lowercase().as_str(),
            "latitude1" | "latitude2" | "longitude1" | "longitude2"
        )
}

/// Parse a coordinate, returning the signed decimal value and the unit code
/// of the matched form.
pub fn parse_coord(value: &str) -> Option<(f64, i64)> {
    COORD_FORMS.iter().find_map(|form| form.parse(value))
}

pub fn parse_latlong(field: &str, value: &str) -> Result<ParseResult, ParseFailure> {
    let Some((coord, unit)) = parse_coord(value) else {
        return Err(ParseFailure::new(format!("bad latitude or longitude value: {value}")));
    };

    let field = field.to_lowercase();
    if field.starts_with("lat") && coord.abs() >= 90.0 {
        return Err(ParseFailure::new(format!(
            "latitude absolute value must be less than 90 degrees: {value}"
        )));
    }
    if field.starts_with("long") && coord.abs() >= 180.0 {
        return Err(ParseFailure::new(format!(
            "longitude absolute value must be less than 180 degrees: {value}"
        )));
    }

    let text_field = format!("{}text", field.replace("itude", ""));
    let text = trimmed(value)
        .map(|t| Value::String(t.to_owned()))
        .unwrap_or(Value::Null);
    Ok(ParseResult {
        filter_on: indexmap! { text_field.clone() => text.clone() },
        upload: indexmap! {
            field => Value::Double(coord),
            "originallatlongunit".to_owned() => Value::Integer(unit),
            text_field => text,
        },
        add_to_picklist: None,
    })
}

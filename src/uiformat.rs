//! Formatted-identifier grammars (catalog numbers and the like).
//!
//! A formatter is an ordered list of fields concatenated into an anchored
//! pattern. Parsing validates a raw value against the pattern;
//! canonicalization zero-pads numeric fields and upper-cases alphabetic
//! ones, so equal identifiers always compare equal in the database.

use std::fmt::Write as _;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormatterField {
    Numeric { size: usize },
    Alpha { size: usize },
    Alphanumeric { size: usize },
    Year,
    Separator { text: String },
    Any { size: usize },
}

impl FormatterField {
    fn pattern(&self) -> String {
        match self {
            Self::Numeric { size } => format!(r"\d{{1,{size}}}"),
            Self::Alpha { size } => format!(r"[A-Za-z]{{{size}}}"),
            Self::Alphanumeric { size } => format!(r"[A-Za-z0-9]{{1,{size}}}"),
            Self::Year => r"\d{4}".to_owned(),
            Self::Separator { text } => regex::escape(text),
            Self::Any { size } => format!(r".{{1,{size}}}"),
        }
    }

    fn template(&self, out: &mut String) {
        match self {
            Self::Numeric { size } => (0..*size).for_each(|_| out.push('#')),
            Self::Alpha { size } => (0..*size).for_each(|_| out.push('A')),
            Self::Alphanumeric { size } => (0..*size).for_each(|_| out.push('a')),
            Self::Year => out.push_str("YYYY"),
            Self::Separator { text } => out.push_str(text),
            Self::Any { size } => (0..*size).for_each(|_| out.push('*')),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct FormatMismatch {
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct UiFormatter {
    name: String,
    fields: Vec<FormatterField>,
    regex: Regex,
}

impl UiFormatter {
    pub fn new(name: impl Into<String>, fields: Vec<FormatterField>) -> Self {
        let mut pattern = String::from("^");
        for field in &fields {
            // one capture group per field so canonicalization can rebuild
            write!(pattern, "({})", field.pattern()).unwrap();
        }
        pattern.push('$');
        let regex = Regex::new(&pattern).unwrap();
        Self { name: name.into(), fields, regex }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FormatterField] {
        &self.fields
    }

    /// The template shown to the user on mismatch, e.g. `####-AA`.
    pub fn template(&self) -> String {
        let mut out = String::new();
        for field in &self.fields {
            field.template(&mut out);
        }
        out
    }

    /// Validate and canonicalize a raw value.
    pub fn canonicalize(&self, value: &str) -> Result<String, FormatMismatch> {
        let Some(caps) = self.regex.captures(value) else {
            return Err(FormatMismatch {
                message: format!("value {value} does not match format {}", self.template()),
            });
        };
        let mut out = String::new();
        for (index, field) in self.fields.iter().enumerate() {
            let part = caps.get(index + 1).map(|m| m.as_str()).unwrap_or("");
            match field {
                FormatterField::Numeric { size } => {
                    write!(out, "{part:0>width$}", width = *size).unwrap();
                }
                FormatterField::Alpha { .. } | FormatterField::Alphanumeric { .. } => {
                    out.push_str(&part.to_uppercase());
                }
                _ => out.push_str(part),
            }
        }
        Ok(out)
    }
}

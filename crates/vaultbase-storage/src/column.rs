//! Column descriptors and the special-type overlay.
//!
//! SQLite only ever sees `TEXT` or `REAL` columns. Whether a text column holds
//! dates, attachment references or a legacy relation is recorded separately in
//! `_sys_columns` and resolved into a [`ColumnKind`] here.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

use crate::value::Value;

/// Longest free-text value accepted by [`validate_value`].
pub const MAX_TEXT_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Text,
    Real,
}

impl BaseType {
    pub fn sql(self) -> &'static str {
        match self {
            BaseType::Text => "TEXT",
            BaseType::Real => "REAL",
        }
    }

    /// Map a declared SQLite type back to a base type using SQLite's affinity
    /// rules; anything without numeric affinity is text.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("INT")
            || upper.contains("NUM")
            || upper.contains("DEC")
        {
            BaseType::Real
        } else {
            BaseType::Text
        }
    }
}

impl FromStr for BaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Ok(BaseType::Text),
            "REAL" => Ok(BaseType::Real),
            other => Err(format!("unknown base type {other:?} (expected TEXT or REAL)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialType {
    Date,
    File,
    /// Older databases link rows to another table by name; kept readable only.
    Relation,
}

impl SpecialType {
    pub fn tag(self) -> &'static str {
        match self {
            SpecialType::Date => "DATE",
            SpecialType::File => "FILE",
            SpecialType::Relation => "RELATION",
        }
    }
}

impl fmt::Display for SpecialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SpecialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DATE" => Ok(SpecialType::Date),
            "FILE" => Ok(SpecialType::File),
            "RELATION" => Ok(SpecialType::Relation),
            other => Err(format!("unknown special type {other:?}")),
        }
    }
}

/// One `_sys_columns` row, minus its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialColumn {
    pub special_type: SpecialType,
    /// Free-form; for `RELATION` it names the related table.
    pub extra_info: String,
}

impl SpecialColumn {
    pub fn new(special_type: SpecialType) -> Self {
        Self {
            special_type,
            extra_info: String::new(),
        }
    }

    pub fn with_extra(special_type: SpecialType, extra_info: impl Into<String>) -> Self {
        Self {
            special_type,
            extra_info: extra_info.into(),
        }
    }
}

/// A column to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub base: BaseType,
    pub special: Option<SpecialColumn>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, base: BaseType) -> Self {
        Self {
            name: name.into(),
            base,
            special: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, BaseType::Text)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, BaseType::Real)
    }

    /// Special columns are stored as text.
    pub fn special(name: impl Into<String>, special: SpecialColumn) -> Self {
        Self {
            name: name.into(),
            base: BaseType::Text,
            special: Some(special),
        }
    }
}

/// Physical column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub position: usize,
    pub name: String,
    pub declared_type: String,
    pub primary_key: bool,
}

impl ColumnInfo {
    pub fn base_type(&self) -> BaseType {
        BaseType::from_declared(&self.declared_type)
    }
}

/// A column as the application sees it: base storage type plus any overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Id,
    Text,
    Real,
    Date,
    File,
    Relation { table: String },
}

impl ColumnKind {
    pub fn resolve(info: &ColumnInfo, special: Option<&SpecialColumn>) -> Self {
        if info.primary_key {
            return ColumnKind::Id;
        }
        match special {
            Some(s) => match s.special_type {
                SpecialType::Date => ColumnKind::Date,
                SpecialType::File => ColumnKind::File,
                SpecialType::Relation => ColumnKind::Relation {
                    table: s.extra_info.clone(),
                },
            },
            None => match info.base_type() {
                BaseType::Text => ColumnKind::Text,
                BaseType::Real => ColumnKind::Real,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("maximum {max} characters allowed")]
    TooLong { max: usize },
    #[error("invalid number format")]
    NotANumber,
    #[error("invalid date, use YYYY-MM-DD")]
    InvalidDate,
    #[error("the id column is assigned by the store")]
    IdNotWritable,
    #[error("invalid email format")]
    InvalidEmail,
}

/// Parse user input for a column of the given kind into the value to store.
///
/// Empty input means NULL for every kind.
pub fn validate_value(kind: &ColumnKind, input: &str) -> Result<Value, ValidationError> {
    if input.is_empty() {
        return Ok(Value::Null);
    }
    match kind {
        ColumnKind::Id => Err(ValidationError::IdNotWritable),
        ColumnKind::Real => input
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Real)
            .ok_or(ValidationError::NotANumber),
        ColumnKind::Date => {
            // chrono accepts single-digit months and days; stored dates are always padded.
            let padded = input.len() == 10 && input.as_bytes()[4] == b'-' && input.as_bytes()[7] == b'-';
            match NaiveDate::parse_from_str(input, "%Y-%m-%d") {
                Ok(_) if padded => Ok(Value::Text(input.to_string())),
                _ => Err(ValidationError::InvalidDate),
            }
        }
        ColumnKind::Text => {
            if input.chars().count() > MAX_TEXT_LEN {
                Err(ValidationError::TooLong { max: MAX_TEXT_LEN })
            } else {
                Ok(Value::Text(input.to_string()))
            }
        }
        // Serialized attachment references and relation keys are opaque here.
        ColumnKind::File | ColumnKind::Relation { .. } => Ok(Value::Text(input.to_string())),
    }
}

/// `local@domain.tld` with a letters-only top-level label of at least two chars.
/// Empty input is accepted; email fields are optional.
pub fn validate_email(input: &str) -> Result<(), ValidationError> {
    if input.is_empty() {
        return Ok(());
    }
    let Some((local, domain)) = input.split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let domain_ok = match domain.rsplit_once('.') {
        Some((host, tld)) => {
            !host.is_empty()
                && host
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                && tld.len() >= 2
                && tld.chars().all(|c| c.is_ascii_alphabetic())
        }
        None => false,
    };
    if local_ok && domain_ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

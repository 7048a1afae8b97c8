//! Field normalization: provider field names → canonical output names.
//!
//! Price fields (from the `daily` endpoint) are renamed to capitalised
//! canonical names; factor fields (from `daily_basic`) keep their provider
//! names. Anything outside these tables is rejected up front.

use super::provider::DataError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Which endpoint a field set is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Daily bars (`daily`).
    Price,
    /// Daily valuation and size indicators (`daily_basic`).
    Factor,
}

const PRICE_FIELDS: &[(&str, &str)] = &[
    ("open", "Open"),
    ("high", "High"),
    ("low", "Low"),
    ("close", "Close"),
    ("vol", "Volume"),
    ("amount", "Amount"),
    ("pre_close", "PreClose"),
    ("change", "Change"),
    ("pct_chg", "PctChg"),
];

const FACTOR_FIELDS: &[(&str, &str)] = &[
    ("close", "close"),
    ("turnover_rate", "turnover_rate"),
    ("turnover_rate_f", "turnover_rate_f"),
    ("volume_ratio", "volume_ratio"),
    ("pe", "pe"),
    ("pe_ttm", "pe_ttm"),
    ("pb", "pb"),
    ("ps", "ps"),
    ("ps_ttm", "ps_ttm"),
    ("dv_ratio", "dv_ratio"),
    ("dv_ttm", "dv_ttm"),
    ("total_share", "total_share"),
    ("float_share", "float_share"),
    ("free_share", "free_share"),
    ("total_mv", "total_mv"),
    ("circ_mv", "circ_mv"),
];

impl DataKind {
    fn table(self) -> &'static [(&'static str, &'static str)] {
        match self {
            DataKind::Price => PRICE_FIELDS,
            DataKind::Factor => FACTOR_FIELDS,
        }
    }

    /// Map a provider field name to its canonical form.
    pub fn normalize(self, name: &str) -> Result<Field, DataError> {
        self.table()
            .iter()
            .find(|(raw, _)| *raw == name)
            .map(|&(raw, canonical)| Field { raw, canonical })
            .ok_or_else(|| DataError::UnknownField {
                field: name.to_string(),
                kind: self,
            })
    }

    /// All provider field names this kind accepts.
    pub fn supported_fields(self) -> impl Iterator<Item = &'static str> {
        self.table().iter().map(|(raw, _)| *raw)
    }

    /// Default field set used when a caller doesn't specify one.
    pub fn default_fields(self) -> &'static [&'static str] {
        match self {
            DataKind::Price => &["close"],
            DataKind::Factor => &["total_mv"],
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Price => write!(f, "price"),
            DataKind::Factor => write!(f, "factor"),
        }
    }
}

/// A requested field: the provider's name and the name it gets in output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    raw: &'static str,
    canonical: &'static str,
}

impl Field {
    pub fn raw(&self) -> &'static str {
        self.raw
    }

    pub fn canonical(&self) -> &'static str {
        self.canonical
    }
}

/// Ordered, duplicate-free list of fields of a single kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    kind: DataKind,
    fields: Vec<Field>,
}

impl FieldSet {
    /// Validate and normalize `names` in caller order.
    pub fn parse<I, S>(kind: DataKind, names: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            let field = kind.normalize(name)?;
            if !seen.insert(field.raw) {
                return Err(DataError::DuplicateField(name.to_string()));
            }
            fields.push(field);
        }
        if fields.is_empty() {
            return Err(DataError::EmptyFieldSet);
        }
        Ok(Self { kind, fields })
    }

    /// Parse a comma-separated list such as `"open,close,vol"`.
    pub fn parse_list(kind: DataKind, list: &str) -> Result<Self, DataError> {
        Self::parse(kind, list.split(',').filter(|s| !s.trim().is_empty()))
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Provider names in caller order.
    pub fn raw_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(Field::raw).collect()
    }

    /// Canonical names in caller order.
    pub fn canonical_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(Field::canonical).collect()
    }
}

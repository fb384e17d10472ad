//! Caller-chosen rules applied while loading records.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::TypeCode;

/// Whether an incoming record overwrites a stored record with the same key.
///
/// A default applies to every type; individual types may override it.
///
/// # Examples
/// ```
/// use uls_core::{ReplacePolicy, TypeCode};
///
/// let policy = ReplacePolicy::replace_all().with_override(TypeCode::new("EN"), false);
/// assert!(policy.replaces(&TypeCode::new("HD")));
/// assert!(!policy.replaces(&TypeCode::new("EN")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReplacePolicy {
    default: bool,
    overrides: BTreeMap<TypeCode, bool>,
}

impl Default for ReplacePolicy {
    fn default() -> Self {
        Self::replace_all()
    }
}

impl ReplacePolicy {
    /// Replace existing records of every type.
    #[must_use]
    pub fn replace_all() -> Self {
        Self {
            default: true,
            overrides: BTreeMap::new(),
        }
    }

    /// Keep existing records of every type.
    #[must_use]
    pub fn keep_existing() -> Self {
        Self {
            default: false,
            overrides: BTreeMap::new(),
        }
    }

    /// Override the default for one record type.
    #[must_use]
    pub fn with_override(mut self, type_code: TypeCode, replace: bool) -> Self {
        self.overrides.insert(type_code, replace);
        self
    }

    /// Whether records of `type_code` replace stored records.
    #[must_use]
    pub fn replaces(&self, type_code: &TypeCode) -> bool {
        self.overrides
            .get(type_code)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Handling of records with fields that failed coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InvalidFieldPolicy {
    /// Store the offending fields as null and load the record.
    #[default]
    LoadWithNull,
    /// Reject the whole record.
    RejectRecord,
}

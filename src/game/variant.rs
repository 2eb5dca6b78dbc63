//! Game Variants
//!
//! Static catalogue of fixed-duration game modes sharing one connection.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Short wire code of a variant (`30S`, `1M`, ...).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantCode(String);

impl VariantCode {
    /// Create a variant code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The wire code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VariantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VariantCode({})", self.0)
    }
}

impl Borrow<str> for VariantCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VariantCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// One catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameVariant {
    /// Human-readable label.
    pub label: String,
    /// Wire code.
    pub code: VariantCode,
    /// Round length in seconds.
    pub duration_secs: u32,
}

impl GameVariant {
    /// Create a variant.
    pub fn new(label: impl Into<String>, code: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            label: label.into(),
            code: VariantCode::new(code),
            duration_secs,
        }
    }
}

/// Catalogue validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogueError {
    /// Catalogue has no variants.
    #[error("catalogue is empty")]
    Empty,
    /// Two variants share a code.
    #[error("duplicate variant code: {0}")]
    DuplicateCode(VariantCode),
    /// A variant has a zero-length round.
    #[error("variant {0} has zero duration")]
    ZeroDuration(VariantCode),
}

/// Immutable set of variants, keyed by code.
#[derive(Debug, Clone)]
pub struct VariantCatalogue {
    variants: BTreeMap<VariantCode, GameVariant>,
}

impl VariantCatalogue {
    /// Build a catalogue from any finite set of variants.
    pub fn new(variants: Vec<GameVariant>) -> Result<Self, CatalogueError> {
        if variants.is_empty() {
            return Err(CatalogueError::Empty);
        }

        let mut map = BTreeMap::new();
        for variant in variants {
            if variant.duration_secs == 0 {
                return Err(CatalogueError::ZeroDuration(variant.code));
            }
            if map.contains_key(&variant.code) {
                return Err(CatalogueError::DuplicateCode(variant.code));
            }
            map.insert(variant.code.clone(), variant);
        }

        Ok(Self { variants: map })
    }

    /// The four product variants: 30 seconds, 1, 3 and 5 minutes.
    pub fn standard() -> Self {
        let variants = [
            GameVariant::new("Win Go 30Sec", "30S", 30),
            GameVariant::new("Win Go 1Min", "1M", 60),
            GameVariant::new("Win Go 3Min", "3M", 180),
            GameVariant::new("Win Go 5Min", "5M", 300),
        ];
        Self {
            variants: variants.into_iter().map(|v| (v.code.clone(), v)).collect(),
        }
    }

    /// Look a variant up by its wire code.
    pub fn get(&self, code: &str) -> Option<&GameVariant> {
        self.variants.get(code)
    }

    /// Iterate variants in code order.
    pub fn iter(&self) -> impl Iterator<Item = &GameVariant> {
        self.variants.values()
    }

    /// Number of variants.
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Always false for a validated catalogue.
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

impl Default for VariantCatalogue {
    fn default() -> Self {
        Self::standard()
    }
}

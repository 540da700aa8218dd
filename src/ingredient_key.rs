//! # Ingredient Identity
//!
//! Canonical identity of a stock line. Recipe definitions, pantry rows and
//! shopping rows all spell ingredients slightly differently ("Garlic ",
//! "garlic", "GARLIC"); everything is compared through an [`IngredientKey`].
//!
//! ## Rules
//!
//! - Surrounding whitespace is trimmed, internal runs collapse to one space
//! - Name and unit are lower-cased
//! - An empty unit and an absent unit are the same "no unit" value (`None`)
//! - An empty name is rejected
//!
//! ```rust
//! use pantrywise::ingredient_key::IngredientKey;
//!
//! let key = IngredientKey::normalize("  Olive   Oil ", Some("ML")).unwrap();
//! assert_eq!(key.name, "olive oil");
//! assert_eq!(key.unit.as_deref(), Some("ml"));
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{PantryError, Result};

/// Longest accepted ingredient name, matching the storage column width
pub const MAX_NAME_LENGTH: usize = 255;

/// Longest accepted unit
pub const MAX_UNIT_LENGTH: usize = 64;

/// Longest accepted recipe tag
pub const MAX_TAG_LENGTH: usize = 64;

lazy_static! {
    static ref WHITESPACE_RUN: Regex =
        Regex::new(r"\s+").expect("Whitespace pattern should be valid");
}

/// Normalized (name, unit) pair identifying one stock line
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IngredientKey {
    /// Case-folded, whitespace-normalized name
    pub name: String,
    /// Case-folded unit, `None` for "no unit"
    pub unit: Option<String>,
}

impl IngredientKey {
    /// Normalize a raw name and unit into a key.
    ///
    /// # Errors
    ///
    /// Returns `PantryError::InvalidIngredient` if the name is empty after
    /// normalization or longer than [`MAX_NAME_LENGTH`], or if the unit is
    /// longer than [`MAX_UNIT_LENGTH`].
    pub fn normalize(name: &str, unit: Option<&str>) -> Result<Self> {
        let name = fold(name);
        if name.is_empty() {
            return Err(PantryError::InvalidIngredient(
                "ingredient name must not be empty".to_string(),
            ));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(PantryError::InvalidIngredient(format!(
                "ingredient name longer than {MAX_NAME_LENGTH} characters"
            )));
        }

        let unit = unit.map(fold).filter(|u| !u.is_empty());
        if unit.as_ref().is_some_and(|u| u.chars().count() > MAX_UNIT_LENGTH) {
            return Err(PantryError::InvalidIngredient(format!(
                "unit for '{name}' longer than {MAX_UNIT_LENGTH} characters"
            )));
        }

        Ok(Self { name, unit })
    }

    /// Re-run normalization on an existing key. Normalized keys come back unchanged.
    pub fn renormalize(&self) -> Result<Self> {
        Self::normalize(&self.name, self.unit.as_deref())
    }

    /// True if this key has the "no unit" sentinel
    pub fn is_unitless(&self) -> bool {
        self.unit.is_none()
    }

    /// Unit-aware join rule used when a recipe requirement (`self`) looks up
    /// pantry stock (`stock`).
    ///
    /// A unitless requirement takes stock of the same name in any unit at face
    /// value. Otherwise the units must be equal; there is no unit conversion,
    /// so grams never satisfy cups.
    pub fn accepts(&self, stock: &IngredientKey) -> bool {
        if self.name != stock.name {
            return false;
        }
        match &self.unit {
            None => true,
            Some(unit) => stock.unit.as_ref() == Some(unit),
        }
    }
}

impl fmt::Display for IngredientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "{} ({})", self.name, unit),
            None => write!(f, "{}", self.name),
        }
    }
}

fn fold(raw: &str) -> String {
    WHITESPACE_RUN.replace_all(raw.trim(), " ").to_lowercase()
}

//! # Pantry Data Model
//!
//! Rows owned by the storage collaborator (pantry, recipe ingredients,
//! shopping list) and the derived match result handed to the presentation
//! layer.
//!
//! ## Core Concepts
//!
//! - **PantryEntry**: a batch of stock owned by a user, optionally with an expiry date
//! - **RecipeIngredient**: one required ingredient of a recipe, amount > 0
//! - **ShoppingEntry**: an item to buy; at most one undone row per user and key
//! - **MatchResult**: have/missing breakdown of a recipe against a pantry

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::errors::{PantryError, Result};
use crate::ingredient_key::IngredientKey;

/// Decimal places kept for quantities and amounts, matching the storage columns
pub const QUANTITY_SCALE: u32 = 3;

/// Exclusive upper bound on a single quantity (11 integer digits)
pub const QUANTITY_LIMIT: i64 = 100_000_000_000;

/// Reject a quantity that storage cannot hold exactly.
///
/// Trailing zeros do not count towards the scale, so `1.5000` is accepted
/// and `0.0004` is not.
pub fn ensure_storable_quantity(subject: impl fmt::Display, quantity: Decimal) -> Result<()> {
    if quantity.normalize().scale() > QUANTITY_SCALE {
        return Err(PantryError::InvalidIngredient(format!(
            "{subject} has more than {QUANTITY_SCALE} decimal places: {quantity}"
        )));
    }
    if quantity.abs() >= Decimal::from(QUANTITY_LIMIT) {
        return Err(PantryError::InvalidIngredient(format!("{subject} is too large: {quantity}")));
    }
    Ok(())
}

/// A batch of an ingredient in a user's pantry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PantryEntry {
    pub id: i64,
    pub user_id: i64,
    pub key: IngredientKey,
    pub quantity: Decimal,
    pub expires_on: Option<NaiveDate>,
}

/// A required ingredient of a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub recipe_id: i64,
    pub key: IngredientKey,
    pub amount: Decimal,
}

/// A shopping list row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingEntry {
    pub id: i64,
    pub user_id: i64,
    pub key: IngredientKey,
    pub quantity: Decimal,
    /// Purchased
    pub done: bool,
}

/// Catalog entry for a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// An ingredient the pantry fully covers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaveIngredient {
    pub key: IngredientKey,
    pub needed: Decimal,
    pub available: Decimal,
}

/// An ingredient the pantry lacks (entirely or in part)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingIngredient {
    pub key: IngredientKey,
    pub needed: Decimal,
    pub available: Decimal,
    /// `needed - available`, always > 0
    pub missing_amount: Decimal,
}

/// Have/missing breakdown of one recipe against one pantry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub recipe_id: i64,
    pub title: String,
    pub have: Vec<HaveIngredient>,
    pub missing: Vec<MissingIngredient>,
    /// Share of distinct ingredients fully covered, in [0, 100]
    pub match_pct: f64,
}

impl PantryEntry {
    pub fn new(id: i64, user_id: i64, key: IngredientKey, quantity: Decimal) -> Self {
        Self {
            id,
            user_id,
            key,
            quantity,
            expires_on: None,
        }
    }

    /// Set the expiry date
    pub fn with_expiry(mut self, expires_on: NaiveDate) -> Self {
        self.expires_on = Some(expires_on);
        self
    }

    /// Days from `today` until expiry; negative once expired
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expires_on.map(|date| (date - today).num_days())
    }
}

impl RecipeIngredient {
    /// Create a recipe ingredient, enforcing a positive amount.
    pub fn new(recipe_id: i64, key: IngredientKey, amount: Decimal) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(PantryError::InvalidIngredient(format!(
                "amount for '{key}' must be positive, got {amount}"
            )));
        }
        ensure_storable_quantity(format_args!("amount for '{key}'"), amount)?;
        Ok(Self {
            recipe_id,
            key,
            amount,
        })
    }
}

impl ShoppingEntry {
    pub fn new(id: i64, user_id: i64, key: IngredientKey, quantity: Decimal) -> Self {
        Self {
            id,
            user_id,
            key,
            quantity,
            done: false,
        }
    }

    /// Mark as purchased
    pub fn purchased(mut self) -> Self {
        self.done = true;
        self
    }
}

impl Recipe {
    pub fn new(id: i64, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

impl MatchResult {
    pub fn have_count(&self) -> usize {
        self.have.len()
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    /// Number of distinct ingredients the recipe needs
    pub fn total(&self) -> usize {
        self.have.len() + self.missing.len()
    }

    /// True when the pantry covers every ingredient of a non-empty recipe
    pub fn is_complete(&self) -> bool {
        self.total() > 0 && self.missing.is_empty()
    }

    /// Keys fully covered by the pantry
    pub fn have_keys(&self) -> BTreeSet<&IngredientKey> {
        self.have.iter().map(|h| &h.key).collect()
    }

    /// Shortfalls as (key, amount) pairs, the input of the shopping reconciler
    pub fn missing_amounts(&self) -> Vec<(IngredientKey, Decimal)> {
        self.missing
            .iter()
            .map(|m| (m.key.clone(), m.missing_amount))
            .collect()
    }
}

impl fmt::Display for MissingIngredient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: need {}, have {}, short {}",
            self.key,
            self.needed.normalize(),
            self.available.normalize(),
            self.missing_amount.normalize()
        )
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({}/{} ingredients, {:.1}% match)",
            self.title,
            self.have_count(),
            self.total(),
            self.match_pct
        )?;
        for missing in &self.missing {
            writeln!(f, "  - {}", missing)?;
        }
        Ok(())
    }
}

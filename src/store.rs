//! # Storage Collaborator
//!
//! The persistence contract the pantry core calls into. Implementations
//! return `anyhow::Result` with context; the core wraps failures unchanged.
//!
//! Every row-level operation is scoped by `user_id`: a row owned by another
//! user behaves exactly like a missing row (`None` / `false`).

use async_trait::async_trait;
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::ingredient_key::IngredientKey;
use crate::models::{PantryEntry, Recipe, RecipeIngredient, ShoppingEntry};

/// Recipe catalog search criteria
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipeQuery {
    /// Substring matched against title, ingredient names and tag names
    pub text: Option<String>,
    /// Exact tag name
    pub tag: Option<String>,
}

/// A validated recipe ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecipe {
    pub title: String,
    pub description: String,
    pub steps_md: String,
    pub created_by: i64,
    /// (key, amount) pairs, amount > 0
    pub ingredients: Vec<(IngredientKey, Decimal)>,
    pub tags: Vec<String>,
}

/// Result of moving one shopping row into the pantry
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Pantry row after the merge or insert; the shopping row is gone
    Transferred(PantryEntry),
    /// No such shopping row for this user
    Missing,
    /// The row is not marked done and `require_done` was set; nothing changed
    NotDone,
}

#[async_trait]
pub trait PantryStore: Send + Sync {
    // Pantry

    async fn pantry_entries(&self, user_id: i64) -> Result<Vec<PantryEntry>>;

    async fn insert_pantry_entry(
        &self,
        user_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<PantryEntry>;

    /// Atomically add `delta` to a row and keep the earliest expiry.
    async fn add_to_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        delta: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<Option<PantryEntry>>;

    /// Overwrite key, quantity and expiry of a row.
    async fn update_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<Option<PantryEntry>>;

    async fn delete_pantry_entry(&self, user_id: i64, entry_id: i64) -> Result<bool>;

    // Recipes

    async fn recipe(&self, recipe_id: i64) -> Result<Option<Recipe>>;

    /// Ingredient rows of a recipe; an empty list is valid.
    async fn recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>>;

    /// Most recently created recipes first
    async fn recent_recipes(&self, limit: usize) -> Result<Vec<Recipe>>;

    /// Matching recipes ordered by title
    async fn search_recipes(&self, query: &RecipeQuery) -> Result<Vec<Recipe>>;

    async fn create_recipe(&self, recipe: &NewRecipe) -> Result<Recipe>;

    // Shopping list

    async fn shopping_entries(&self, user_id: i64) -> Result<Vec<ShoppingEntry>>;

    async fn shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<ShoppingEntry>>;

    /// Conditional upsert keyed by (user, key, done = false): add `amount` to
    /// the undone row if there is one, otherwise create it. Must be atomic
    /// against concurrent calls for the same key.
    async fn merge_undone_shopping(&self, user_id: i64, key: &IngredientKey, amount: Decimal) -> Result<ShoppingEntry>;

    async fn set_shopping_done(&self, user_id: i64, entry_id: i64, done: bool) -> Result<Option<ShoppingEntry>>;

    async fn set_shopping_quantity(&self, user_id: i64, entry_id: i64, quantity: Decimal) -> Result<Option<ShoppingEntry>>;

    async fn delete_shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<bool>;

    /// Mark a row as not purchased, as one atomic step.
    ///
    /// If the user already has another undone row for the same key, the
    /// row's quantity is added to that row and the row is deleted; the
    /// surviving row is returned. `None` when there is no such row.
    async fn reopen_shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<ShoppingEntry>>;

    /// Merge a shopping row into the pantry and delete it, as one atomic step.
    ///
    /// The target pantry row is the same-key row with the soonest expiry
    /// (undated last); a new undated row is inserted when none exists.
    async fn transfer_shopping_entry(&self, user_id: i64, entry_id: i64, require_done: bool) -> Result<TransferOutcome>;
}

//! # Pantry Service
//!
//! Entry point for the presentation layer. Loads rows from the storage
//! collaborator, runs the pure engines (aggregation, matching, planning) over
//! them and routes shopping list work to the [`ShoppingReconciler`].
//!
//! The requesting user is an explicit parameter of every operation.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::errors::{PantryError, Result};
use crate::ingredient_key::IngredientKey;
use crate::matching::{match_recipe, rank_by_match};
use crate::meal_plan::{rank_for_plan, PlanCandidate};
use crate::models::{ensure_storable_quantity, MatchResult, PantryEntry, Recipe, ShoppingEntry};
use crate::pantry::{aggregate, choose_merge_target, days_until_expiry_by_key, expiring_within, DataIntegrityWarning, PantryTotals};
use crate::recipe_import::{build_recipe, RecipeForm};
use crate::shopping::ShoppingReconciler;
use crate::store::{PantryStore, RecipeQuery};
use crate::user_locks::UserLocks;

/// Landing page data for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeView {
    /// Stocked items expiring within the configured window, soonest first
    pub expiring: Vec<PantryEntry>,
    /// Best-matching recent recipes
    pub recommended: Vec<MatchResult>,
    /// Pantry rows left out of the computation
    pub warnings: Vec<DataIntegrityWarning>,
}

/// One slot of a weekly plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMeal {
    pub plan: PlanCandidate,
    pub result: MatchResult,
}

pub struct PantryService {
    store: Arc<dyn PantryStore>,
    config: CoreConfig,
    locks: Arc<UserLocks>,
    shopping: ShoppingReconciler,
}

impl PantryService {
    pub fn new(store: Arc<dyn PantryStore>, config: CoreConfig) -> Self {
        let locks = Arc::new(UserLocks::new());
        let shopping = ShoppingReconciler::new(Arc::clone(&store), Arc::clone(&locks));
        Self {
            store,
            config,
            locks,
            shopping,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Shopping list operations sharing this service's user locks
    pub fn shopping(&self) -> &ShoppingReconciler {
        &self.shopping
    }

    // Pantry

    pub async fn pantry(&self, user_id: i64) -> Result<Vec<PantryEntry>> {
        Ok(self.store.pantry_entries(user_id).await?)
    }

    pub async fn pantry_totals(&self, user_id: i64) -> Result<PantryTotals> {
        let entries = self.store.pantry_entries(user_id).await?;
        Ok(aggregate(user_id, &entries))
    }

    /// Add stock, merging into the soonest-expiring row with the same key.
    ///
    /// The merged row keeps the earliest of the two expiry dates. Without a
    /// row for the key a new one is inserted.
    pub async fn add_pantry_item(
        &self,
        user_id: i64,
        name: &str,
        unit: Option<&str>,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<PantryEntry> {
        let key = IngredientKey::normalize(name, unit)?;
        if quantity <= Decimal::ZERO {
            return Err(PantryError::InvalidIngredient(format!(
                "quantity for '{key}' must be positive, got {quantity}"
            )));
        }
        ensure_storable_quantity(format_args!("quantity for '{key}'"), quantity)?;

        let _guard = self.locks.lock(user_id).await;

        let entries = self.store.pantry_entries(user_id).await?;
        if let Some(target) = choose_merge_target(&entries, &key) {
            if let Some(merged) = self
                .store
                .add_to_pantry_entry(user_id, target.id, quantity, expires_on)
                .await?
            {
                info!(user_id, entry_id = merged.id, %key, %quantity, "Merged stock into pantry item");
                return Ok(merged);
            }
            warn!(user_id, entry_id = target.id, "Pantry merge target disappeared, inserting instead");
        }

        let entry = self
            .store
            .insert_pantry_entry(user_id, &key, quantity, expires_on)
            .await?;
        info!(user_id, entry_id = entry.id, %key, %quantity, "Added pantry item");
        Ok(entry)
    }

    /// Overwrite one of the user's pantry rows; quantity may be zero.
    pub async fn edit_pantry_item(
        &self,
        user_id: i64,
        entry_id: i64,
        name: &str,
        unit: Option<&str>,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<PantryEntry> {
        let key = IngredientKey::normalize(name, unit)?;
        if quantity < Decimal::ZERO {
            return Err(PantryError::InvalidIngredient(format!(
                "quantity for '{key}' must not be negative, got {quantity}"
            )));
        }
        ensure_storable_quantity(format_args!("quantity for '{key}'"), quantity)?;

        let _guard = self.locks.lock(user_id).await;
        self.store
            .update_pantry_entry(user_id, entry_id, &key, quantity, expires_on)
            .await?
            .ok_or_else(|| PantryError::not_found("pantry item", entry_id, user_id))
    }

    pub async fn delete_pantry_item(&self, user_id: i64, entry_id: i64) -> Result<()> {
        let _guard = self.locks.lock(user_id).await;
        if self.store.delete_pantry_entry(user_id, entry_id).await? {
            info!(user_id, entry_id, "Deleted pantry item");
            Ok(())
        } else {
            Err(PantryError::not_found("pantry item", entry_id, user_id))
        }
    }

    // Recipes

    /// Validate and store a submitted recipe
    pub async fn create_recipe(&self, user_id: i64, form: &RecipeForm) -> Result<Recipe> {
        let recipe = build_recipe(form, user_id)?;
        let stored = self.store.create_recipe(&recipe).await?;
        info!(user_id, recipe_id = stored.id, title = %stored.title, "Created recipe");
        Ok(stored)
    }

    /// Match one recipe against the user's pantry
    pub async fn match_for_user(&self, user_id: i64, recipe_id: i64) -> Result<MatchResult> {
        let recipe = self
            .store
            .recipe(recipe_id)
            .await?
            .ok_or(PantryError::RecipeNotFound(recipe_id))?;
        let totals = self.pantry_totals(user_id).await?;
        self.match_one(&recipe, &totals).await
    }

    /// Put every shortfall of a recipe on the user's shopping list
    pub async fn add_missing_for_recipe(&self, user_id: i64, recipe_id: i64) -> Result<Vec<ShoppingEntry>> {
        let result = self.match_for_user(user_id, recipe_id).await?;
        let missing = result.missing_amounts();
        if missing.is_empty() {
            debug!(user_id, recipe_id, "Nothing missing for recipe");
            return Ok(Vec::new());
        }
        self.shopping.add_missing(user_id, &missing).await
    }

    /// Search the catalog and rank the hits by match against the user's pantry
    pub async fn search_ranked(&self, user_id: i64, query: &RecipeQuery) -> Result<Vec<MatchResult>> {
        let recipes = self.store.search_recipes(query).await?;
        let totals = self.pantry_totals(user_id).await?;
        let results = self.match_all(&recipes, &totals).await?;
        Ok(rank_by_match(results))
    }

    /// Expiring items plus the best matches among the most recent recipes
    pub async fn home(&self, user_id: i64, today: NaiveDate) -> Result<HomeView> {
        let entries = self.store.pantry_entries(user_id).await?;
        let totals = aggregate(user_id, &entries);
        let expiring = expiring_within(&entries, today, self.config.expiry_window_days);

        let recipes = self.store.recent_recipes(self.config.candidate_limit).await?;
        let mut recommended = rank_by_match(self.match_all(&recipes, &totals).await?);
        recommended.truncate(self.config.recommendation_limit);

        debug!(
            user_id,
            expiring = expiring.len(),
            recommended = recommended.len(),
            "Built home view"
        );
        Ok(HomeView {
            expiring,
            recommended,
            warnings: totals.warnings,
        })
    }

    /// Greedy weekly plan over the most recent recipes.
    ///
    /// `limit` defaults to the configured plan size.
    pub async fn weekly_plan(&self, user_id: i64, today: NaiveDate, limit: Option<usize>) -> Result<Vec<PlannedMeal>> {
        let limit = limit.unwrap_or(self.config.weekly_plan_limit);
        let entries = self.store.pantry_entries(user_id).await?;
        let totals = aggregate(user_id, &entries);
        let expiry_weights = days_until_expiry_by_key(&entries, today);

        let recipes = self.store.recent_recipes(self.config.candidate_limit).await?;
        let mut results = self.match_all(&recipes, &totals).await?;

        let plan = rank_for_plan(&results, &expiry_weights, self.config.expiry_window_days);
        let mut meals = Vec::with_capacity(limit.min(plan.len()));
        for candidate in plan.into_iter().take(limit) {
            if let Some(position) = results.iter().position(|r| r.recipe_id == candidate.recipe_id) {
                meals.push(PlannedMeal {
                    plan: candidate,
                    result: results.swap_remove(position),
                });
            }
        }

        info!(user_id, planned = meals.len(), "Built weekly plan");
        Ok(meals)
    }

    async fn match_one(&self, recipe: &Recipe, totals: &PantryTotals) -> Result<MatchResult> {
        let ingredients = self.store.recipe_ingredients(recipe.id).await?;
        Ok(match_recipe(recipe, &ingredients, totals))
    }

    async fn match_all(&self, recipes: &[Recipe], totals: &PantryTotals) -> Result<Vec<MatchResult>> {
        let mut results = Vec::with_capacity(recipes.len());
        for recipe in recipes {
            results.push(self.match_one(recipe, totals).await?);
        }
        Ok(results)
    }
}

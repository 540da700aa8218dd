//! In-process implementation of [`PantryStore`].
//!
//! All state sits behind one async mutex, so every operation is atomic.
//! Used by the test suites and for trying the core without a database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::ingredient_key::IngredientKey;
use crate::models::{PantryEntry, Recipe, RecipeIngredient, ShoppingEntry};
use crate::pantry::{choose_merge_target, earliest_expiry};
use crate::store::{NewRecipe, PantryStore, RecipeQuery, TransferOutcome};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    pantry: Vec<PantryEntry>,
    recipes: Vec<Recipe>,
    recipe_ingredients: Vec<RecipeIngredient>,
    shopping: Vec<ShoppingEntry>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_pantry(&mut self, user_id: i64, key: &IngredientKey, quantity: Decimal, expires_on: Option<NaiveDate>) -> PantryEntry {
        let entry = PantryEntry {
            id: self.allocate_id(),
            user_id,
            key: key.clone(),
            quantity,
            expires_on,
        };
        self.pantry.push(entry.clone());
        entry
    }

    fn pantry_mut(&mut self, user_id: i64, entry_id: i64) -> Option<&mut PantryEntry> {
        self.pantry
            .iter_mut()
            .find(|e| e.id == entry_id && e.user_id == user_id)
    }

    fn shopping_mut(&mut self, user_id: i64, entry_id: i64) -> Option<&mut ShoppingEntry> {
        self.shopping
            .iter_mut()
            .find(|e| e.id == entry_id && e.user_id == user_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PantryStore for MemoryStore {
    async fn pantry_entries(&self, user_id: i64) -> Result<Vec<PantryEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<PantryEntry> = state
            .pantry
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn insert_pantry_entry(
        &self,
        user_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<PantryEntry> {
        let mut state = self.state.lock().await;
        Ok(state.insert_pantry(user_id, key, quantity, expires_on))
    }

    async fn add_to_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        delta: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<Option<PantryEntry>> {
        let mut state = self.state.lock().await;
        Ok(state.pantry_mut(user_id, entry_id).map(|entry| {
            entry.quantity += delta;
            entry.expires_on = earliest_expiry(entry.expires_on, expires_on);
            entry.clone()
        }))
    }

    async fn update_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<Option<PantryEntry>> {
        let mut state = self.state.lock().await;
        Ok(state.pantry_mut(user_id, entry_id).map(|entry| {
            entry.key = key.clone();
            entry.quantity = quantity;
            entry.expires_on = expires_on;
            entry.clone()
        }))
    }

    async fn delete_pantry_entry(&self, user_id: i64, entry_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.pantry.len();
        state
            .pantry
            .retain(|e| !(e.id == entry_id && e.user_id == user_id));
        Ok(state.pantry.len() < before)
    }

    async fn recipe(&self, recipe_id: i64) -> Result<Option<Recipe>> {
        let state = self.state.lock().await;
        Ok(state.recipes.iter().find(|r| r.id == recipe_id).cloned())
    }

    async fn recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let state = self.state.lock().await;
        Ok(state
            .recipe_ingredients
            .iter()
            .filter(|i| i.recipe_id == recipe_id)
            .cloned()
            .collect())
    }

    async fn recent_recipes(&self, limit: usize) -> Result<Vec<Recipe>> {
        let state = self.state.lock().await;
        let mut recipes = state.recipes.clone();
        recipes.sort_by(|a, b| b.id.cmp(&a.id));
        recipes.truncate(limit);
        Ok(recipes)
    }

    async fn search_recipes(&self, query: &RecipeQuery) -> Result<Vec<Recipe>> {
        let state = self.state.lock().await;
        let text = query
            .text
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        let tag = query
            .tag
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        let mut found: Vec<Recipe> = state
            .recipes
            .iter()
            .filter(|recipe| match &tag {
                Some(tag) => recipe.tags.iter().any(|t| t == tag),
                None => true,
            })
            .filter(|recipe| match &text {
                Some(text) => {
                    recipe.title.to_lowercase().contains(text)
                        || recipe.tags.iter().any(|t| t.contains(text))
                        || state
                            .recipe_ingredients
                            .iter()
                            .any(|i| i.recipe_id == recipe.id && i.key.name.contains(text))
                }
                None => true,
            })
            .cloned()
            .collect();

        found.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn create_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let stored = Recipe::new(id, &recipe.title)
            .with_description(&recipe.description)
            .with_tags(recipe.tags.clone());
        state.recipes.push(stored.clone());
        for (key, amount) in &recipe.ingredients {
            state.recipe_ingredients.push(RecipeIngredient {
                recipe_id: id,
                key: key.clone(),
                amount: *amount,
            });
        }
        Ok(stored)
    }

    async fn shopping_entries(&self, user_id: i64) -> Result<Vec<ShoppingEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<ShoppingEntry> = state
            .shopping
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.done
                .cmp(&b.done)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries)
    }

    async fn shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<ShoppingEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .shopping
            .iter()
            .find(|e| e.id == entry_id && e.user_id == user_id)
            .cloned())
    }

    async fn merge_undone_shopping(&self, user_id: i64, key: &IngredientKey, amount: Decimal) -> Result<ShoppingEntry> {
        let mut state = self.state.lock().await;
        if let Some(open) = state
            .shopping
            .iter_mut()
            .find(|e| e.user_id == user_id && !e.done && &e.key == key)
        {
            open.quantity += amount;
            return Ok(open.clone());
        }

        let id = state.allocate_id();
        let entry = ShoppingEntry::new(id, user_id, key.clone(), amount);
        state.shopping.push(entry.clone());
        Ok(entry)
    }

    async fn set_shopping_done(&self, user_id: i64, entry_id: i64, done: bool) -> Result<Option<ShoppingEntry>> {
        let mut state = self.state.lock().await;
        Ok(state.shopping_mut(user_id, entry_id).map(|entry| {
            entry.done = done;
            entry.clone()
        }))
    }

    async fn set_shopping_quantity(&self, user_id: i64, entry_id: i64, quantity: Decimal) -> Result<Option<ShoppingEntry>> {
        let mut state = self.state.lock().await;
        Ok(state.shopping_mut(user_id, entry_id).map(|entry| {
            entry.quantity = quantity;
            entry.clone()
        }))
    }

    async fn delete_shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.shopping.len();
        state
            .shopping
            .retain(|e| !(e.id == entry_id && e.user_id == user_id));
        Ok(state.shopping.len() < before)
    }

    async fn reopen_shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<ShoppingEntry>> {
        let mut state = self.state.lock().await;

        let Some(position) = state
            .shopping
            .iter()
            .position(|e| e.id == entry_id && e.user_id == user_id)
        else {
            return Ok(None);
        };
        let item = state.shopping[position].clone();

        let twin = state
            .shopping
            .iter()
            .position(|e| e.user_id == user_id && e.id != entry_id && !e.done && e.key == item.key);
        if let Some(twin) = twin {
            state.shopping[twin].quantity += item.quantity;
            let merged = state.shopping[twin].clone();
            state.shopping.remove(position);
            return Ok(Some(merged));
        }

        let entry = &mut state.shopping[position];
        entry.done = false;
        Ok(Some(entry.clone()))
    }

    async fn transfer_shopping_entry(&self, user_id: i64, entry_id: i64, require_done: bool) -> Result<TransferOutcome> {
        let mut state = self.state.lock().await;

        let Some(position) = state
            .shopping
            .iter()
            .position(|e| e.id == entry_id && e.user_id == user_id)
        else {
            return Ok(TransferOutcome::Missing);
        };
        if require_done && !state.shopping[position].done {
            return Ok(TransferOutcome::NotDone);
        }

        let item = state.shopping[position].clone();
        let user_rows: Vec<PantryEntry> = state
            .pantry
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();

        let merged = match choose_merge_target(&user_rows, &item.key).map(|e| e.id) {
            Some(target_id) => {
                let target = state
                    .pantry_mut(user_id, target_id)
                    .ok_or_else(|| anyhow::anyhow!("Pantry row {target_id} vanished during transfer"))?;
                target.quantity += item.quantity;
                target.clone()
            }
            None => state.insert_pantry(user_id, &item.key, item.quantity, None),
        };
        state.shopping.remove(position);
        Ok(TransferOutcome::Transferred(merged))
    }
}

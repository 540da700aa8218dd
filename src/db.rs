//! PostgreSQL storage for pantry, recipes and shopping list.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::ingredient_key::IngredientKey;
use crate::models::{PantryEntry, Recipe, RecipeIngredient, ShoppingEntry};
use crate::store::{NewRecipe, PantryStore, RecipeQuery, TransferOutcome};

const PANTRY_COLUMNS: &str = "id, user_id, item_name, quantity, unit, expires_on";
const SHOPPING_COLUMNS: &str = "id, user_id, item_name, quantity, unit, done";

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS recipes (
            id BIGSERIAL PRIMARY KEY,
            title VARCHAR(255) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            steps_md TEXT NOT NULL DEFAULT '',
            created_by BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create recipes table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS recipe_ingredients (
            id BIGSERIAL PRIMARY KEY,
            recipe_id BIGINT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            ingredient_name VARCHAR(255) NOT NULL,
            amount NUMERIC(14, 3) NOT NULL CHECK (amount > 0),
            unit VARCHAR(64)
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create recipe_ingredients table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS recipe_tags (
            recipe_id BIGINT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            tag VARCHAR(64) NOT NULL,
            PRIMARY KEY (recipe_id, tag)
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create recipe_tags table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pantry_items (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            item_name VARCHAR(255) NOT NULL,
            quantity NUMERIC(14, 3) NOT NULL,
            unit VARCHAR(64),
            expires_on DATE
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create pantry_items table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS pantry_items_user_key ON pantry_items (user_id, item_name, unit)")
        .execute(pool)
        .await
        .context("Failed to create pantry_items index")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS shopping_list (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            item_name VARCHAR(255) NOT NULL,
            quantity NUMERIC(14, 3) NOT NULL CHECK (quantity > 0),
            unit VARCHAR(64),
            done BOOLEAN NOT NULL DEFAULT FALSE
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create shopping_list table")?;

    // At most one undone row per user and ingredient key
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS shopping_list_one_open_row
         ON shopping_list (user_id, item_name, (COALESCE(unit, '')))
         WHERE NOT done",
    )
    .execute(pool)
    .await
    .context("Failed to create shopping_list open-row index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

#[derive(Debug, FromRow)]
struct PantryRow {
    id: i64,
    user_id: i64,
    item_name: String,
    quantity: Decimal,
    unit: Option<String>,
    expires_on: Option<NaiveDate>,
}

impl PantryRow {
    fn into_entry(self) -> Result<PantryEntry> {
        let key = IngredientKey::normalize(&self.item_name, self.unit.as_deref())
            .with_context(|| format!("Corrupt pantry row {}", self.id))?;
        Ok(PantryEntry {
            id: self.id,
            user_id: self.user_id,
            key,
            quantity: self.quantity,
            expires_on: self.expires_on,
        })
    }
}

#[derive(Debug, FromRow)]
struct ShoppingRow {
    id: i64,
    user_id: i64,
    item_name: String,
    quantity: Decimal,
    unit: Option<String>,
    done: bool,
}

impl ShoppingRow {
    fn into_entry(self) -> Result<ShoppingEntry> {
        let key = IngredientKey::normalize(&self.item_name, self.unit.as_deref())
            .with_context(|| format!("Corrupt shopping row {}", self.id))?;
        Ok(ShoppingEntry {
            id: self.id,
            user_id: self.user_id,
            key,
            quantity: self.quantity,
            done: self.done,
        })
    }
}

#[derive(Debug, FromRow)]
struct RecipeRow {
    id: i64,
    title: String,
    description: String,
}

#[derive(Debug, FromRow)]
struct RecipeIngredientRow {
    recipe_id: i64,
    ingredient_name: String,
    amount: Decimal,
    unit: Option<String>,
}

/// [`PantryStore`] backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a pool of `max_connections`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn attach_tags(&self, rows: Vec<RecipeRow>) -> Result<Vec<Recipe>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let tag_rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT recipe_id, tag FROM recipe_tags WHERE recipe_id = ANY($1) ORDER BY tag")
                .bind(ids.as_slice())
                .fetch_all(&self.pool)
                .await
                .context("Failed to load recipe tags")?;

        let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
        for (recipe_id, tag) in tag_rows {
            tags.entry(recipe_id).or_default().push(tag);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                Recipe::new(row.id, &row.title)
                    .with_description(&row.description)
                    .with_tags(tags.remove(&row.id).unwrap_or_default())
            })
            .collect())
    }
}

#[async_trait]
impl PantryStore for PgStore {
    async fn pantry_entries(&self, user_id: i64) -> Result<Vec<PantryEntry>> {
        debug!("Loading pantry for user_id: {}", user_id);

        let rows: Vec<PantryRow> = sqlx::query_as(&format!(
            "SELECT {PANTRY_COLUMNS} FROM pantry_items WHERE user_id = $1 ORDER BY item_name, unit, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pantry items")?;

        rows.into_iter().map(PantryRow::into_entry).collect()
    }

    async fn insert_pantry_entry(
        &self,
        user_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<PantryEntry> {
        info!("Creating pantry item '{}' for user_id: {}", key, user_id);

        let row: PantryRow = sqlx::query_as(&format!(
            "INSERT INTO pantry_items (user_id, item_name, quantity, unit, expires_on)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {PANTRY_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&key.name)
        .bind(quantity)
        .bind(key.unit.as_deref())
        .bind(expires_on)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert pantry item")?;

        row.into_entry()
    }

    async fn add_to_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        delta: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<Option<PantryEntry>> {
        debug!("Adding {} to pantry item {} for user_id: {}", delta, entry_id, user_id);

        // LEAST ignores NULLs, so an undated side never wins
        let row: Option<PantryRow> = sqlx::query_as(&format!(
            "UPDATE pantry_items
             SET quantity = quantity + $3,
                 expires_on = LEAST(expires_on, $4::date)
             WHERE id = $1 AND user_id = $2
             RETURNING {PANTRY_COLUMNS}"
        ))
        .bind(entry_id)
        .bind(user_id)
        .bind(delta)
        .bind(expires_on)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to merge into pantry item")?;

        row.map(PantryRow::into_entry).transpose()
    }

    async fn update_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> Result<Option<PantryEntry>> {
        info!("Updating pantry item {} for user_id: {}", entry_id, user_id);

        let row: Option<PantryRow> = sqlx::query_as(&format!(
            "UPDATE pantry_items
             SET item_name = $3, unit = $4, quantity = $5, expires_on = $6
             WHERE id = $1 AND user_id = $2
             RETURNING {PANTRY_COLUMNS}"
        ))
        .bind(entry_id)
        .bind(user_id)
        .bind(&key.name)
        .bind(key.unit.as_deref())
        .bind(quantity)
        .bind(expires_on)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update pantry item")?;

        row.map(PantryRow::into_entry).transpose()
    }

    async fn delete_pantry_entry(&self, user_id: i64, entry_id: i64) -> Result<bool> {
        info!("Deleting pantry item {} for user_id: {}", entry_id, user_id);

        let result = sqlx::query("DELETE FROM pantry_items WHERE id = $1 AND user_id = $2")
            .bind(entry_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete pantry item")?;

        Ok(result.rows_affected() > 0)
    }

    async fn recipe(&self, recipe_id: i64) -> Result<Option<Recipe>> {
        let row: Option<RecipeRow> = sqlx::query_as("SELECT id, title, description FROM recipes WHERE id = $1")
            .bind(recipe_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read recipe")?;

        match row {
            Some(row) => Ok(self.attach_tags(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let rows: Vec<RecipeIngredientRow> = sqlx::query_as(
            "SELECT recipe_id, ingredient_name, amount, unit
             FROM recipe_ingredients WHERE recipe_id = $1 ORDER BY id",
        )
        .bind(recipe_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recipe ingredients")?;

        rows.into_iter()
            .map(|row| {
                let key = IngredientKey::normalize(&row.ingredient_name, row.unit.as_deref())
                    .with_context(|| format!("Corrupt ingredient row for recipe {}", row.recipe_id))?;
                Ok(RecipeIngredient {
                    recipe_id: row.recipe_id,
                    key,
                    amount: row.amount,
                })
            })
            .collect()
    }

    async fn recent_recipes(&self, limit: usize) -> Result<Vec<Recipe>> {
        let rows: Vec<RecipeRow> =
            sqlx::query_as("SELECT id, title, description FROM recipes ORDER BY id DESC LIMIT $1")
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .context("Failed to list recipes")?;

        self.attach_tags(rows).await
    }

    async fn search_recipes(&self, query: &RecipeQuery) -> Result<Vec<Recipe>> {
        let pattern = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| format!("%{}%", escape_like(t)));
        let tag = query
            .tag
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        let rows: Vec<RecipeRow> = sqlx::query_as(
            "SELECT DISTINCT r.id, r.title, r.description
             FROM recipes r
             LEFT JOIN recipe_tags rt ON rt.recipe_id = r.id
             LEFT JOIN recipe_ingredients ri ON ri.recipe_id = r.id
             WHERE ($1::text IS NULL
                    OR r.title ILIKE $1 OR ri.ingredient_name ILIKE $1 OR rt.tag ILIKE $1)
               AND ($2::text IS NULL
                    OR EXISTS (SELECT 1 FROM recipe_tags t WHERE t.recipe_id = r.id AND t.tag = $2))
             ORDER BY r.title ASC, r.id ASC",
        )
        .bind(pattern)
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .context("Failed to search recipes")?;

        self.attach_tags(rows).await
    }

    async fn create_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        info!("Creating recipe '{}' for user_id: {}", recipe.title, recipe.created_by);

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let row: RecipeRow = sqlx::query_as(
            "INSERT INTO recipes (title, description, steps_md, created_by)
             VALUES ($1, $2, $3, $4)
             RETURNING id, title, description",
        )
        .bind(&recipe.title)
        .bind(&recipe.description)
        .bind(&recipe.steps_md)
        .bind(recipe.created_by)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert recipe")?;

        for (key, amount) in &recipe.ingredients {
            sqlx::query(
                "INSERT INTO recipe_ingredients (recipe_id, ingredient_name, amount, unit)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(row.id)
            .bind(&key.name)
            .bind(*amount)
            .bind(key.unit.as_deref())
            .execute(&mut *tx)
            .await
            .context("Failed to insert recipe ingredient")?;
        }

        for tag in &recipe.tags {
            sqlx::query("INSERT INTO recipe_tags (recipe_id, tag) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(row.id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .context("Failed to insert recipe tag")?;
        }

        tx.commit().await.context("Failed to commit recipe")?;

        info!("Recipe created with ID: {}", row.id);
        Ok(Recipe::new(row.id, &row.title)
            .with_description(&row.description)
            .with_tags(recipe.tags.clone()))
    }

    async fn shopping_entries(&self, user_id: i64) -> Result<Vec<ShoppingEntry>> {
        let rows: Vec<ShoppingRow> = sqlx::query_as(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list WHERE user_id = $1 ORDER BY done, item_name, unit, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load shopping list")?;

        rows.into_iter().map(ShoppingRow::into_entry).collect()
    }

    async fn shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<ShoppingEntry>> {
        let row: Option<ShoppingRow> = sqlx::query_as(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list WHERE id = $1 AND user_id = $2"
        ))
        .bind(entry_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read shopping entry")?;

        row.map(ShoppingRow::into_entry).transpose()
    }

    async fn merge_undone_shopping(&self, user_id: i64, key: &IngredientKey, amount: Decimal) -> Result<ShoppingEntry> {
        debug!("Merging {} of '{}' into shopping list for user_id: {}", amount, key, user_id);

        let row: ShoppingRow = sqlx::query_as(&format!(
            "INSERT INTO shopping_list (user_id, item_name, quantity, unit, done)
             VALUES ($1, $2, $3, $4, FALSE)
             ON CONFLICT (user_id, item_name, (COALESCE(unit, ''))) WHERE NOT done
             DO UPDATE SET quantity = shopping_list.quantity + EXCLUDED.quantity
             RETURNING {SHOPPING_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&key.name)
        .bind(amount)
        .bind(key.unit.as_deref())
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert shopping entry")?;

        row.into_entry()
    }

    async fn set_shopping_done(&self, user_id: i64, entry_id: i64, done: bool) -> Result<Option<ShoppingEntry>> {
        let row: Option<ShoppingRow> = sqlx::query_as(&format!(
            "UPDATE shopping_list SET done = $3 WHERE id = $1 AND user_id = $2 RETURNING {SHOPPING_COLUMNS}"
        ))
        .bind(entry_id)
        .bind(user_id)
        .bind(done)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update shopping entry state")?;

        row.map(ShoppingRow::into_entry).transpose()
    }

    async fn set_shopping_quantity(&self, user_id: i64, entry_id: i64, quantity: Decimal) -> Result<Option<ShoppingEntry>> {
        let row: Option<ShoppingRow> = sqlx::query_as(&format!(
            "UPDATE shopping_list SET quantity = $3 WHERE id = $1 AND user_id = $2 RETURNING {SHOPPING_COLUMNS}"
        ))
        .bind(entry_id)
        .bind(user_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update shopping quantity")?;

        row.map(ShoppingRow::into_entry).transpose()
    }

    async fn delete_shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shopping_list WHERE id = $1 AND user_id = $2")
            .bind(entry_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete shopping entry")?;

        Ok(result.rows_affected() > 0)
    }

    async fn reopen_shopping_entry(&self, user_id: i64, entry_id: i64) -> Result<Option<ShoppingEntry>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to take user lock")?;

        let item: Option<ShoppingRow> = sqlx::query_as(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list WHERE id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(entry_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock shopping entry")?;

        let Some(item) = item else {
            return Ok(None);
        };
        let item = item.into_entry()?;

        let twin: Option<ShoppingRow> = sqlx::query_as(&format!(
            "UPDATE shopping_list SET quantity = quantity + $5
             WHERE user_id = $1 AND item_name = $2 AND unit IS NOT DISTINCT FROM $3 AND NOT done AND id <> $4
             RETURNING {SHOPPING_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&item.key.name)
        .bind(item.key.unit.as_deref())
        .bind(entry_id)
        .bind(item.quantity)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to merge into open shopping entry")?;

        let row: ShoppingRow = match twin {
            Some(twin) => {
                sqlx::query("DELETE FROM shopping_list WHERE id = $1 AND user_id = $2")
                    .bind(entry_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to delete merged shopping entry")?;
                twin
            }
            None => sqlx::query_as(&format!(
                "UPDATE shopping_list SET done = FALSE WHERE id = $1 AND user_id = $2 RETURNING {SHOPPING_COLUMNS}"
            ))
            .bind(entry_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to re-open shopping entry")?,
        };

        tx.commit().await.context("Failed to commit re-open")?;

        debug!("Re-opened shopping entry {} as {} for user_id: {}", entry_id, row.id, user_id);
        row.into_entry().map(Some)
    }

    async fn transfer_shopping_entry(&self, user_id: i64, entry_id: i64, require_done: bool) -> Result<TransferOutcome> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        // Serializes pantry merges for this user across connections
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to take user lock")?;

        let item: Option<ShoppingRow> = sqlx::query_as(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list WHERE id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(entry_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock shopping entry")?;

        let Some(item) = item else {
            return Ok(TransferOutcome::Missing);
        };
        if require_done && !item.done {
            return Ok(TransferOutcome::NotDone);
        }
        let item = item.into_entry()?;

        let merged = merge_into_pantry(&mut tx, user_id, &item.key, item.quantity).await?;

        sqlx::query("DELETE FROM shopping_list WHERE id = $1 AND user_id = $2")
            .bind(entry_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete transferred shopping entry")?;

        tx.commit().await.context("Failed to commit transfer")?;

        info!("Moved shopping entry {} into pantry item {} for user_id: {}", entry_id, merged.id, user_id);
        Ok(TransferOutcome::Transferred(merged))
    }
}

async fn merge_into_pantry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    key: &IngredientKey,
    quantity: Decimal,
) -> Result<PantryEntry> {
    let target: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM pantry_items
         WHERE user_id = $1 AND item_name = $2 AND unit IS NOT DISTINCT FROM $3
         ORDER BY expires_on IS NULL, expires_on ASC, id ASC
         LIMIT 1
         FOR UPDATE",
    )
    .bind(user_id)
    .bind(&key.name)
    .bind(key.unit.as_deref())
    .fetch_optional(&mut **tx)
    .await
    .context("Failed to find pantry merge target")?;

    let row: PantryRow = match target {
        Some((target_id,)) => sqlx::query_as(&format!(
            "UPDATE pantry_items SET quantity = quantity + $2 WHERE id = $1 RETURNING {PANTRY_COLUMNS}"
        ))
        .bind(target_id)
        .bind(quantity)
        .fetch_one(&mut **tx)
        .await
        .context("Failed to merge into pantry item")?,
        None => sqlx::query_as(&format!(
            "INSERT INTO pantry_items (user_id, item_name, quantity, unit, expires_on)
             VALUES ($1, $2, $3, $4, NULL)
             RETURNING {PANTRY_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&key.name)
        .bind(quantity)
        .bind(key.unit.as_deref())
        .fetch_one(&mut **tx)
        .await
        .context("Failed to insert pantry item")?,
    };

    row.into_entry()
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

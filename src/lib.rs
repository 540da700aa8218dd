//! # Pantrywise
//!
//! Household pantry and recipe core: tracks owned ingredients, matches
//! recipes against them, keeps a per-user shopping list in sync with the
//! pantry and picks a greedy weekly meal plan.

pub mod config;
pub mod db;
pub mod errors;
pub mod ingredient_key;
pub mod matching;
pub mod meal_plan;
pub mod memory_store;
pub mod models;
pub mod pantry;
pub mod recipe_import;
pub mod service;
pub mod shopping;
pub mod store;
pub mod user_locks;

pub use errors::{PantryError, Result};
pub use ingredient_key::IngredientKey;
pub use service::PantryService;

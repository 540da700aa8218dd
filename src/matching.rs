//! # Recipe Matching
//!
//! Compares a recipe's required ingredients with a user's aggregated pantry
//! and ranks recipe lists by how much of each the pantry already covers.
//!
//! Stock is looked up with [`IngredientKey::accepts`]: a unitless
//! requirement takes any unit at face value, a unit requirement needs the
//! same unit. Cross-unit stock (grams against cups) counts as absent.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use tracing::debug;

use crate::ingredient_key::IngredientKey;
use crate::models::{HaveIngredient, MatchResult, MissingIngredient, Recipe, RecipeIngredient};
use crate::pantry::PantryTotals;

/// Match one recipe against a pantry.
///
/// Repeated rows for the same key are folded into one requirement, so the
/// percentage is over distinct ingredients. A recipe without ingredients
/// matches at 0%.
pub fn match_recipe(recipe: &Recipe, ingredients: &[RecipeIngredient], pantry: &PantryTotals) -> MatchResult {
    let mut have = Vec::new();
    let mut missing = Vec::new();

    for (key, needed) in fold_requirements(ingredients) {
        let available = pantry.available_for(&key);
        let short = (needed - available).max(Decimal::ZERO);

        if short == Decimal::ZERO {
            have.push(HaveIngredient {
                key,
                needed,
                available,
            });
        } else {
            missing.push(MissingIngredient {
                key,
                needed,
                available,
                missing_amount: short,
            });
        }
    }

    let match_pct = match_percentage(have.len(), have.len() + missing.len());
    debug!(
        recipe_id = recipe.id,
        have = have.len(),
        missing = missing.len(),
        match_pct,
        "Matched recipe against pantry"
    );

    MatchResult {
        recipe_id: recipe.id,
        title: recipe.title.clone(),
        have,
        missing,
        match_pct,
    }
}

/// `100 * have / total` rounded to two decimals, 0 for an empty recipe
pub fn match_percentage(have_count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = 100.0 * have_count as f64 / total as f64;
    (pct * 100.0).round() / 100.0
}

/// Sort by match percentage descending, then title, then recipe id.
pub fn rank_by_match(mut results: Vec<MatchResult>) -> Vec<MatchResult> {
    results.sort_by(compare_by_match);
    results
}

fn compare_by_match(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.match_pct
        .total_cmp(&a.match_pct)
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.recipe_id.cmp(&b.recipe_id))
}

// Sums duplicate keys, keeping first-seen order.
fn fold_requirements(ingredients: &[RecipeIngredient]) -> Vec<(IngredientKey, Decimal)> {
    let mut folded: Vec<(IngredientKey, Decimal)> = Vec::with_capacity(ingredients.len());
    for ingredient in ingredients {
        match folded.iter_mut().find(|(key, _)| key == &ingredient.key) {
            Some((_, amount)) => *amount += ingredient.amount,
            None => folded.push((ingredient.key.clone(), ingredient.amount)),
        }
    }
    folded
}

//! # Weekly Meal Plan
//!
//! Greedy recipe selection for a week of cooking. Recipes are ordered by
//! fewest missing ingredients, then by how much soon-to-expire stock they
//! use up, then by title. The top `limit` are taken as-is: there is no
//! backtracking and no attempt at a globally optimal plan.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::DEFAULT_EXPIRY_WINDOW_DAYS;
use crate::ingredient_key::IngredientKey;
use crate::models::MatchResult;

/// A recipe with the keys it was ranked by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCandidate {
    pub recipe_id: i64,
    pub title: String,
    pub missing_count: usize,
    pub expiry_bonus: i64,
}

/// Pick up to `limit` recipe ids for the week using the default 5-day
/// expiry window.
///
/// `expiry_weights` maps pantry keys to days until their soonest expiry.
pub fn select_weekly_plan(
    candidates: &[MatchResult],
    limit: usize,
    expiry_weights: &HashMap<IngredientKey, i64>,
) -> Vec<i64> {
    rank_for_plan(candidates, expiry_weights, DEFAULT_EXPIRY_WINDOW_DAYS)
        .into_iter()
        .take(limit)
        .map(|c| c.recipe_id)
        .collect()
}

/// Rank every candidate for planning.
///
/// Only ingredients in the "have" set earn an expiry bonus of
/// `window_days - days_until_expiry` each; stock that is already expired or
/// outside the window earns nothing.
pub fn rank_for_plan(
    candidates: &[MatchResult],
    expiry_weights: &HashMap<IngredientKey, i64>,
    window_days: i64,
) -> Vec<PlanCandidate> {
    let mut ranked: Vec<PlanCandidate> = candidates
        .iter()
        .map(|candidate| PlanCandidate {
            recipe_id: candidate.recipe_id,
            title: candidate.title.clone(),
            missing_count: candidate.missing_count(),
            expiry_bonus: expiry_bonus(candidate, expiry_weights, window_days),
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.missing_count
            .cmp(&b.missing_count)
            .then_with(|| b.expiry_bonus.cmp(&a.expiry_bonus))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.recipe_id.cmp(&b.recipe_id))
    });
    ranked
}

fn expiry_bonus(candidate: &MatchResult, expiry_weights: &HashMap<IngredientKey, i64>, window_days: i64) -> i64 {
    candidate
        .have
        .iter()
        .filter_map(|have| soonest_expiry(&have.key, expiry_weights))
        .filter(|days| *days >= 0)
        .map(|days| (window_days - days).max(0))
        .sum()
}

// Same join rule as matching: a unitless requirement draws on every unit.
// Expired stock never hides a fresher batch of the same ingredient.
fn soonest_expiry(key: &IngredientKey, expiry_weights: &HashMap<IngredientKey, i64>) -> Option<i64> {
    if key.is_unitless() {
        expiry_weights
            .iter()
            .filter(|(stock, _)| key.accepts(stock))
            .map(|(_, days)| *days)
            .filter(|days| *days >= 0)
            .min()
    } else {
        expiry_weights.get(key).copied().filter(|days| *days >= 0)
    }
}

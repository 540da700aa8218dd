//! # Pantry Aggregation
//!
//! Collapses a user's raw pantry rows into per-key totals, and provides the
//! expiry helpers shared by the home view, the meal planner and the pantry
//! merge logic.
//!
//! Aggregation is total: bad rows are excluded and reported as
//! [`DataIntegrityWarning`]s instead of failing the whole computation.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::ingredient_key::IngredientKey;
use crate::models::PantryEntry;

/// Kind of anomaly found while aggregating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// Quantity below zero; upstream should never store one
    NegativeQuantity,
    /// Row handed in for a user that does not own it
    ForeignOwner,
}

/// A row excluded from aggregation because it breaks a data invariant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIntegrityWarning {
    pub entry_id: i64,
    pub user_id: i64,
    pub key: IngredientKey,
    pub quantity: Decimal,
    pub kind: AnomalyKind,
}

/// Per-key pantry totals for one user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PantryTotals {
    pub totals: HashMap<IngredientKey, Decimal>,
    pub warnings: Vec<DataIntegrityWarning>,
}

impl PantryTotals {
    /// Total stock for exactly this key, zero if absent
    pub fn get(&self, key: &IngredientKey) -> Decimal {
        self.totals.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    /// Stock usable for a recipe requirement under the unit-aware join rule:
    /// exact key for a unit requirement, every unit of the same name for a
    /// unitless one.
    pub fn available_for(&self, requirement: &IngredientKey) -> Decimal {
        if requirement.is_unitless() {
            self.totals
                .iter()
                .filter(|(key, _)| requirement.accepts(key))
                .map(|(_, qty)| *qty)
                .sum()
        } else {
            self.get(requirement)
        }
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// Sum pantry quantities per ingredient key for `user_id`.
///
/// Zero quantities are dropped quietly. Negative quantities and rows owned by
/// another user are dropped, logged at warn level and returned as warnings.
pub fn aggregate(user_id: i64, entries: &[PantryEntry]) -> PantryTotals {
    let mut result = PantryTotals::default();

    for entry in entries {
        let anomaly = if entry.user_id != user_id {
            Some(AnomalyKind::ForeignOwner)
        } else if entry.quantity < Decimal::ZERO {
            Some(AnomalyKind::NegativeQuantity)
        } else {
            None
        };

        if let Some(kind) = anomaly {
            warn!(
                user_id,
                entry_id = entry.id,
                owner_id = entry.user_id,
                quantity = %entry.quantity,
                ?kind,
                "Excluding pantry row from aggregation"
            );
            result.warnings.push(DataIntegrityWarning {
                entry_id: entry.id,
                user_id: entry.user_id,
                key: entry.key.clone(),
                quantity: entry.quantity,
                kind,
            });
            continue;
        }

        if entry.quantity == Decimal::ZERO {
            continue;
        }

        *result
            .totals
            .entry(entry.key.clone())
            .or_insert(Decimal::ZERO) += entry.quantity;
    }

    result
}

/// Stocked entries expiring between `today` and `today + window_days`
/// inclusive, soonest first.
pub fn expiring_within(entries: &[PantryEntry], today: NaiveDate, window_days: i64) -> Vec<PantryEntry> {
    let mut expiring: Vec<PantryEntry> = entries
        .iter()
        .filter(|e| e.quantity > Decimal::ZERO)
        .filter(|e| matches!(e.days_until_expiry(today), Some(days) if (0..=window_days).contains(&days)))
        .cloned()
        .collect();

    expiring.sort_by(|a, b| {
        a.expires_on
            .cmp(&b.expires_on)
            .then_with(|| a.key.cmp(&b.key))
            .then_with(|| a.id.cmp(&b.id))
    });
    expiring
}

/// Soonest days-until-expiry per key over stocked, dated entries.
///
/// Expired batches are left out, so a key with one expired and one fresh
/// batch reports the fresh one.
pub fn days_until_expiry_by_key(entries: &[PantryEntry], today: NaiveDate) -> HashMap<IngredientKey, i64> {
    let mut days_by_key: HashMap<IngredientKey, i64> = HashMap::new();

    for entry in entries.iter().filter(|e| e.quantity > Decimal::ZERO) {
        if let Some(days) = entry.days_until_expiry(today).filter(|d| *d >= 0) {
            days_by_key
                .entry(entry.key.clone())
                .and_modify(|d| *d = (*d).min(days))
                .or_insert(days);
        }
    }

    days_by_key
}

/// Pick the pantry row that new stock for `key` merges into: the one with
/// the soonest expiry, undated rows last, lowest id on ties.
pub fn choose_merge_target<'a>(entries: &'a [PantryEntry], key: &IngredientKey) -> Option<&'a PantryEntry> {
    entries
        .iter()
        .filter(|e| &e.key == key)
        .min_by_key(|e| (e.expires_on.is_none(), e.expires_on, e.id))
}

/// Expiry kept after merging: the earliest known date
pub fn earliest_expiry(current: Option<NaiveDate>, incoming: Option<NaiveDate>) -> Option<NaiveDate> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

//! # Shopping List Reconciler
//!
//! Keeps a user's shopping list consistent with their pantry:
//!
//! - missing recipe ingredients merge into the existing undone row for the
//!   same key instead of creating duplicates
//! - purchased (done) rows move into the pantry, merging with existing stock
//! - batch transfers report skipped rows as data, never as an error
//!
//! All read-modify-write sequences for one user run under that user's lock
//! from [`UserLocks`]; the storage upsert is itself atomic as well.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{PantryError, Result};
use crate::ingredient_key::IngredientKey;
use crate::models::{ensure_storable_quantity, PantryEntry, ShoppingEntry};
use crate::store::{PantryStore, TransferOutcome};
use crate::user_locks::UserLocks;

/// Why a row in a transfer batch was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Not marked as purchased
    NotDone,
    /// No such row for this user
    NotFound,
    /// Storage failed before this row could be applied
    Interrupted,
}

/// A shopping row that made it into the pantry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferredEntry {
    pub shopping_id: i64,
    pub pantry_entry: PantryEntry,
}

/// A shopping row left untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub entry_id: i64,
    pub reason: SkipReason,
}

/// Per-item outcome of a transfer batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferReport {
    pub transferred: Vec<TransferredEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl TransferReport {
    /// True when nothing was skipped
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn transferred_ids(&self) -> Vec<i64> {
        self.transferred.iter().map(|t| t.shopping_id).collect()
    }

    pub fn skipped_ids(&self) -> Vec<i64> {
        self.skipped.iter().map(|s| s.entry_id).collect()
    }
}

/// Shopping list operations over a storage collaborator
#[derive(Clone)]
pub struct ShoppingReconciler {
    store: Arc<dyn PantryStore>,
    locks: Arc<UserLocks>,
}

impl ShoppingReconciler {
    pub fn new(store: Arc<dyn PantryStore>, locks: Arc<UserLocks>) -> Self {
        Self { store, locks }
    }

    /// The user's list, open rows first
    pub async fn entries(&self, user_id: i64) -> Result<Vec<ShoppingEntry>> {
        Ok(self.store.shopping_entries(user_id).await?)
    }

    /// Push missing ingredients onto the user's shopping list.
    ///
    /// Each key merges into the user's undone row for that key, or creates
    /// one. Repeated keys in `missing` are summed first. Returns the rows as
    /// they stand afterwards, in first-seen key order.
    pub async fn add_missing(&self, user_id: i64, missing: &[(IngredientKey, Decimal)]) -> Result<Vec<ShoppingEntry>> {
        let mut folded: Vec<(IngredientKey, Decimal)> = Vec::with_capacity(missing.len());
        for (key, amount) in missing {
            ensure_positive(key, *amount)?;
            match folded.iter_mut().find(|(k, _)| k == key) {
                Some((_, total)) => *total += *amount,
                None => folded.push((key.clone(), *amount)),
            }
        }

        let _guard = self.locks.lock(user_id).await;

        let mut rows = Vec::with_capacity(folded.len());
        for (key, amount) in &folded {
            let row = self.store.merge_undone_shopping(user_id, key, *amount).await?;
            debug!(user_id, entry_id = row.id, %key, %amount, "Merged missing ingredient into shopping list");
            rows.push(row);
        }

        info!(user_id, count = rows.len(), "Added missing ingredients to shopping list");
        Ok(rows)
    }

    /// Manually add an item; merges like [`add_missing`](Self::add_missing).
    pub async fn add_item(&self, user_id: i64, name: &str, unit: Option<&str>, quantity: Decimal) -> Result<ShoppingEntry> {
        let key = IngredientKey::normalize(name, unit)?;
        let mut rows = self.add_missing(user_id, &[(key, quantity)]).await?;
        rows.pop()
            .ok_or_else(|| PantryError::Storage(anyhow::anyhow!("Shopping upsert returned no row")))
    }

    /// Flip the purchased flag of a row.
    ///
    /// Re-opening a row when another undone row for the same key exists folds
    /// its quantity into that row and deletes it, so there is still only one
    /// undone row per key; the surviving row is returned.
    pub async fn toggle_done(&self, user_id: i64, entry_id: i64) -> Result<ShoppingEntry> {
        let _guard = self.locks.lock(user_id).await;

        let entry = self
            .store
            .shopping_entry(user_id, entry_id)
            .await?
            .ok_or_else(|| PantryError::not_found("shopping entry", entry_id, user_id))?;

        if !entry.done {
            return self
                .store
                .set_shopping_done(user_id, entry_id, true)
                .await?
                .ok_or_else(|| PantryError::not_found("shopping entry", entry_id, user_id));
        }

        let reopened = self
            .store
            .reopen_shopping_entry(user_id, entry_id)
            .await?
            .ok_or_else(|| PantryError::not_found("shopping entry", entry_id, user_id))?;
        if reopened.id != entry_id {
            info!(user_id, entry_id, merged_into = reopened.id, "Re-opened shopping entry merged into open row");
        }
        Ok(reopened)
    }

    /// Change the quantity of a row; must stay positive.
    pub async fn set_quantity(&self, user_id: i64, entry_id: i64, quantity: Decimal) -> Result<ShoppingEntry> {
        if quantity <= Decimal::ZERO {
            return Err(PantryError::InvalidIngredient(format!(
                "shopping quantity must be positive, got {quantity}"
            )));
        }
        ensure_storable_quantity("shopping quantity", quantity)?;
        let _guard = self.locks.lock(user_id).await;
        self.store
            .set_shopping_quantity(user_id, entry_id, quantity)
            .await?
            .ok_or_else(|| PantryError::not_found("shopping entry", entry_id, user_id))
    }

    pub async fn delete_item(&self, user_id: i64, entry_id: i64) -> Result<()> {
        let _guard = self.locks.lock(user_id).await;
        if self.store.delete_shopping_entry(user_id, entry_id).await? {
            Ok(())
        } else {
            Err(PantryError::not_found("shopping entry", entry_id, user_id))
        }
    }

    /// Move the selected purchased rows into the pantry.
    ///
    /// Rows that are not done or not found are skipped and listed in the
    /// report. A storage failure stops the batch with
    /// [`PantryError::TransferInterrupted`], which carries the rows already
    /// applied and marks the rest as interrupted.
    pub async fn transfer_to_pantry(&self, user_id: i64, entry_ids: &[i64]) -> Result<TransferReport> {
        let _guard = self.locks.lock(user_id).await;
        self.transfer_locked(user_id, entry_ids).await
    }

    /// Move every purchased row of the user into the pantry.
    pub async fn transfer_all_done(&self, user_id: i64) -> Result<TransferReport> {
        let _guard = self.locks.lock(user_id).await;
        let done_ids: Vec<i64> = self
            .store
            .shopping_entries(user_id)
            .await?
            .into_iter()
            .filter(|e| e.done)
            .map(|e| e.id)
            .collect();
        self.transfer_locked(user_id, &done_ids).await
    }

    /// Move one row into the pantry right away, purchased or not.
    pub async fn transfer_now(&self, user_id: i64, entry_id: i64) -> Result<PantryEntry> {
        let _guard = self.locks.lock(user_id).await;
        match self.store.transfer_shopping_entry(user_id, entry_id, false).await? {
            TransferOutcome::Transferred(pantry_entry) => {
                info!(user_id, entry_id, pantry_id = pantry_entry.id, "Moved shopping entry to pantry");
                Ok(pantry_entry)
            }
            TransferOutcome::Missing | TransferOutcome::NotDone => {
                Err(PantryError::not_found("shopping entry", entry_id, user_id))
            }
        }
    }

    async fn transfer_locked(&self, user_id: i64, entry_ids: &[i64]) -> Result<TransferReport> {
        let mut report = TransferReport::default();
        let mut seen = Vec::with_capacity(entry_ids.len());

        for (position, &entry_id) in entry_ids.iter().enumerate() {
            if seen.contains(&entry_id) {
                continue;
            }
            seen.push(entry_id);

            match self.store.transfer_shopping_entry(user_id, entry_id, true).await {
                Ok(TransferOutcome::Transferred(pantry_entry)) => {
                    report.transferred.push(TransferredEntry {
                        shopping_id: entry_id,
                        pantry_entry,
                    });
                }
                Ok(TransferOutcome::NotDone) => report.skipped.push(SkippedEntry {
                    entry_id,
                    reason: SkipReason::NotDone,
                }),
                Ok(TransferOutcome::Missing) => report.skipped.push(SkippedEntry {
                    entry_id,
                    reason: SkipReason::NotFound,
                }),
                Err(source) => {
                    report.skipped.push(SkippedEntry {
                        entry_id,
                        reason: SkipReason::Interrupted,
                    });
                    for &pending in &entry_ids[position + 1..] {
                        if !seen.contains(&pending) {
                            seen.push(pending);
                            report.skipped.push(SkippedEntry {
                                entry_id: pending,
                                reason: SkipReason::Interrupted,
                            });
                        }
                    }
                    warn!(
                        user_id,
                        applied = report.transferred.len(),
                        error = %source,
                        "Transfer to pantry interrupted"
                    );
                    return Err(PantryError::TransferInterrupted {
                        applied: report,
                        source,
                    });
                }
            }
        }

        info!(
            user_id,
            transferred = report.transferred.len(),
            skipped = report.skipped.len(),
            "Transferred shopping entries to pantry"
        );
        Ok(report)
    }
}

fn ensure_positive(key: &IngredientKey, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(PantryError::InvalidIngredient(format!(
            "amount for '{key}' must be positive, got {amount}"
        )));
    }
    ensure_storable_quantity(format_args!("amount for '{key}'"), amount)
}

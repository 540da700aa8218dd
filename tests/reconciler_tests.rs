use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use pantrywise::errors::PantryError;
use pantrywise::ingredient_key::IngredientKey;
use pantrywise::memory_store::MemoryStore;
use pantrywise::models::{PantryEntry, Recipe, RecipeIngredient, ShoppingEntry};
use pantrywise::shopping::{ShoppingReconciler, SkipReason};
use pantrywise::store::{NewRecipe, PantryStore, RecipeQuery, TransferOutcome};
use pantrywise::user_locks::UserLocks;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const USER: i64 = 42;

fn key(name: &str, unit: Option<&str>) -> IngredientKey {
    IngredientKey::normalize(name, unit).unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
}

fn setup() -> (ShoppingReconciler, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let reconciler = ShoppingReconciler::new(store.clone(), Arc::new(UserLocks::new()));
    (reconciler, store)
}

async fn pantry_total(store: &MemoryStore, user_id: i64, key: &IngredientKey) -> Decimal {
    store
        .pantry_entries(user_id)
        .await
        .unwrap()
        .iter()
        .filter(|e| &e.key == key)
        .map(|e| e.quantity)
        .sum()
}

#[tokio::test]
async fn test_add_missing_twice_merges_into_one_row() {
    let (reconciler, store) = setup();
    let garlic = key("Garlic", Some("clove"));

    reconciler.add_missing(USER, &[(garlic.clone(), Decimal::from(2))]).await.unwrap();
    reconciler.add_missing(USER, &[(garlic.clone(), Decimal::from(2))]).await.unwrap();

    let entries = store.shopping_entries(USER).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, garlic);
    assert_eq!(entries[0].quantity, Decimal::from(4));
    assert!(!entries[0].done);
}

#[tokio::test]
async fn test_add_missing_folds_repeated_keys() {
    let (reconciler, store) = setup();
    let rows = reconciler
        .add_missing(
            USER,
            &[
                (key("egg", None), Decimal::from(2)),
                (key("flour", Some("g")), Decimal::from(100)),
                (key("Egg", Some("")), Decimal::from(1)),
            ],
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].quantity, Decimal::from(3));
    assert_eq!(store.shopping_entries(USER).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_add_missing_keeps_one_open_row() {
    let (reconciler, store) = setup();
    let garlic = key("garlic", Some("clove"));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = reconciler.clone();
        let garlic = garlic.clone();
        handles.push(tokio::spawn(async move {
            reconciler.add_missing(USER, &[(garlic, Decimal::ONE)]).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entries = store.shopping_entries(USER).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].quantity, Decimal::from(8));
}

#[tokio::test]
async fn test_add_missing_rejects_non_positive_amounts() {
    let (reconciler, store) = setup();
    let result = reconciler.add_missing(USER, &[(key("salt", None), Decimal::ZERO)]).await;

    assert!(matches!(result, Err(PantryError::InvalidIngredient(_))));
    assert!(store.shopping_entries(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_amounts_beyond_storage_scale_are_invalid() {
    let (reconciler, store) = setup();
    let result = reconciler.add_missing(USER, &[(key("saffron", Some("g")), Decimal::new(4, 4))]).await;
    assert!(matches!(result, Err(PantryError::InvalidIngredient(_))));
    assert!(store.shopping_entries(USER).await.unwrap().is_empty());

    let entry = reconciler.add_item(USER, "saffron", Some("g"), Decimal::new(1, 3)).await.unwrap();
    assert!(matches!(
        reconciler.set_quantity(USER, entry.id, Decimal::new(12345, 4)).await,
        Err(PantryError::InvalidIngredient(_))
    ));
    assert_eq!(store.shopping_entry(USER, entry.id).await.unwrap().unwrap().quantity, Decimal::new(1, 3));
}

#[tokio::test]
async fn test_users_do_not_share_rows() {
    let (reconciler, store) = setup();
    reconciler.add_item(USER, "Milk", Some("l"), Decimal::ONE).await.unwrap();
    reconciler.add_item(7, "Milk", Some("l"), Decimal::ONE).await.unwrap();

    assert_eq!(store.shopping_entries(USER).await.unwrap().len(), 1);
    assert_eq!(store.shopping_entries(7).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_toggle_done_requires_ownership() {
    let (reconciler, _store) = setup();
    let entry = reconciler.add_item(USER, "milk", None, Decimal::ONE).await.unwrap();

    let err = reconciler.toggle_done(7, entry.id).await.unwrap_err();
    assert!(matches!(err, PantryError::NotFound(_)));

    let toggled = reconciler.toggle_done(USER, entry.id).await.unwrap();
    assert!(toggled.done);
    let toggled = reconciler.toggle_done(USER, entry.id).await.unwrap();
    assert!(!toggled.done);
}

#[tokio::test]
async fn test_reopening_merges_into_open_twin() {
    let (reconciler, store) = setup();
    let first = reconciler.add_item(USER, "garlic", Some("clove"), Decimal::from(2)).await.unwrap();
    reconciler.toggle_done(USER, first.id).await.unwrap();

    let second = reconciler.add_item(USER, "garlic", Some("clove"), Decimal::from(3)).await.unwrap();
    assert_ne!(first.id, second.id);

    let merged = reconciler.toggle_done(USER, first.id).await.unwrap();
    assert_eq!(merged.id, second.id);
    assert_eq!(merged.quantity, Decimal::from(5));

    let entries = store.shopping_entries(USER).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].done);
}

#[tokio::test]
async fn test_set_quantity_and_delete() {
    let (reconciler, store) = setup();
    let entry = reconciler.add_item(USER, "rice", Some("g"), Decimal::from(500)).await.unwrap();

    assert!(reconciler.set_quantity(USER, entry.id, Decimal::ZERO).await.is_err());
    let updated = reconciler.set_quantity(USER, entry.id, Decimal::from(250)).await.unwrap();
    assert_eq!(updated.quantity, Decimal::from(250));

    assert!(matches!(
        reconciler.delete_item(7, entry.id).await,
        Err(PantryError::NotFound(_))
    ));
    reconciler.delete_item(USER, entry.id).await.unwrap();
    assert!(store.shopping_entries(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transfer_conserves_quantity() {
    let (reconciler, store) = setup();
    let garlic = key("garlic", Some("clove"));
    store
        .insert_pantry_entry(USER, &garlic, Decimal::ONE, Some(date(20)))
        .await
        .unwrap();

    let entry = reconciler.add_item(USER, "Garlic", Some("Clove"), Decimal::from(2)).await.unwrap();
    reconciler.toggle_done(USER, entry.id).await.unwrap();

    let before = pantry_total(&store, USER, &garlic).await;
    let report = reconciler.transfer_to_pantry(USER, &[entry.id]).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.transferred_ids(), vec![entry.id]);
    assert_eq!(pantry_total(&store, USER, &garlic).await, before + Decimal::from(2));
    assert_eq!(store.pantry_entries(USER).await.unwrap().len(), 1);
    assert!(store.shopping_entry(USER, entry.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transfer_merges_into_soonest_expiry() {
    let (reconciler, store) = setup();
    let milk = key("milk", Some("l"));
    let later = store.insert_pantry_entry(USER, &milk, Decimal::ONE, Some(date(20))).await.unwrap();
    let sooner = store.insert_pantry_entry(USER, &milk, Decimal::ONE, Some(date(10))).await.unwrap();
    store.insert_pantry_entry(USER, &milk, Decimal::ONE, None).await.unwrap();

    let entry = reconciler.add_item(USER, "milk", Some("l"), Decimal::from(2)).await.unwrap();
    let pantry_entry = reconciler.transfer_now(USER, entry.id).await.unwrap();

    assert_eq!(pantry_entry.id, sooner.id);
    assert_eq!(pantry_entry.quantity, Decimal::from(3));
    assert_eq!(pantry_entry.expires_on, Some(date(10)));
    let untouched = store
        .pantry_entries(USER)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.id == later.id)
        .unwrap();
    assert_eq!(untouched.quantity, Decimal::ONE);
}

#[tokio::test]
async fn test_transfer_inserts_when_no_stock() {
    let (reconciler, store) = setup();
    let entry = reconciler.add_item(USER, "basil", None, Decimal::ONE).await.unwrap();
    reconciler.toggle_done(USER, entry.id).await.unwrap();

    let report = reconciler.transfer_all_done(USER).await.unwrap();
    assert_eq!(report.transferred.len(), 1);

    let pantry = store.pantry_entries(USER).await.unwrap();
    assert_eq!(pantry.len(), 1);
    assert_eq!(pantry[0].key, key("basil", None));
    assert_eq!(pantry[0].expires_on, None);
}

#[tokio::test]
async fn test_transfer_reports_skipped_entries() {
    let (reconciler, store) = setup();
    let done = reconciler.add_item(USER, "flour", Some("g"), Decimal::from(500)).await.unwrap();
    reconciler.toggle_done(USER, done.id).await.unwrap();
    let open = reconciler.add_item(USER, "sugar", Some("g"), Decimal::from(200)).await.unwrap();
    let foreign = reconciler.add_item(7, "salt", None, Decimal::ONE).await.unwrap();

    let report = reconciler
        .transfer_to_pantry(USER, &[done.id, open.id, 9999, foreign.id, done.id])
        .await
        .unwrap();

    assert_eq!(report.transferred_ids(), vec![done.id]);
    assert_eq!(report.skipped_ids(), vec![open.id, 9999, foreign.id]);
    assert_eq!(report.skipped[0].reason, SkipReason::NotDone);
    assert_eq!(report.skipped[1].reason, SkipReason::NotFound);
    assert_eq!(report.skipped[2].reason, SkipReason::NotFound);

    // Skipped rows stay where they were
    assert!(store.shopping_entry(USER, open.id).await.unwrap().is_some());
    assert!(store.shopping_entry(7, foreign.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_transfer_all_done_with_nothing_purchased() {
    let (reconciler, _store) = setup();
    reconciler.add_item(USER, "eggs", None, Decimal::from(6)).await.unwrap();

    let report = reconciler.transfer_all_done(USER).await.unwrap();
    assert!(report.transferred.is_empty());
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_transfer_now_ignores_done_flag() {
    let (reconciler, store) = setup();
    let entry = reconciler.add_item(USER, "lemon", None, Decimal::from(2)).await.unwrap();

    let pantry_entry = reconciler.transfer_now(USER, entry.id).await.unwrap();
    assert_eq!(pantry_entry.quantity, Decimal::from(2));
    assert!(store.shopping_entries(USER).await.unwrap().is_empty());

    assert!(matches!(
        reconciler.transfer_now(USER, entry.id).await,
        Err(PantryError::NotFound(_))
    ));
}

/// Delegates to a [`MemoryStore`] but fails transfers and deletes of one
/// entry, and every re-open while `fail_reopen` is set
struct FailingStore {
    inner: MemoryStore,
    fail_on: std::sync::Mutex<Option<i64>>,
    fail_reopen: AtomicBool,
}

impl FailingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on: std::sync::Mutex::new(None),
            fail_reopen: AtomicBool::new(false),
        }
    }

    fn fails_on(&self, entry_id: i64) -> bool {
        *self.fail_on.lock().unwrap() == Some(entry_id)
    }
}

#[async_trait]
impl PantryStore for FailingStore {
    async fn pantry_entries(&self, user_id: i64) -> AnyResult<Vec<PantryEntry>> {
        self.inner.pantry_entries(user_id).await
    }

    async fn insert_pantry_entry(
        &self,
        user_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> AnyResult<PantryEntry> {
        self.inner.insert_pantry_entry(user_id, key, quantity, expires_on).await
    }

    async fn add_to_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        delta: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> AnyResult<Option<PantryEntry>> {
        self.inner.add_to_pantry_entry(user_id, entry_id, delta, expires_on).await
    }

    async fn update_pantry_entry(
        &self,
        user_id: i64,
        entry_id: i64,
        key: &IngredientKey,
        quantity: Decimal,
        expires_on: Option<NaiveDate>,
    ) -> AnyResult<Option<PantryEntry>> {
        self.inner
            .update_pantry_entry(user_id, entry_id, key, quantity, expires_on)
            .await
    }

    async fn delete_pantry_entry(&self, user_id: i64, entry_id: i64) -> AnyResult<bool> {
        self.inner.delete_pantry_entry(user_id, entry_id).await
    }

    async fn recipe(&self, recipe_id: i64) -> AnyResult<Option<Recipe>> {
        self.inner.recipe(recipe_id).await
    }

    async fn recipe_ingredients(&self, recipe_id: i64) -> AnyResult<Vec<RecipeIngredient>> {
        self.inner.recipe_ingredients(recipe_id).await
    }

    async fn recent_recipes(&self, limit: usize) -> AnyResult<Vec<Recipe>> {
        self.inner.recent_recipes(limit).await
    }

    async fn search_recipes(&self, query: &RecipeQuery) -> AnyResult<Vec<Recipe>> {
        self.inner.search_recipes(query).await
    }

    async fn create_recipe(&self, recipe: &NewRecipe) -> AnyResult<Recipe> {
        self.inner.create_recipe(recipe).await
    }

    async fn shopping_entries(&self, user_id: i64) -> AnyResult<Vec<ShoppingEntry>> {
        self.inner.shopping_entries(user_id).await
    }

    async fn shopping_entry(&self, user_id: i64, entry_id: i64) -> AnyResult<Option<ShoppingEntry>> {
        self.inner.shopping_entry(user_id, entry_id).await
    }

    async fn merge_undone_shopping(&self, user_id: i64, key: &IngredientKey, amount: Decimal) -> AnyResult<ShoppingEntry> {
        self.inner.merge_undone_shopping(user_id, key, amount).await
    }

    async fn set_shopping_done(&self, user_id: i64, entry_id: i64, done: bool) -> AnyResult<Option<ShoppingEntry>> {
        self.inner.set_shopping_done(user_id, entry_id, done).await
    }

    async fn set_shopping_quantity(&self, user_id: i64, entry_id: i64, quantity: Decimal) -> AnyResult<Option<ShoppingEntry>> {
        self.inner.set_shopping_quantity(user_id, entry_id, quantity).await
    }

    async fn delete_shopping_entry(&self, user_id: i64, entry_id: i64) -> AnyResult<bool> {
        if self.fails_on(entry_id) {
            anyhow::bail!("connection reset while deleting entry {entry_id}");
        }
        self.inner.delete_shopping_entry(user_id, entry_id).await
    }

    async fn reopen_shopping_entry(&self, user_id: i64, entry_id: i64) -> AnyResult<Option<ShoppingEntry>> {
        if self.fail_reopen.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset while re-opening entry {entry_id}");
        }
        self.inner.reopen_shopping_entry(user_id, entry_id).await
    }

    async fn transfer_shopping_entry(&self, user_id: i64, entry_id: i64, require_done: bool) -> AnyResult<TransferOutcome> {
        if self.fails_on(entry_id) {
            anyhow::bail!("connection reset while moving entry {entry_id}");
        }
        self.inner.transfer_shopping_entry(user_id, entry_id, require_done).await
    }
}

#[tokio::test]
async fn test_storage_failure_interrupts_batch_with_partial_report() {
    let store = Arc::new(FailingStore::new());
    let reconciler = ShoppingReconciler::new(store.clone(), Arc::new(UserLocks::new()));

    let mut ids = Vec::new();
    for name in ["apple", "butter", "cream"] {
        let entry = reconciler.add_item(USER, name, None, Decimal::ONE).await.unwrap();
        reconciler.toggle_done(USER, entry.id).await.unwrap();
        ids.push(entry.id);
    }
    *store.fail_on.lock().unwrap() = Some(ids[1]);

    let err = reconciler.transfer_to_pantry(USER, &ids).await.unwrap_err();
    match err {
        PantryError::TransferInterrupted { applied, source } => {
            assert_eq!(applied.transferred_ids(), vec![ids[0]]);
            assert_eq!(applied.skipped_ids(), vec![ids[1], ids[2]]);
            assert!(applied.skipped.iter().all(|s| s.reason == SkipReason::Interrupted));
            assert!(source.to_string().contains("connection reset"));
        }
        other => panic!("expected TransferInterrupted, got {other:?}"),
    }

    // Only the applied entry left the shopping list
    let remaining: Vec<i64> = store.shopping_entries(USER).await.unwrap().iter().map(|e| e.id).collect();
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&ids[0]));
}

async fn shopping_rows(store: &dyn PantryStore, user_id: i64) -> Vec<(i64, Decimal, bool)> {
    let mut rows: Vec<(i64, Decimal, bool)> = store
        .shopping_entries(user_id)
        .await
        .unwrap()
        .iter()
        .map(|e| (e.id, e.quantity, e.done))
        .collect();
    rows.sort();
    rows
}

#[tokio::test]
async fn test_reopen_into_twin_survives_failing_deletes() {
    let store = Arc::new(FailingStore::new());
    let reconciler = ShoppingReconciler::new(store.clone(), Arc::new(UserLocks::new()));

    let first = reconciler.add_item(USER, "garlic", Some("clove"), Decimal::from(2)).await.unwrap();
    reconciler.toggle_done(USER, first.id).await.unwrap();
    let second = reconciler.add_item(USER, "garlic", Some("clove"), Decimal::from(3)).await.unwrap();
    *store.fail_on.lock().unwrap() = Some(first.id);

    let merged = reconciler.toggle_done(USER, first.id).await.unwrap();
    assert_eq!(merged.id, second.id);
    assert_eq!(shopping_rows(store.as_ref(), USER).await, vec![(second.id, Decimal::from(5), false)]);
}

#[tokio::test]
async fn test_failed_reopen_leaves_rows_unchanged() {
    let store = Arc::new(FailingStore::new());
    let reconciler = ShoppingReconciler::new(store.clone(), Arc::new(UserLocks::new()));

    let first = reconciler.add_item(USER, "garlic", Some("clove"), Decimal::from(2)).await.unwrap();
    reconciler.toggle_done(USER, first.id).await.unwrap();
    let second = reconciler.add_item(USER, "garlic", Some("clove"), Decimal::from(3)).await.unwrap();
    let before = shopping_rows(store.as_ref(), USER).await;
    store.fail_reopen.store(true, Ordering::SeqCst);

    let err = reconciler.toggle_done(USER, first.id).await.unwrap_err();
    assert!(matches!(err, PantryError::Storage(_)));

    let after = shopping_rows(store.as_ref(), USER).await;
    assert_eq!(after, before);
    assert_eq!(after, vec![(first.id, Decimal::from(2), true), (second.id, Decimal::from(3), false)]);
    let total: Decimal = after.iter().map(|(_, quantity, _)| *quantity).sum();
    assert_eq!(total, Decimal::from(5));
}

#[tokio::test]
async fn test_overlapping_transfer_batches_apply_each_row_once() {
    let (reconciler, store) = setup();
    let flour = key("flour", Some("g"));
    store.insert_pantry_entry(USER, &flour, Decimal::from(10), None).await.unwrap();

    let mut ids = Vec::new();
    for amount in [100, 200, 300, 400] {
        let entry = reconciler.add_item(USER, "flour", Some("g"), Decimal::from(amount)).await.unwrap();
        reconciler.toggle_done(USER, entry.id).await.unwrap();
        ids.push(entry.id);
    }
    let before = pantry_total(&store, USER, &flour).await;

    let batches = [
        vec![ids[0], ids[1], ids[2]],
        vec![ids[2], ids[1], ids[3]],
        vec![ids[1], ids[3], ids[0]],
    ];
    let mut handles = Vec::new();
    for batch in batches {
        let reconciler = reconciler.clone();
        handles.push(tokio::spawn(async move { reconciler.transfer_to_pantry(USER, &batch).await }));
    }
    {
        let reconciler = reconciler.clone();
        handles.push(tokio::spawn(async move { reconciler.transfer_all_done(USER).await }));
    }

    let mut transferred = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(report.skipped.iter().all(|s| s.reason == SkipReason::NotFound));
        transferred.extend(report.transferred_ids());
        for skipped in report.skipped_ids() {
            assert!(ids.contains(&skipped));
        }
    }

    // Every row moved exactly once, whichever batch got it
    assert_eq!(transferred.len(), ids.len());
    let unique: HashSet<i64> = transferred.iter().copied().collect();
    assert_eq!(unique, ids.iter().copied().collect::<HashSet<i64>>());

    assert_eq!(pantry_total(&store, USER, &flour).await, before + Decimal::from(1000));
    assert_eq!(store.pantry_entries(USER).await.unwrap().len(), 1);
    assert!(store.shopping_entries(USER).await.unwrap().is_empty());
}

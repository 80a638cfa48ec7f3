use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{BatchReference, OrderId, Sku, Version};
use domain::{Batch, Product, StoreError, StoreTransaction, TransactionalStore};
use tokio::sync::RwLock;

use crate::views::{AllocationRow, AllocationsView};

#[derive(Debug, Clone)]
struct StoredProduct {
    batches: Vec<Batch>,
    version: Version,
    /// Bumped on every committed write, whether or not the version moved.
    revision: u64,
}

impl StoredProduct {
    fn to_product(&self, sku: &Sku) -> Product {
        Product::restore(sku.clone(), self.batches.clone(), self.version)
    }
}

type Products = Arc<RwLock<HashMap<Sku, StoredProduct>>>;

/// In-memory product store.
///
/// Transactions stage their writes and apply them atomically under the write
/// lock on commit, after checking that no product they read has been written
/// by someone else in the meantime.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    products: Products,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored products.
    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }

    /// Returns a copy of the committed state of a product.
    pub async fn product(&self, sku: &Sku) -> Option<Product> {
        self.products
            .read()
            .await
            .get(sku)
            .map(|stored| stored.to_product(sku))
    }

    /// Removes every product.
    pub async fn clear(&self) {
        self.products.write().await.clear();
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            products: Arc::clone(&self.products),
            read_revisions: HashMap::new(),
            staged: Vec::new(),
        }))
    }
}

#[async_trait]
impl AllocationsView for InMemoryStore {
    async fn allocations_for(&self, order_id: &OrderId) -> Result<Vec<AllocationRow>, StoreError> {
        let products = self.products.read().await;
        let mut rows: Vec<AllocationRow> = products
            .values()
            .flat_map(|stored| stored.batches.iter())
            .flat_map(|batch| {
                batch
                    .allocations()
                    .filter(|line| &line.order_id == order_id)
                    .map(|line| AllocationRow {
                        sku: line.sku.clone(),
                        batch_reference: batch.reference().clone(),
                    })
            })
            .collect();
        rows.sort();
        Ok(rows)
    }
}

#[derive(Debug)]
enum Staged {
    Insert {
        sku: Sku,
        batches: Vec<Batch>,
        version: Version,
    },
    Update {
        sku: Sku,
        batches: Vec<Batch>,
        version: Version,
        expected: Version,
    },
}

impl Staged {
    fn sku(&self) -> &Sku {
        match self {
            Staged::Insert { sku, .. } | Staged::Update { sku, .. } => sku,
        }
    }

    fn batches(&self) -> &[Batch] {
        match self {
            Staged::Insert { batches, .. } | Staged::Update { batches, .. } => batches,
        }
    }

    fn to_product(&self) -> Product {
        match self {
            Staged::Insert {
                sku,
                batches,
                version,
            }
            | Staged::Update {
                sku,
                batches,
                version,
                ..
            } => Product::restore(sku.clone(), batches.clone(), *version),
        }
    }
}

struct InMemoryTransaction {
    products: Products,
    /// Revision of every stored product this transaction has read.
    read_revisions: HashMap<Sku, u64>,
    staged: Vec<Staged>,
}

impl InMemoryTransaction {
    fn staged_product(&self, predicate: impl Fn(&Staged) -> bool) -> Option<Product> {
        self.staged
            .iter()
            .rev()
            .find(|s| predicate(*s))
            .map(Staged::to_product)
    }

    fn read(&mut self, sku: &Sku, stored: &StoredProduct) -> Product {
        self.read_revisions.insert(sku.clone(), stored.revision);
        stored.to_product(sku)
    }
}

fn check(
    staged: &Staged,
    products: &HashMap<Sku, StoredProduct>,
    read_revisions: &HashMap<Sku, u64>,
) -> Result<(), StoreError> {
    match staged {
        Staged::Insert { sku, .. } => {
            if products.contains_key(sku) {
                return Err(StoreError::DuplicateProduct(sku.clone()));
            }
        }
        Staged::Update { sku, expected, .. } => {
            let current = products.get(sku);
            let actual = current.map(|p| p.version).unwrap_or_default();
            let unchanged = match (current, read_revisions.get(sku)) {
                (Some(current), Some(read)) => current.revision == *read,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if actual != *expected || !unchanged {
                return Err(StoreError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected: *expected,
                    actual: Some(actual),
                });
            }
        }
    }
    check_batch_owners(staged, products)
}

/// Batch references are unique across products.
fn check_batch_owners(
    staged: &Staged,
    products: &HashMap<Sku, StoredProduct>,
) -> Result<(), StoreError> {
    for batch in staged.batches() {
        let taken = products.iter().any(|(owner, stored)| {
            owner != staged.sku()
                && stored
                    .batches
                    .iter()
                    .any(|b| b.reference() == batch.reference())
        });
        if taken {
            return Err(StoreError::DuplicateBatch(batch.reference().clone()));
        }
    }
    Ok(())
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn load(&mut self, sku: &Sku) -> Result<Option<Product>, StoreError> {
        if let Some(product) = self.staged_product(|s| s.sku() == sku) {
            return Ok(Some(product));
        }

        let products = Arc::clone(&self.products);
        let products = products.read().await;
        Ok(products.get(sku).map(|stored| self.read(sku, stored)))
    }

    async fn load_by_batch_reference(
        &mut self,
        reference: &BatchReference,
    ) -> Result<Option<Product>, StoreError> {
        if let Some(product) = self.staged_product(|s| s.to_product().has_batch(reference)) {
            return Ok(Some(product));
        }

        let products = Arc::clone(&self.products);
        let products = products.read().await;
        let found = products
            .iter()
            .find(|(_, stored)| stored.batches.iter().any(|b| b.reference() == reference));
        Ok(found.map(|(sku, stored)| self.read(sku, stored)))
    }

    async fn insert(&mut self, product: &Product) -> Result<(), StoreError> {
        let exists = self.products.read().await.contains_key(product.sku())
            || self.staged.iter().any(|s| s.sku() == product.sku());
        if exists {
            return Err(StoreError::DuplicateProduct(product.sku().clone()));
        }

        self.staged.push(Staged::Insert {
            sku: product.sku().clone(),
            batches: product.batches().to_vec(),
            version: product.version(),
        });
        Ok(())
    }

    async fn update(&mut self, product: &Product, expected: Version) -> Result<(), StoreError> {
        let staged = Staged::Update {
            sku: product.sku().clone(),
            batches: product.batches().to_vec(),
            version: product.version(),
            expected,
        };
        {
            let products = self.products.read().await;
            check(&staged, &products, &self.read_revisions)?;
        }
        self.staged.push(staged);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction {
            products,
            read_revisions,
            staged,
        } = *self;
        let mut products = products.write().await;

        let mut owners: HashMap<&BatchReference, &Sku> = HashMap::new();
        for entry in &staged {
            check(entry, &products, &read_revisions)?;
            for batch in entry.batches() {
                if let Some(owner) = owners.insert(batch.reference(), entry.sku())
                    && owner != entry.sku()
                {
                    return Err(StoreError::DuplicateBatch(batch.reference().clone()));
                }
            }
        }

        let count = staged.len();
        for staged in staged {
            let (sku, batches, version) = match staged {
                Staged::Insert {
                    sku,
                    batches,
                    version,
                }
                | Staged::Update {
                    sku,
                    batches,
                    version,
                    ..
                } => (sku, batches, version),
            };
            let revision = products.get(&sku).map_or(0, |p| p.revision + 1);
            products.insert(
                sku,
                StoredProduct {
                    batches,
                    version,
                    revision,
                },
            );
        }

        tracing::trace!(products = count, "in-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{OrderLine, UnitOfWork};

    async fn seed(store: &InMemoryStore, sku: &str, reference: &str, qty: u32) {
        let mut uow = UnitOfWork::begin(store).await.unwrap();
        uow.products()
            .add(Product::new(sku, vec![Batch::new(reference, sku, qty, None)]))
            .unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn committed_products_can_be_loaded() {
        let store = InMemoryStore::new();
        seed(&store, "LAMP", "b1", 10).await;

        let mut tx = store.begin().await.unwrap();
        let product = tx.load(&"LAMP".into()).await.unwrap().unwrap();
        assert_eq!(product.batches().len(), 1);
        assert_eq!(product.version(), Version::initial());
        assert_eq!(store.product_count().await, 1);
    }

    #[tokio::test]
    async fn load_by_batch_reference_finds_owner() {
        let store = InMemoryStore::new();
        seed(&store, "LAMP", "lamp-batch", 10).await;
        seed(&store, "DESK", "desk-batch", 10).await;

        let mut tx = store.begin().await.unwrap();
        let product = tx
            .load_by_batch_reference(&"desk-batch".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.sku().as_str(), "DESK");
        assert!(
            tx.load_by_batch_reference(&"nope".into())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(&Product::new("LAMP", vec![])).await.unwrap();
        }
        assert_eq!(store.product_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_inserts_of_same_sku_conflict() {
        let store = InMemoryStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        first.insert(&Product::new("LAMP", vec![])).await.unwrap();
        second.insert(&Product::new("LAMP", vec![])).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::DuplicateProduct(_))
        ));
    }

    #[tokio::test]
    async fn writes_without_version_change_still_conflict() {
        let store = InMemoryStore::new();
        seed(&store, "LAMP", "b1", 10).await;

        let mut first = UnitOfWork::begin(&store).await.unwrap();
        let mut second = UnitOfWork::begin(&store).await.unwrap();
        first
            .products()
            .get(&"LAMP".into())
            .await
            .unwrap()
            .unwrap()
            .change_batch_quantity(&"b1".into(), 5)
            .unwrap();
        second
            .products()
            .get(&"LAMP".into())
            .await
            .unwrap()
            .unwrap()
            .change_batch_quantity(&"b1".into(), 7)
            .unwrap();

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::ConcurrencyConflict { .. })
        ));

        let lamp = store.product(&"LAMP".into()).await.unwrap();
        assert_eq!(lamp.batch(&"b1".into()).unwrap().purchased_quantity(), 5);
    }

    #[tokio::test]
    async fn concurrent_products_cannot_share_a_batch_reference() {
        let store = InMemoryStore::new();

        let mut first = UnitOfWork::begin(&store).await.unwrap();
        let mut second = UnitOfWork::begin(&store).await.unwrap();
        for (uow, sku) in [(&mut first, "LAMP"), (&mut second, "DESK")] {
            let mut products = uow.products();
            assert!(
                products
                    .get_by_batch_reference(&"b1".into())
                    .await
                    .unwrap()
                    .is_none()
            );
            products
                .add(Product::new(sku, vec![Batch::new("b1", sku, 10, None)]))
                .unwrap();
        }

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::DuplicateBatch(reference)) if reference.as_str() == "b1"
        ));

        assert!(store.product(&"DESK".into()).await.is_none());
        let mut tx = store.begin().await.unwrap();
        let owner = tx
            .load_by_batch_reference(&"b1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.sku().as_str(), "LAMP");
    }

    #[tokio::test]
    async fn one_transaction_cannot_give_a_reference_to_two_products() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&Product::new("LAMP", vec![Batch::new("b1", "LAMP", 1, None)]))
            .await
            .unwrap();
        tx.insert(&Product::new("DESK", vec![Batch::new("b1", "DESK", 1, None)]))
            .await
            .unwrap();

        assert!(matches!(
            tx.commit().await,
            Err(StoreError::DuplicateBatch(_))
        ));
        assert_eq!(store.product_count().await, 0);
    }

    #[tokio::test]
    async fn allocations_view_lists_order_lines_by_sku() {
        let store = InMemoryStore::new();
        seed(&store, "LAMP", "lamp-batch", 10).await;
        seed(&store, "DESK", "desk-batch", 10).await;

        let mut uow = UnitOfWork::begin(&store).await.unwrap();
        for sku in ["LAMP", "DESK"] {
            uow.products()
                .get(&sku.into())
                .await
                .unwrap()
                .unwrap()
                .allocate(OrderLine::new("order-1", sku, 2));
        }
        uow.products()
            .get(&"LAMP".into())
            .await
            .unwrap()
            .unwrap()
            .allocate(OrderLine::new("order-2", "LAMP", 1));
        uow.commit().await.unwrap();

        let rows = store.allocations_for(&"order-1".into()).await.unwrap();
        assert_eq!(
            rows,
            vec![
                AllocationRow {
                    sku: "DESK".into(),
                    batch_reference: "desk-batch".into(),
                },
                AllocationRow {
                    sku: "LAMP".into(),
                    batch_reference: "lamp-batch".into(),
                },
            ]
        );
        assert!(
            store
                .allocations_for(&"unknown".into())
                .await
                .unwrap()
                .is_empty()
        );
    }
}

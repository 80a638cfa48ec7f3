//! Unit of work: one transaction, one repository, one batch of collected messages.

use common::{BatchReference, Sku, Version};

use crate::error::StoreError;
use crate::message::Message;
use crate::product::Product;
use crate::store::{StoreTransaction, TransactionalStore};

/// How a tracked product entered the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Loaded from the store at this version.
    Loaded(Version),
    /// Handed to [`ProductRepository::add`].
    Added,
}

#[derive(Debug)]
struct Tracked {
    product: Product,
    origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Committed,
    RolledBack,
}

/// A transactional boundary around product changes.
///
/// Every product obtained through [`products`](UnitOfWork::products) is tracked
/// in first-seen order. [`commit`](UnitOfWork::commit) writes all of them and
/// commits the store transaction; anything else (an explicit
/// [`rollback`](UnitOfWork::rollback), an early return, an error, a panic)
/// drops the transaction, which discards its changes.
pub struct UnitOfWork {
    transaction: Option<Box<dyn StoreTransaction>>,
    seen: Vec<Tracked>,
    state: State,
}

impl UnitOfWork {
    /// Opens a new unit of work on `store`.
    pub async fn begin(store: &dyn TransactionalStore) -> Result<Self, StoreError> {
        let transaction = store.begin().await?;
        tracing::trace!("unit of work started");
        Ok(Self {
            transaction: Some(transaction),
            seen: Vec::new(),
            state: State::Active,
        })
    }

    /// Returns the product repository bound to this transaction.
    pub fn products(&mut self) -> ProductRepository<'_> {
        ProductRepository { uow: self }
    }

    /// Returns the SKUs of every tracked product, in first-seen order.
    pub fn seen(&self) -> impl Iterator<Item = &Sku> {
        self.seen.iter().map(|t| t.product.sku())
    }

    /// Returns true once [`commit`](UnitOfWork::commit) has succeeded.
    pub fn is_committed(&self) -> bool {
        self.state == State::Committed
    }

    /// Persists every tracked product and commits the transaction.
    ///
    /// On failure the transaction is rolled back and the error returned; the
    /// unit of work cannot be used afterwards.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        let mut transaction = self.transaction.take().ok_or(StoreError::TransactionClosed)?;
        self.state = State::RolledBack;

        if let Err(err) = Self::stage(transaction.as_mut(), &self.seen).await {
            tracing::debug!(error = %err, "staging failed, rolling back");
            Self::discard(transaction).await;
            return Err(err);
        }

        if let Err(err) = transaction.commit().await {
            tracing::debug!(error = %err, "commit failed, rolled back");
            metrics::counter!("unit_of_work_rollbacks_total").increment(1);
            return Err(err);
        }
        self.state = State::Committed;
        metrics::counter!("unit_of_work_commits_total").increment(1);
        tracing::debug!(products = self.seen.len(), "unit of work committed");
        Ok(())
    }

    /// Discards every change made in this unit of work.
    pub async fn rollback(&mut self) -> Result<(), StoreError> {
        let transaction = self.transaction.take().ok_or(StoreError::TransactionClosed)?;
        self.state = State::RolledBack;
        metrics::counter!("unit_of_work_rollbacks_total").increment(1);
        transaction.rollback().await
    }

    /// Drains the pending messages of every tracked product.
    ///
    /// Messages come out per product in FIFO order, products in the order they
    /// were first seen. Each message is returned once. A unit of work that did
    /// not commit returns nothing and drops what was pending, since none of
    /// those changes exist in the store.
    pub fn collect_new_events(&mut self) -> Vec<Message> {
        let drained: Vec<Message> = self
            .seen
            .iter_mut()
            .flat_map(|t| t.product.take_events())
            .collect();

        if self.state != State::Committed {
            if !drained.is_empty() {
                tracing::debug!(
                    discarded = drained.len(),
                    "dropping messages of uncommitted unit of work"
                );
            }
            return Vec::new();
        }

        drained
    }

    async fn stage(
        transaction: &mut dyn StoreTransaction,
        seen: &[Tracked],
    ) -> Result<(), StoreError> {
        for tracked in seen {
            match tracked.origin {
                Origin::Added => transaction.insert(&tracked.product).await?,
                Origin::Loaded(version) => transaction.update(&tracked.product, version).await?,
            }
        }
        Ok(())
    }

    async fn discard(transaction: Box<dyn StoreTransaction>) {
        metrics::counter!("unit_of_work_rollbacks_total").increment(1);
        if let Err(err) = transaction.rollback().await {
            tracing::warn!(error = %err, "rollback failed");
        }
    }

    fn transaction(&mut self) -> Result<&mut (dyn StoreTransaction + 'static), StoreError> {
        match self.transaction.as_deref_mut() {
            Some(transaction) => Ok(transaction),
            None => Err(StoreError::TransactionClosed),
        }
    }

    fn position(&self, predicate: impl Fn(&Product) -> bool) -> Option<usize> {
        self.seen.iter().position(|t| predicate(&t.product))
    }

    fn track(&mut self, product: Product, origin: Origin) -> &mut Product {
        let index = self.seen.len();
        self.seen.push(Tracked { product, origin });
        &mut self.seen[index].product
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.transaction.take().is_some() {
            metrics::counter!("unit_of_work_rollbacks_total").increment(1);
            tracing::debug!("unit of work left without commit, rolled back");
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("seen", &self.seen.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Product repository scoped to one unit of work.
///
/// Every product it returns or accepts is tracked by the unit of work, and
/// asking twice for the same product returns the same tracked instance.
pub struct ProductRepository<'a> {
    uow: &'a mut UnitOfWork,
}

impl ProductRepository<'_> {
    /// Returns the product with this SKU, if it exists.
    pub async fn get(&mut self, sku: &Sku) -> Result<Option<&mut Product>, StoreError> {
        if let Some(index) = self.uow.position(|p| p.sku() == sku) {
            return Ok(Some(&mut self.uow.seen[index].product));
        }

        match self.uow.transaction()?.load(sku).await? {
            Some(product) => Ok(Some(self.track_loaded(product))),
            None => Ok(None),
        }
    }

    /// Returns the product owning the batch with this reference, if any.
    pub async fn get_by_batch_reference(
        &mut self,
        reference: &BatchReference,
    ) -> Result<Option<&mut Product>, StoreError> {
        if let Some(index) = self.uow.position(|p| p.has_batch(reference)) {
            return Ok(Some(&mut self.uow.seen[index].product));
        }

        let loaded = self
            .uow
            .transaction()?
            .load_by_batch_reference(reference)
            .await?;
        match loaded {
            Some(product) => Ok(Some(self.track_loaded(product))),
            None => Ok(None),
        }
    }

    /// Starts tracking a new product. It is inserted on commit.
    pub fn add(&mut self, product: Product) -> Result<&mut Product, StoreError> {
        self.uow.transaction()?;
        if self.uow.position(|p| p.sku() == product.sku()).is_some() {
            return Err(StoreError::DuplicateProduct(product.sku().clone()));
        }
        Ok(self.uow.track(product, Origin::Added))
    }

    fn track_loaded(&mut self, product: Product) -> &mut Product {
        // A product found by batch reference may already be tracked under its SKU.
        match self.uow.position(|p| p.sku() == product.sku()) {
            Some(index) => &mut self.uow.seen[index].product,
            None => {
                let version = product.version();
                self.uow.track(product, Origin::Loaded(version))
            }
        }
    }
}

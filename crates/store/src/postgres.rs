use std::collections::HashMap;

use async_trait::async_trait;
use common::{BatchReference, OrderId, Sku, Version};
use domain::{Batch, OrderLine, Product, StoreError, StoreTransaction, TransactionalStore};
use futures_util::TryStreamExt;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::views::{AllocationRow, AllocationsView};

/// PostgreSQL-backed product store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL product store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl TransactionalStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::database)?;

        // Every read in the unit of work sees one snapshot, and a concurrent
        // write to a product row we update aborts with a serialization failure.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::database)?;

        Ok(Box::new(PostgresTransaction { tx }))
    }
}

#[async_trait]
impl AllocationsView for PostgresStore {
    async fn allocations_for(&self, order_id: &OrderId) -> Result<Vec<AllocationRow>, StoreError> {
        let mut rows = sqlx::query(
            r#"
            SELECT ol.sku, b.reference
            FROM allocations a
            JOIN order_lines ol ON ol.id = a.orderline_id
            JOIN batches b ON b.id = a.batch_id
            WHERE ol.order_id = $1
            ORDER BY ol.sku ASC, b.reference ASC
            "#,
        )
        .bind(order_id.as_str())
        .fetch(&self.pool);

        let mut allocations = Vec::new();
        while let Some(row) = rows.try_next().await.map_err(StoreError::database)? {
            allocations.push(AllocationRow {
                sku: Sku::new(get::<String>(&row, "sku")?),
                batch_reference: BatchReference::new(get::<String>(&row, "reference")?),
            });
        }
        Ok(allocations)
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    /// Writes the product's batches and allocations. `expected` is the version
    /// reported if a concurrent writer aborts the transaction.
    async fn write_batches(
        &mut self,
        product: &Product,
        expected: Version,
    ) -> Result<(), StoreError> {
        let map_write = |e: sqlx::Error| write_error(e, product, expected, None);

        for batch in product.batches() {
            let batch_id: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO batches (reference, sku, purchased_quantity, eta)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (reference) DO UPDATE SET
                    purchased_quantity = EXCLUDED.purchased_quantity,
                    eta = EXCLUDED.eta
                WHERE batches.sku = EXCLUDED.sku
                RETURNING id
                "#,
            )
            .bind(batch.reference().as_str())
            .bind(product.sku().as_str())
            .bind(to_db_quantity(batch.purchased_quantity())?)
            .bind(batch.eta())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| write_error(e, product, expected, Some(batch.reference())))?;

            let batch_id =
                batch_id.ok_or_else(|| StoreError::DuplicateBatch(batch.reference().clone()))?;

            sqlx::query("DELETE FROM allocations WHERE batch_id = $1")
                .bind(batch_id)
                .execute(&mut *self.tx)
                .await
                .map_err(map_write)?;

            for line in batch.allocations() {
                let line_id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO order_lines (order_id, sku, quantity)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (order_id, sku, quantity) DO UPDATE SET order_id = EXCLUDED.order_id
                    RETURNING id
                    "#,
                )
                .bind(line.order_id.as_str())
                .bind(line.sku.as_str())
                .bind(to_db_quantity(line.quantity)?)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(map_write)?;

                sqlx::query("INSERT INTO allocations (batch_id, orderline_id) VALUES ($1, $2)")
                    .bind(batch_id)
                    .bind(line_id)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(map_write)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    #[tracing::instrument(skip_all, fields(sku = %sku))]
    async fn load(&mut self, sku: &Sku) -> Result<Option<Product>, StoreError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM products WHERE sku = $1")
                .bind(sku.as_str())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(StoreError::database)?;
        let Some(version) = version else {
            return Ok(None);
        };

        let allocation_rows = sqlx::query(
            r#"
            SELECT a.batch_id, ol.order_id, ol.sku, ol.quantity
            FROM allocations a
            JOIN order_lines ol ON ol.id = a.orderline_id
            JOIN batches b ON b.id = a.batch_id
            WHERE b.sku = $1
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(StoreError::database)?;

        let mut allocations: HashMap<i64, Vec<OrderLine>> = HashMap::new();
        for row in &allocation_rows {
            let line = OrderLine::new(
                get::<String>(row, "order_id")?,
                get::<String>(row, "sku")?,
                from_db_quantity(get(row, "quantity")?)?,
            );
            allocations
                .entry(get(row, "batch_id")?)
                .or_default()
                .push(line);
        }

        let batch_rows = sqlx::query(
            r#"
            SELECT id, reference, purchased_quantity, eta
            FROM batches
            WHERE sku = $1
            ORDER BY id ASC
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(StoreError::database)?;

        let mut batches = Vec::with_capacity(batch_rows.len());
        for row in &batch_rows {
            let id: i64 = get(row, "id")?;
            batches.push(Batch::restore(
                BatchReference::new(get::<String>(row, "reference")?),
                sku.clone(),
                from_db_quantity(get(row, "purchased_quantity")?)?,
                get(row, "eta")?,
                allocations.remove(&id).unwrap_or_default(),
            ));
        }

        Ok(Some(Product::restore(
            sku.clone(),
            batches,
            Version::new(version),
        )))
    }

    async fn load_by_batch_reference(
        &mut self,
        reference: &BatchReference,
    ) -> Result<Option<Product>, StoreError> {
        let sku: Option<String> = sqlx::query_scalar("SELECT sku FROM batches WHERE reference = $1")
            .bind(reference.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::database)?;

        match sku {
            Some(sku) => self.load(&Sku::new(sku)).await,
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, fields(sku = %product.sku()))]
    async fn insert(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO products (sku, version) VALUES ($1, $2)")
            .bind(product.sku().as_str())
            .bind(product.version().as_i64())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return StoreError::DuplicateProduct(product.sku().clone());
                }
                write_error(e, product, Version::default(), None)
            })?;

        self.write_batches(product, Version::default()).await
    }

    #[tracing::instrument(skip_all, fields(sku = %product.sku(), %expected))]
    async fn update(&mut self, product: &Product, expected: Version) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET version = $1 WHERE sku = $2 AND version = $3")
            .bind(product.version().as_i64())
            .bind(product.sku().as_str())
            .bind(expected.as_i64())
            .execute(&mut *self.tx)
            .await;

        let conflict = match result {
            Ok(done) => done.rows_affected() == 0,
            Err(ref e) if is_serialization_failure(e) => true,
            Err(e) => return Err(StoreError::database(e)),
        };

        if conflict {
            tracing::debug!(sku = %product.sku(), %expected, "product changed concurrently");
            return Err(StoreError::ConcurrencyConflict {
                sku: product.sku().clone(),
                expected,
                actual: None,
            });
        }

        self.write_batches(product, expected).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::database)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::database)
    }
}

/// Maps a failed write, turning serialization failures and batch reference
/// clashes into their store errors.
fn write_error(
    err: sqlx::Error,
    product: &Product,
    expected: Version,
    reference: Option<&BatchReference>,
) -> StoreError {
    if is_serialization_failure(&err) {
        tracing::debug!(sku = %product.sku(), %expected, "write aborted by a concurrent transaction");
        return StoreError::ConcurrencyConflict {
            sku: product.sku().clone(),
            expected,
            actual: None,
        };
    }
    if let (sqlx::Error::Database(db_err), Some(reference)) = (&err, reference)
        && db_err.constraint() == Some("unique_batch_reference")
    {
        return StoreError::DuplicateBatch(reference.clone());
    }
    StoreError::database(err)
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(StoreError::database)
}

fn to_db_quantity(quantity: u32) -> Result<i32, StoreError> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Corrupt(format!("quantity {quantity} exceeds column range")))
}

fn from_db_quantity(quantity: i32) -> Result<u32, StoreError> {
    u32::try_from(quantity)
        .map_err(|_| StoreError::Corrupt(format!("negative quantity {quantity} in database")))
}

fn is_serialization_failure(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("40001"))
}

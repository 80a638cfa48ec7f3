//! Command and event handlers.

use std::sync::Arc;

use async_trait::async_trait;
use common::CascadeId;
use domain::{
    Batch, Command, DomainError, Event, Message, OrderLine, Product, StoreError,
    TransactionalStore, UnitOfWork,
};

use crate::error::ServiceError;
use crate::messagebus::CommandResult;
use crate::ports::{EventPublisher, Notifications};

/// Everything a handler needs for one invocation.
///
/// The unit of work is opened on first use, so handlers that only talk to
/// outbound ports never start a transaction.
pub struct HandlerContext {
    store: Arc<dyn TransactionalStore>,
    cascade_id: CascadeId,
    uow: Option<UnitOfWork>,
}

impl HandlerContext {
    pub(crate) fn new(store: Arc<dyn TransactionalStore>, cascade_id: CascadeId) -> Self {
        Self {
            store,
            cascade_id,
            uow: None,
        }
    }

    /// Identifier of the cascade this invocation belongs to.
    pub fn cascade_id(&self) -> CascadeId {
        self.cascade_id
    }

    /// Returns this invocation's unit of work, beginning it if needed.
    pub async fn unit_of_work(&mut self) -> Result<&mut UnitOfWork, StoreError> {
        if self.uow.is_none() {
            self.uow = Some(UnitOfWork::begin(self.store.as_ref()).await?);
        }
        self.uow.as_mut().ok_or(StoreError::TransactionClosed)
    }

    pub(crate) fn collect_new_events(&mut self) -> Vec<Message> {
        self.uow
            .as_mut()
            .map(UnitOfWork::collect_new_events)
            .unwrap_or_default()
    }
}

/// Handles one kind of command. Exactly one is registered per kind.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        command: Command,
        ctx: &mut HandlerContext,
    ) -> Result<CommandResult, ServiceError>;
}

/// Reacts to one kind of event. Any number may be registered per kind.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: Event, ctx: &mut HandlerContext) -> Result<(), ServiceError>;
}

fn unexpected(handler: &'static str, message: impl Into<Message>) -> ServiceError {
    ServiceError::UnexpectedMessage {
        handler,
        message: message.into().name(),
    }
}

/// Adds a batch, creating its product on first sight of the SKU.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddBatchHandler;

#[async_trait]
impl CommandHandler for AddBatchHandler {
    fn name(&self) -> &'static str {
        "add_batch"
    }

    #[tracing::instrument(skip_all, fields(handler = "add_batch"))]
    async fn handle(
        &self,
        command: Command,
        ctx: &mut HandlerContext,
    ) -> Result<CommandResult, ServiceError> {
        let cmd = match command {
            Command::CreateBatch(cmd) => cmd,
            other => return Err(unexpected(self.name(), other)),
        };

        let uow = ctx.unit_of_work().await?;
        let mut products = uow.products();

        if products.get_by_batch_reference(&cmd.reference).await?.is_some() {
            return Err(DomainError::DuplicateBatch(cmd.reference).into());
        }

        let batch = Batch::new(cmd.reference, cmd.sku.clone(), cmd.quantity, cmd.eta);
        match products.get(&cmd.sku).await? {
            Some(product) => product.add_batch(batch)?,
            None => {
                tracing::debug!(sku = %cmd.sku, "creating product");
                products.add(Product::new(cmd.sku, vec![batch]))?;
            }
        }

        uow.commit().await?;
        Ok(None)
    }
}

/// Allocates an order line to the best batch of its product.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocateHandler;

#[async_trait]
impl CommandHandler for AllocateHandler {
    fn name(&self) -> &'static str {
        "allocate"
    }

    #[tracing::instrument(skip_all, fields(handler = "allocate"))]
    async fn handle(
        &self,
        command: Command,
        ctx: &mut HandlerContext,
    ) -> Result<CommandResult, ServiceError> {
        let cmd = match command {
            Command::Allocate(cmd) => cmd,
            other => return Err(unexpected(self.name(), other)),
        };

        let line = OrderLine::new(cmd.order_id, cmd.sku.clone(), cmd.quantity);
        let uow = ctx.unit_of_work().await?;
        let mut products = uow.products();
        let product = products
            .get(&cmd.sku)
            .await?
            .ok_or_else(|| ServiceError::InvalidSku(cmd.sku.clone()))?;

        let reference = product.allocate(line);
        uow.commit().await?;

        let outcome = if reference.is_some() {
            "allocated"
        } else {
            "out_of_stock"
        };
        metrics::counter!("allocations_total", "outcome" => outcome).increment(1);
        tracing::debug!(sku = %cmd.sku, outcome, "allocation handled");

        Ok(reference)
    }
}

/// Changes the purchased quantity of a batch, freeing lines that no longer fit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeBatchQuantityHandler;

#[async_trait]
impl CommandHandler for ChangeBatchQuantityHandler {
    fn name(&self) -> &'static str {
        "change_batch_quantity"
    }

    #[tracing::instrument(skip_all, fields(handler = "change_batch_quantity"))]
    async fn handle(
        &self,
        command: Command,
        ctx: &mut HandlerContext,
    ) -> Result<CommandResult, ServiceError> {
        let cmd = match command {
            Command::ChangeBatchQuantity(cmd) => cmd,
            other => return Err(unexpected(self.name(), other)),
        };

        let uow = ctx.unit_of_work().await?;
        let mut products = uow.products();
        let product = products
            .get_by_batch_reference(&cmd.reference)
            .await?
            .ok_or_else(|| DomainError::BatchNotFound(cmd.reference.clone()))?;

        product.change_batch_quantity(&cmd.reference, cmd.quantity)?;
        uow.commit().await?;
        Ok(None)
    }
}

/// Channel `Allocated` events are published on unless configured otherwise.
pub const DEFAULT_ALLOCATED_CHANNEL: &str = "line_allocated";

/// Recipient of out-of-stock notifications unless configured otherwise.
pub const DEFAULT_OUT_OF_STOCK_RECIPIENT: &str = "stock@made.com";

/// Publishes `Allocated` events as JSON for external consumers.
pub struct PublishAllocatedEvent {
    publisher: Arc<dyn EventPublisher>,
    channel: String,
}

impl PublishAllocatedEvent {
    pub fn new(publisher: Arc<dyn EventPublisher>, channel: impl Into<String>) -> Self {
        Self {
            publisher,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl EventHandler for PublishAllocatedEvent {
    fn name(&self) -> &'static str {
        "publish_allocated_event"
    }

    #[tracing::instrument(skip_all, fields(handler = "publish_allocated_event", channel = %self.channel))]
    async fn handle(&self, event: Event, _ctx: &mut HandlerContext) -> Result<(), ServiceError> {
        let allocated = match event {
            Event::Allocated(allocated) => allocated,
            other => return Err(unexpected(self.name(), other)),
        };

        let payload = serde_json::to_string(&allocated)?;
        self.publisher.publish(&self.channel, &payload).await
    }
}

/// Tells the stock team that a SKU ran out.
pub struct SendOutOfStockNotification {
    notifications: Arc<dyn Notifications>,
    recipient: String,
}

impl SendOutOfStockNotification {
    pub fn new(notifications: Arc<dyn Notifications>, recipient: impl Into<String>) -> Self {
        Self {
            notifications,
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl EventHandler for SendOutOfStockNotification {
    fn name(&self) -> &'static str {
        "send_out_of_stock_notification"
    }

    #[tracing::instrument(skip_all, fields(handler = "send_out_of_stock_notification"))]
    async fn handle(&self, event: Event, _ctx: &mut HandlerContext) -> Result<(), ServiceError> {
        let out_of_stock = match event {
            Event::OutOfStock(out_of_stock) => out_of_stock,
            other => return Err(unexpected(self.name(), other)),
        };

        self.notifications
            .send(
                &self.recipient,
                "Out of stock",
                &format!("Out of stock for {}", out_of_stock.sku),
            )
            .await
    }
}

/// Queues a fresh `Allocate` for a line that lost its batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReallocateHandler;

#[async_trait]
impl EventHandler for ReallocateHandler {
    fn name(&self) -> &'static str {
        "reallocate"
    }

    #[tracing::instrument(skip_all, fields(handler = "reallocate"))]
    async fn handle(&self, event: Event, ctx: &mut HandlerContext) -> Result<(), ServiceError> {
        let deallocated = match event {
            Event::Deallocated(deallocated) => deallocated,
            other => return Err(unexpected(self.name(), other)),
        };

        let uow = ctx.unit_of_work().await?;
        let mut products = uow.products();
        let product = products
            .get(&deallocated.sku)
            .await?
            .ok_or_else(|| ServiceError::InvalidSku(deallocated.sku.clone()))?;

        product.reallocate(OrderLine::new(
            deallocated.order_id,
            deallocated.sku,
            deallocated.quantity,
        ));
        uow.commit().await?;
        Ok(())
    }
}

//! Message bus: dispatches a message and everything it causes until the queue is empty.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use common::{BatchReference, CascadeId};
use domain::{Command, CommandKind, Event, EventKind, Message, TransactionalStore};
use tracing::Instrument;

use crate::error::ServiceError;
use crate::handlers::{CommandHandler, EventHandler, HandlerContext};

/// What a command handler hands back: the batch an `Allocate` landed on, if any.
pub type CommandResult = Option<BatchReference>;

/// Dispatches commands to their single handler and events to all of theirs.
///
/// One call to [`handle`](MessageBus::handle) is one cascade: a breadth-first
/// walk over the initial message and every message collected from the units
/// of work its handlers committed.
pub struct MessageBus {
    store: Arc<dyn TransactionalStore>,
    command_handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
    event_handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl MessageBus {
    /// Starts building a bus whose handlers work against `store`.
    pub fn builder(store: Arc<dyn TransactionalStore>) -> MessageBusBuilder {
        MessageBusBuilder {
            store,
            command_handlers: HashMap::new(),
            event_handlers: HashMap::new(),
            duplicates: Vec::new(),
        }
    }

    /// Handles `message` and everything it causes.
    ///
    /// Returns the results of every command handled in the cascade, in
    /// dispatch order. The first command failure stops the cascade and is
    /// returned; event handler failures are logged and skipped.
    pub async fn handle(
        &self,
        message: impl Into<Message>,
    ) -> Result<Vec<CommandResult>, ServiceError> {
        let message = message.into();
        let cascade_id = CascadeId::new();
        let span = tracing::info_span!("cascade", %cascade_id, initial = message.name());
        self.run(message, cascade_id).instrument(span).await
    }

    async fn run(
        &self,
        message: Message,
        cascade_id: CascadeId,
    ) -> Result<Vec<CommandResult>, ServiceError> {
        let start = Instant::now();
        let mut queue = VecDeque::from([message]);
        let mut results = Vec::new();
        let mut dispatched = 0usize;

        while let Some(message) = queue.pop_front() {
            dispatched += 1;
            match message {
                Message::Command(command) => {
                    let (result, collected) = self.handle_command(command, cascade_id).await?;
                    results.push(result);
                    queue.extend(collected);
                }
                Message::Event(event) => {
                    let collected = self.handle_event(event, cascade_id).await;
                    queue.extend(collected);
                }
            }
        }

        let duration = start.elapsed().as_secs_f64();
        metrics::histogram!("messagebus_cascade_duration_seconds").record(duration);
        tracing::debug!(dispatched, duration, "cascade complete");
        Ok(results)
    }

    async fn handle_command(
        &self,
        command: Command,
        cascade_id: CascadeId,
    ) -> Result<(CommandResult, Vec<Message>), ServiceError> {
        let kind = command.kind();
        let handler = self
            .command_handlers
            .get(&kind)
            .ok_or(ServiceError::MissingCommandHandler(kind))?;

        metrics::counter!("messagebus_commands_total", "command" => kind.as_str()).increment(1);
        tracing::debug!(command = %kind, handler = handler.name(), "handling command");

        let mut ctx = HandlerContext::new(Arc::clone(&self.store), cascade_id);
        match handler.handle(command, &mut ctx).await {
            Ok(result) => Ok((result, ctx.collect_new_events())),
            Err(err) => {
                tracing::debug!(command = %kind, error = %err, "command failed");
                Err(err)
            }
        }
    }

    async fn handle_event(&self, event: Event, cascade_id: CascadeId) -> Vec<Message> {
        let kind = event.kind();
        let handlers = self
            .event_handlers
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default();

        metrics::counter!("messagebus_events_total", "event" => kind.as_str()).increment(1);
        tracing::debug!(event = %kind, handlers = handlers.len(), "handling event");

        let mut collected = Vec::new();
        for handler in handlers {
            let mut ctx = HandlerContext::new(Arc::clone(&self.store), cascade_id);
            match handler.handle(event.clone(), &mut ctx).await {
                Ok(()) => collected.extend(ctx.collect_new_events()),
                Err(err) => {
                    metrics::counter!(
                        "messagebus_event_handler_failures_total",
                        "event" => kind.as_str()
                    )
                    .increment(1);
                    tracing::error!(
                        event = %kind,
                        handler = handler.name(),
                        error = %err,
                        "event handler failed"
                    );
                }
            }
        }
        collected
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("commands", &self.command_handlers.len())
            .field("event_kinds", &self.event_handlers.len())
            .finish()
    }
}

/// Registers handlers and validates the registry.
pub struct MessageBusBuilder {
    store: Arc<dyn TransactionalStore>,
    command_handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
    event_handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    duplicates: Vec<CommandKind>,
}

impl MessageBusBuilder {
    /// Registers the handler for a command kind.
    pub fn command_handler(
        mut self,
        kind: CommandKind,
        handler: impl CommandHandler + 'static,
    ) -> Self {
        if self
            .command_handlers
            .insert(kind, Arc::new(handler))
            .is_some()
        {
            self.duplicates.push(kind);
        }
        self
    }

    /// Appends a handler for an event kind. Handlers run in registration order.
    pub fn event_handler(mut self, kind: EventKind, handler: impl EventHandler + 'static) -> Self {
        self.event_handlers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Builds the bus.
    ///
    /// Fails unless every command kind has exactly one handler.
    pub fn build(self) -> Result<MessageBus, ServiceError> {
        if let Some(kind) = self.duplicates.first() {
            return Err(ServiceError::DuplicateCommandHandler(*kind));
        }
        if let Some(kind) = CommandKind::ALL
            .into_iter()
            .find(|kind| !self.command_handlers.contains_key(kind))
        {
            return Err(ServiceError::MissingCommandHandler(kind));
        }

        Ok(MessageBus {
            store: self.store,
            command_handlers: self.command_handlers,
            event_handlers: self.event_handlers,
        })
    }
}

//! Delivery of newly created messages to the application.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use mingle_core::{Message, RecordId};
use mingle_store::{MessageListener, RecordStore};

use crate::error::DeliveryError;

/// Application extension point for messages addressed to this node.
#[async_trait]
pub trait ReceiveMessage: Send + Sync {
    /// Take a message addressed to this node.
    ///
    /// Called once per message, right after it is first stored. On `Ok` the
    /// message is marked received; on `Err` it stays unmarked. A message still
    /// unmarked when the node next starts is offered again.
    async fn receive_message(&self, _message: &Message) -> Result<(), DeliveryError> {
        Err(DeliveryError::Unimplemented)
    }
}

/// Handler that accepts nothing; every delivery fails as unimplemented.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unhandled;

impl ReceiveMessage for Unhandled {}

/// Store listener that routes messages for `me` to the application handler.
///
/// Holds the store weakly: the store owns the hook through its listener list.
pub struct DeliveryHook<S: RecordStore> {
    me: RecordId,
    handler: Arc<dyn ReceiveMessage>,
    store: Weak<S>,
}

impl<S: RecordStore> DeliveryHook<S> {
    pub fn new(me: RecordId, handler: Arc<dyn ReceiveMessage>, store: Weak<S>) -> Self {
        Self { me, handler, store }
    }

    /// Hand `message` to the handler and mark it received on success.
    ///
    /// Returns true if the message is now marked received.
    pub async fn deliver(&self, message: &Message) -> bool {
        if !message.is_for(&self.me) {
            return false;
        }

        if let Err(e) = self.handler.receive_message(message).await {
            tracing::error!(id = %message.id, error = %e, "message delivery failed");
            return false;
        }

        let Some(store) = self.store.upgrade() else {
            tracing::debug!(id = %message.id, "store dropped before delivery was recorded");
            return false;
        };

        match store.mark_received(&message.id).await {
            Ok(true) => {
                tracing::debug!(id = %message.id, "message delivered");
                true
            }
            Ok(false) => {
                tracing::warn!(id = %message.id, "delivered message vanished from store");
                false
            }
            Err(e) => {
                tracing::error!(id = %message.id, error = %e, "failed to mark message received");
                false
            }
        }
    }
}

#[async_trait]
impl<S: RecordStore + 'static> MessageListener for DeliveryHook<S> {
    async fn on_message_created(&self, message: &Message) {
        self.deliver(message).await;
    }
}

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::message::Message;
use super::subscriber::Handler;
use super::MessageBus;
use crate::error::BusError;

/// A [`MessageBus`] that drops every message and never calls a handler.
///
/// Useful as a default where publishing is optional.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

#[async_trait]
impl MessageBus for NullBus {
    async fn publish_with<T: Message>(
        &self,
        _message: T,
        _delay: Duration,
        _token: &CancellationToken,
    ) -> Result<(), BusError> {
        Ok(())
    }

    async fn subscribe_handler<T: Message, H: Handler<T>>(
        &self,
        _handler: H,
        _token: CancellationToken,
    ) -> Result<(), BusError> {
        Ok(())
    }
}

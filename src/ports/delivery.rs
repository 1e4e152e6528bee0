//! Delivery Port - Outbound Price Messages

use async_trait::async_trait;

use crate::domain::error::IndexerResult;
use crate::domain::message::PriceMessage;

/// Receives finished price messages.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
  /// Deliver one message. Returns whether the receiver accepted it.
  async fn deliver(&self, message: &PriceMessage) -> IndexerResult<bool>;
}

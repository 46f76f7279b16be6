use async_trait::async_trait;

/// Consumes messages delivered on a topic.
///
/// Called once per delivered message, possibly concurrently for different
/// messages. Because delivery is at-least-once, the same payload may arrive
/// again; implementations must tolerate that.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Vec<u8>) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload could not be decoded into the expected message.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// The message was understood but could not be handled.
    #[error("handler failed: {0}")]
    Failed(String),
}

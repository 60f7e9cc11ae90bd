//! Channel-side operations the lifecycle manager relies on.

use tether_domain::error::Result;

/// Implemented by a channel integration (Discord, Slack, …).  Calls may
/// suspend on network I/O; timeouts are the implementor's responsibility.
#[async_trait::async_trait]
pub trait ThreadPlatform: Send + Sync {
    /// The container a conversation lives in: the parent channel for a
    /// thread, the conversation itself for a top-level channel.  `None`
    /// when the platform cannot tell.
    async fn resolve_container(&self, conversation_id: &str) -> Result<Option<String>>;

    /// Open a new thread under `container_id`; returns its id.
    async fn create_thread(&self, container_id: &str, name: &str) -> Result<Option<String>>;

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<()>;
}

/// Used when no channel integration is attached: nothing can be created
/// and outgoing text is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatform;

#[async_trait::async_trait]
impl ThreadPlatform for NullPlatform {
    async fn resolve_container(&self, _conversation_id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn create_thread(&self, container_id: &str, _name: &str) -> Result<Option<String>> {
        tracing::debug!(container_id, "no channel integration attached; cannot create thread");
        Ok(None)
    }

    async fn send_message(&self, conversation_id: &str, _text: &str) -> Result<()> {
        tracing::debug!(conversation_id, "no channel integration attached; message dropped");
        Ok(())
    }
}

//! The session-provider seam.

use async_trait::async_trait;

use crate::error::VideoResult;

/// Operations the recorder needs from the video platform.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Number of participants currently connected to `room`.
    async fn connected_participants(&self, room: &str) -> VideoResult<usize>;

    /// Mint a token that lets `identity` join `room`.
    fn mint_access_token(&self, identity: &str, room: &str) -> VideoResult<String>;

    /// Force `identity` out of `room`.
    async fn disconnect_participant(&self, room: &str, identity: &str) -> VideoResult<()>;
}

use async_trait::async_trait;

use crate::command::{Command, Reply};
use crate::error::EngineError;

/// Executes record commands against storage.
///
/// Writes reply with [`Reply::Affected`], `LastInsertId` with
/// [`Reply::Scalar`], reads with [`Reply::Rows`]. When a write command asks to
/// ignore errors the engine may report `Affected(0)` instead of failing.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn execute(&self, command: Command) -> Result<Reply, EngineError>;
}

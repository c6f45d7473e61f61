// Discord layer - event handlers and the punishment executor.

#[path = "protection/mod.rs"]
pub mod protection;

use crate::core::protection::ProtectionService;
use crate::infra::protection::JsonProtectionStore;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Shared state handed to every poise event.
pub struct Data {
    pub protection: Arc<ProtectionService<JsonProtectionStore>>,
}

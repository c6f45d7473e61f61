// Implementations of the protection settings store.

pub mod in_memory;
pub mod json_store;

#[allow(unused_imports)]
pub use in_memory::InMemoryProtectionStore;
pub use json_store::JsonProtectionStore;

// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "protection/mod.rs"]
pub mod protection;

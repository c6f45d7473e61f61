// Discord adapters for the protection system.

pub mod events;
pub mod punisher;

//! Registry account: session, REST client and inventory cache.

pub mod api;
pub mod inventory;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

pub use api::{HubClient, RegistryApi, PAGE_SIZE};
pub use inventory::{InventoryCache, RefreshReport, TAG_FETCH_CONCURRENCY};
pub use session::RemoteSession;

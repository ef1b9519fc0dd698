//! Registry inventory cache and local resource change detection.
//!
//! * [`hub`] keeps an authenticated registry session and a cached
//!   repository → tags inventory of the logged-in account.
//! * [`poller`] re-samples local container and image listings and raises
//!   the [`ChangeSignal`](signal::ChangeSignal) only when they actually
//!   change.
//! * [`runtime`] holds the listing adapters the poller samples through.

pub mod config;
pub mod error;
pub mod hub;
pub mod poller;
pub mod runtime;
pub mod signal;
pub mod types;

pub use error::{AuthError, FetchError, RunError, SamplingError};
pub use hub::{HubClient, InventoryCache, RefreshReport, RegistryApi, RemoteSession};
pub use poller::{PollState, PollingRefresher};
pub use runtime::{CommandRunner, ResourceKind, ResourceLister, ShellRunner};
pub use signal::{ChangeSignal, SubscriptionId};

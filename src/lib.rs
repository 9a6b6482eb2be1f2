//! Offline-first local cache and sync engine for a school messaging client.
//!
//! The UI asks the [`SyncCoordinator`] for students and messages; the
//! coordinator fetches from the remote API when reachable, merges into the
//! on-device store, and always serves the store's reconciled view back.
//! [`SessionManager`] owns the token lifecycle every sync call depends on.

use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod config;
pub mod core;
pub mod demo;
pub mod error;
pub mod network;
pub mod session;
pub mod source;
pub mod sync;

#[cfg(test)]
mod testutil;

pub use crate::core::models::{Message, Priority, Role, Student, UserProfile};
pub use crate::core::store::StoreHandle;
pub use api::ApiClient;
pub use config::ApiConfig;
pub use demo::DemoDataProvider;
pub use error::Error;
pub use network::NetworkMonitor;
pub use session::{SessionManager, SessionState, SignIn};
pub use sync::{SyncCoordinator, DEFAULT_PAGE_SIZE};

use crate::core::keyring::KeyringSlot;
use source::RemoteSource;

/// Composition root. Constructed once per process; everything downstream
/// receives its collaborators explicitly instead of reaching for globals.
pub struct Engine {
    pub store: StoreHandle,
    pub network: NetworkMonitor,
    pub session: Arc<SessionManager>,
    api: Arc<ApiClient>,
}

impl Engine {
    /// Open the store at the platform data dir (running migrations first),
    /// build the API client, and restore any persisted session.
    pub fn bootstrap(config: ApiConfig) -> Result<Self, Error> {
        let store = StoreHandle::open()?;
        Self::assemble(config, store)
    }

    pub fn bootstrap_at(config: ApiConfig, db_file: &Path) -> Result<Self, Error> {
        let store = StoreHandle::open_at(db_file)?;
        Self::assemble(config, store)
    }

    fn assemble(config: ApiConfig, store: StoreHandle) -> Result<Self, Error> {
        let api = Arc::new(ApiClient::new(&config)?);
        let session = Arc::new(SessionManager::new(
            api.clone(),
            Arc::new(KeyringSlot),
            store.clone(),
        ));
        Ok(Engine {
            store,
            network: NetworkMonitor::new(true),
            session,
            api,
        })
    }

    /// Build a coordinator for the active session. The data source is
    /// picked here, once: demo sessions get the in-memory provider,
    /// everything else the real API client.
    pub async fn coordinator(&self) -> SyncCoordinator {
        let source: Arc<dyn RemoteSource> = if self.session.is_demo().await {
            Arc::new(DemoDataProvider::new())
        } else {
            self.api.clone()
        };
        SyncCoordinator::new(
            self.store.clone(),
            Arc::clone(&self.session),
            self.network.clone(),
            source,
        )
    }
}

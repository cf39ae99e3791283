//! Docket Sync
//!
//! Client-side real-time synchronization for docket case dashboards: one
//! WebSocket connection with automatic reconnect, a topic router with
//! refcounted per-case subscriptions, an in-memory case store fed by
//! server pushes, and optimistic field edits that commit or roll back.
//!
//! Spawn an engine, connect, and read through snapshots:
//!
//! ```no_run
//! use std::sync::Arc;
//! use docket_sync::{CaseReadApi, FieldWriteApi, HttpCaseApi, SyncConfig, SyncEngine};
//!
//! # fn main() -> Result<(), docket_sync::ConfigError> {
//! let api = Arc::new(HttpCaseApi::new("http://127.0.0.1:4000"));
//! let read: Arc<dyn CaseReadApi> = api.clone();
//! let write: Arc<dyn FieldWriteApi> = api;
//! let handle = SyncEngine::spawn(SyncConfig::new("ws://127.0.0.1:4000/ws"), read, write)?;
//! handle.connect();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod edits;
pub mod engine;
pub mod error;
pub mod notify;
mod push;
pub mod router;
pub mod store;
pub mod transport;

pub use api::{CaseReadApi, FieldWriteApi, HttpCaseApi};
pub use config::{BackoffConfig, SyncConfig};
pub use edits::EditOutcome;
pub use engine::{SyncEngine, SyncHandle};
pub use error::{ApiError, ConfigError, EditError, EngineClosed, StoreError, TransportError};
pub use notify::{alert_for, Alert, AlertSeverity, NotificationBridge};
pub use router::{Subscription, SubscriptionId};
pub use store::{CaseQuery, CaseSortField, SortDirection, StoreSnapshot};
pub use transport::ConnectionStatus;

//! Session and credential lifecycle.
//!
//! This module provides:
//! - `CredentialStore`: durable access/renewal credential storage that also
//!   owns the default `Authorization` header
//! - `RenewalScheduler`: the single pending renewal timer
//! - `SessionService`: the check/renew/login/logout state machine
//! - `SessionHandle`: the snapshot-plus-operations view handed to the UI
//!
//! Access credentials are renewed five minutes before they expire.

pub mod error;
pub mod handle;
pub mod header;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod store;

pub use error::{LoginError, SessionError};
pub use handle::SessionHandle;
pub use header::AuthHeader;
pub use scheduler::{ArmOutcome, RenewalScheduler, RENEW_THRESHOLD};
pub use service::{Navigator, NoopNavigator, SessionService};
pub use snapshot::{SessionSnapshot, SessionStatus};
pub use store::{CredentialStore, FileStore, KeyValueStore, KeyringStore, MemoryStore};

#![warn(missing_docs)]

//! Keel metadata subsystem: crash-safe consensus metadata, membership configuration, binary codec
//!
//! A node reloads its term, vote, log positions and latest membership
//! configuration from a [`MetaStore`] on startup, and persists each change
//! before acting on it.

pub mod async_store;
pub mod codec;
pub mod config;
pub mod configuration;
pub mod error;
pub mod store;
pub mod types;

pub use async_store::AsyncMetaStore;
pub use codec::MetaRecord;
pub use config::MetaStoreConfig;
pub use configuration::{Configuration, Member, MemberRole};
pub use error::{CodecError, MetaResult, MetaStoreError};
pub use store::MetaStore;
pub use types::{LogIndex, MemberId, Term, Timestamp, MAX_MEMBER_ID_LENGTH};

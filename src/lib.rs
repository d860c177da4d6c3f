//! shelfsync - Book catalog sync for a blog content API.
//!
//! shelfsync keeps a catalog of book posts on a blog in line with a locally
//! described batch, hosts images through the blog's own post endpoint, and
//! manages book files in a separate file store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      CLI / REST DAEMON                           │
//! │  validate, import, export, stats, host, books, login, logout     │
//! └───────────┬───────────────────┬──────────────────┬──────────────┘
//!             │                   │                  │
//! ┌───────────┴─────────┐ ┌───────┴─────────┐ ┌──────┴──────────────┐
//! │     RECONCILE       │ │     HOSTING     │ │       SHELF         │
//! │  create/update/skip │ │  temp post in,  │ │  upload, list,      │
//! │  one catalog fetch  │ │  URL out        │ │  publish, remove    │
//! └───────────┬─────────┘ └───────┬─────────┘ └──────┬──────────────┘
//!             └─────────┬─────────┘                  │
//! ┌─────────────────────┴────────────┐ ┌─────────────┴──────────────┐
//! │        CONTENT SESSION           │ │       ASSET SESSION        │
//! │  blog API, content credential    │ │  file API, asset credential│
//! └─────────────────────┬────────────┘ └─────────────┬──────────────┘
//! ┌─────────────────────┴────────────────────────────┴──────────────┐
//! │                          VAULT                                   │
//! │  content: persisted to disk     asset: memory only               │
//! │  one shared grant per scope, dropped on 401/403                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **One catalog fetch per sync**: writes are O(n), lookups are local
//! - **Partial failure**: a failed write is reported, the batch continues
//! - **No leaked temp posts**: hosting deletes its post on every exit path
//! - **No retries**: every remote call is bounded by a timeout and fails once

// === Core Modules ===

/// Credential vault and grant flows.
pub mod auth;

/// Content and asset API gateways.
pub mod gateway;

/// Asset hosting through the content API.
pub mod hosting;

/// Batch sync of desired posts.
pub mod reconcile;

// === Catalog Tools ===

/// Catalog export.
pub mod export;

/// Catalog statistics.
pub mod stats;

/// Post search.
pub mod search;

/// Book files in the asset store.
pub mod shelf;

// === Runtime ===

/// Runtime configuration.
pub mod config;

/// REST API.
pub mod api;

// === Re-exports ===

pub use auth::{Credential, Scope, Vault};
pub use config::SyncConfig;
pub use gateway::{ContentRecord, DesiredRecord, GatewayError, PostStatus};
pub use hosting::{AssetHost, HostError};
pub use reconcile::{ReconcilePolicy, ReconciliationReport, Reconciler, SyncError, ValidationResult};

//! # Storage Module
//!
//! The Local Store: a durable on-device cache of profiles, contacts,
//! conversation summaries and messages. It is fast and possibly stale; the
//! remote store stays authoritative.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         LOCAL STORE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite Database                                                │   │
//! │  │  ───────────────                                                 │   │
//! │  │  • users         - cached profiles                              │   │
//! │  │  • contacts      - unique per (owner, contact)                  │   │
//! │  │  • conversations - summaries + participant join table           │   │
//! │  │  • messages      - keyed by message id                          │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │ StoreChange                           │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Change feed (tokio broadcast)                                  │   │
//! │  │  Reactive queries re-run their SELECT when a change touches     │   │
//! │  │  the rows they watch.                                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One `Database` is opened per process and shared by `Arc` with every
//! repository.

mod database;
mod schema;

pub use database::{Database, StoreChange};
pub use schema::SCHEMA_VERSION;

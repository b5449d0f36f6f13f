//! # Tidewire Testkit
//!
//! Testing utilities shared across the tidewire crates.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a scripted [`ChangeStore`](tidewire_store::ChangeStore)
//!   implementation for driving the sync streams through exact scenarios,
//!   plus helpers for building change batches
//! - **Generators**: proptest strategies for the core value types
//!
//! ## Fixtures
//!
//! ```rust
//! use tidewire_core::{SeqPair, SiteId};
//! use tidewire_testkit::fixtures::{make_changes, ScriptedStore};
//!
//! let store = ScriptedStore::new(SiteId::from_bytes([1; 16]));
//! store.push_ready(make_changes(&[5, 6, 9]));
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tidewire_testkit::generators;
//!
//! proptest! {
//!     #[test]
//!     fn ordering_is_total(a in generators::seq_pair(), b in generators::seq_pair()) {
//!         prop_assert!(a <= b || b <= a);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{make_changes, PullRecord, ScriptedStore};

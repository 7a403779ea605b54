//! Cairn Store: a persistent, embeddable triple-store resolver.
//!
//! Maps `(subject URN, attribute) → ordered list of values` for the
//! metadata layer of an evidence store. Subjects and attributes are
//! interned into compact 32-bit IDs, values live in an append-only log as
//! reverse-linked lists, and an index maps composite `"<sid>:<aid>"` keys
//! to list heads. Subjects can inherit attributes from a parent chain and
//! be advisory-locked across processes.
//!
//! # API Surface
//!
//! - [`resolver::Resolver`] — open a store directory; add/set/delete/
//!   resolve statements, export, lock subjects
//! - [`rdf::RdfSerializer`] — stream one subject's triples to a sink
//! - [`kvfile::KvFile`] — the embedded key-value table, usable standalone
//!
//! # Module Dependency Direction
//!
//! `error` ← `kvfile` ← `registry` ← `resolver` ← `rdf`
//!
//! One-way only. `vlog` and `flock` are leaves: `vlog` is consumed by the
//! resolver, `flock` by every module that touches file locks. The crate
//! denies `unsafe` code except in `flock`, the `fcntl` veneer.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[allow(unsafe_code)]
mod flock;
pub mod kvfile;
pub mod rdf;
pub mod registry;
pub mod resolver;
pub mod vlog;

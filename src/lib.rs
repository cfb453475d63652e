//! `relay-flow`: a declarative API-integration runtime. A manifest of
//! services, schema messages, flows, and proxies is loaded, statically
//! typed and reference-resolved, then executed as a concurrent DAG with
//! compensating rollback on failure.
//!
//! Pipeline: [`config::load_manifest`] -> [`dependencies::resolve_manifest_dependencies`]
//! -> [`definer::define_manifest`] -> a [`manager::Manager`] built per flow,
//! driving [`caller::Caller`] implementations against a [`store::ReferenceStore`].

pub mod caller;
pub mod config;
pub mod definer;
pub mod dependencies;
pub mod error;
pub mod lookup;
pub mod manager;
pub mod manifest;
pub mod property;
pub mod store;
pub mod tracker;

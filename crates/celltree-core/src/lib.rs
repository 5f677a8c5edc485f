//! Resource-tree engine for a multi-tenant hierarchical store.
//!
//! Each tenant ("Cell") owns a tree of Boxes, collections and files that
//! behaves like a WebDAV filesystem while being persisted in a schema-less
//! document store that offers only per-document optimistic versioning.
//!
//! The entry point is [`Engine`], which wires a [`store::DocumentStore`], a
//! [`blob::BinaryDataAccessor`], the [`lock::LockManager`] and the
//! [`cache::MetadataCache`] together and hands out
//! [`component::ResourceComponent`] handles for paths inside a Box.

pub mod acl;
pub mod auth;
pub mod blob;
pub mod cache;
pub mod cell;
pub mod component;
pub mod config;
pub mod control;
pub mod destination;
pub mod engine;
pub mod error;
pub mod etag;
pub mod lock;
pub mod lock_metrics;
pub mod move_exec;
pub mod node;
pub mod path;
pub mod purge;
pub mod query;
pub mod range;
pub mod store;

pub use component::ResourceComponent;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{DavError, DavResult};
pub use path::ResourcePath;

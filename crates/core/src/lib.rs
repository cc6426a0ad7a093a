pub mod browser;
pub mod config;
pub mod connection_cache;
pub mod health;
pub mod lazy_mount;
pub mod memory;
pub mod mutation;
pub mod remote;
pub mod session;
pub mod store;
pub mod tree;

pub use store::{
    Connector, CredentialPair, DatabaseDescriptor, Document, DocumentStore, ListQuery, Page,
    Pagination, QueryType, SortOrder, StatsDescriptor, StoreError,
};

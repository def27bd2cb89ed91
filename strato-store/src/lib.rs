pub mod blob;
pub mod cache;
pub mod persist;
pub mod store;

#[cfg(feature = "etcd")]
pub mod etcd;

#[cfg(feature = "etcd")]
pub mod schema;

pub use blob::BlobStore;
pub use cache::RecordCache;
pub use store::PluginStore;

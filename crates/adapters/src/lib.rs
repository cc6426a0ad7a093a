pub mod http;
pub mod secrets;

pub use http::{HttpConnection, HttpConnector, HttpHealthProbe};
pub use secrets::KeyringKeyValueStore;

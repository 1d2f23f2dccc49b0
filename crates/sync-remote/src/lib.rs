//! HTTP implementation of [`sync_core::RemoteClient`] for the remote storage
//! server's REST API.

mod http_client;

pub use http_client::HttpRemoteClient;

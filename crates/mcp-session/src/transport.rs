//! Transports carrying JSON-RPC messages between MCP peers.
//!
//! | side   | module                   | feature                            |
//! |--------|--------------------------|------------------------------------|
//! | server | [`streamable_http_server`] | `transport-streamable-http-server` |
//! | client | [`streamable_http_client`] | `client`                           |
//!
//! The server side keeps a per-session [`event_store::EventStore`] so SSE
//! streams can be resumed with `last-event-id`.

pub mod common;

#[cfg(feature = "server")]
pub mod event_store;

#[cfg(feature = "transport-streamable-http-server")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport-streamable-http-server")))]
pub mod streamable_http_server;
#[cfg(feature = "transport-streamable-http-server")]
pub use streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod streamable_http_client;
#[cfg(feature = "client")]
pub use streamable_http_client::StreamableHttpClient;

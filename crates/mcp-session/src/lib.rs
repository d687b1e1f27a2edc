#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;

/// JSON-RPC envelope and MCP payload types
pub mod model;
pub use model::ErrorData;

#[cfg(feature = "server")]
pub mod handler;
#[cfg(feature = "server")]
pub use handler::server::{McpServer, Peer, RequestContext, wrapper::Json};

#[cfg(feature = "client")]
pub mod service;
#[cfg(feature = "client")]
pub use service::client::{ClientError, ErrorKind, McpClientAdapter};

#[cfg(any(feature = "client", feature = "server"))]
pub mod transport;

// re-export
#[cfg(any(feature = "server", feature = "schemars"))]
pub use schemars;

//! JSON-RPC 2.0 over `Content-Length` framed byte streams.
pub mod connection;
pub mod error;
pub mod framing;
pub mod handler;
pub mod message_parser;
pub(crate) mod pending;
pub mod transport;
pub mod types;

pub use connection::Connection;
pub use error::{FramingError, RpcError};
pub use handler::{EchoHandler, Handler, NullHandler};
pub use transport::header_stream;

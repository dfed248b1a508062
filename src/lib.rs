#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod builder;
pub mod conn;
pub mod error;
pub mod parser;
pub mod request;
pub mod response;

pub use builder::{Authority, BuiltMessage, MessageBuilder};
pub use conn::{ConnState, DEFAULT_TIMEOUT, IcapConnection};
pub use error::{BuildError, ConnError, ProtocolError};
pub use parser::{
    ChunkDecoder, ChunkResult, EmbeddedHead, Encapsulated, HttpHead, ParseEvent, ResponseParser,
};
pub use request::{EmbeddedHttp, Method, Request};
pub use response::{Response, StatusCode};

/// Lib version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Max header block size accepted from a server.
pub const MAX_HDR_BYTES: usize = 64 * 1024;
/// Supported ICAP protocol version.
pub const ICAP_VERSION: &str = "ICAP/1.0";
/// Default ICAP server port.
pub const DEFAULT_PORT: u16 = 1344;

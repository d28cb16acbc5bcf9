//! # EsRPC
//!
//! The packet layer of the engine's stdio protocol, built on `espack` values.
//!
//! ## Architecture
//!
//! - **Packet**: one request or response, correlated by a 31-bit call id.
//! - **FrameBuffer**: reassembles length-prefixed frames from an arbitrary byte stream.
//! - **Schema**: the known commands and the payload fields each one must carry.
//!
//! ## Wire Format
//!
//! ```text
//! [Length: u32][Header: u32][Value: Map]
//! Header = (id << 1) | is_response
//! ```
//!
//! The length excludes itself. Nothing here interprets payload contents
//! beyond the presence checks in `schema`.

pub mod error;
pub mod frame;
pub mod packet;
pub mod schema;


pub use error::Error;
pub use error::Result;
pub use frame::FrameBuffer;
pub use frame::DEFAULT_MAX_FRAME_SIZE;
pub use packet::CallId;
pub use packet::Packet;
pub use packet::MAX_CALL_ID;
pub use packet::decode_all;
pub use packet::peek_header;

pub use espack::Map;
pub use espack::Value;

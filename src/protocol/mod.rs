//! Kafka wire protocol framing
//!
//! Frame-level request parsing and response encoding. The request payload
//! past the fixed header is opaque to this layer; API message codecs live
//! with the request handlers.

mod frame;

pub use frame::{
    encode_request, read_frame_size, read_header, read_payload, RequestHeader, Response,
    REQUEST_HEADER_BYTES, SIZE_PREFIX_BYTES,
};

//! Kafka wire framing
//!
//! Requests arrive as `i32 size` (big-endian, excluding the size field)
//! followed by `size` bytes: the fixed request header, an optional client id,
//! and an opaque payload. Responses are written as `i32 size` (including the
//! correlation id), `i32 correlation_id`, then the payload chunks.
//!
//! Full API message codecs are out of scope here; only the fixed header is
//! parsed and the payload travels as opaque bytes.

use crate::config::MAX_CLIENT_ID_LENGTH;
use crate::error::{Result, TidelogError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed request header prefix: api_key(2) + api_version(2) +
/// correlation_id(4) + client_id_size(2)
pub const REQUEST_HEADER_BYTES: usize = 10;

/// Size of the frame length prefix
pub const SIZE_PREFIX_BYTES: usize = 4;

/// Wire value meaning "no client id"
const NO_CLIENT_ID: i16 = -1;

/// Parsed fixed request header
///
/// `client_id` is `None` for the wire value -1, `Some("")` for an explicit
/// zero-length id, and `Some(id)` otherwise. Client id bytes are validated
/// as UTF-8 at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl RequestHeader {
    /// Bytes this header occupied on the wire, including the client id
    pub fn wire_len(&self) -> usize {
        REQUEST_HEADER_BYTES + self.client_id.as_deref().map_or(0, str::len)
    }

    /// Client id as a str, empty when absent
    pub fn client_id_str(&self) -> &str {
        self.client_id.as_deref().unwrap_or("")
    }
}

/// Read the 4-byte size prefix of the next request frame
///
/// Returns `Ok(None)` on a clean EOF at the frame boundary (the client
/// closed the connection between requests). A negative size is a fatal
/// framing error.
pub async fn read_frame_size<R>(reader: &mut R) -> Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; SIZE_PREFIX_BYTES];
    match reader.read_exact(&mut size_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = i32::from_be_bytes(size_buf);
    if size < 0 {
        return Err(TidelogError::InvalidRequestSize(size));
    }
    Ok(Some(size as usize))
}

/// Read and parse the fixed request header, including the client id
///
/// EOF inside the header is a fatal framing error; invalid UTF-8 or an
/// oversized client id rejects the connection before any payload is read.
pub async fn read_header<R>(reader: &mut R) -> Result<RequestHeader>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; REQUEST_HEADER_BYTES];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_header_eof(e, "request header"))?;

    let mut cursor = &buf[..];
    let api_key = cursor.get_i16();
    let api_version = cursor.get_i16();
    let correlation_id = cursor.get_i32();
    let client_id_size = cursor.get_i16();

    let client_id = match client_id_size {
        NO_CLIENT_ID => None,
        0 => Some(String::new()),
        n if n > 0 => {
            let len = n as usize;
            if len > MAX_CLIENT_ID_LENGTH {
                return Err(TidelogError::InvalidClientId(format!(
                    "client id length {} exceeds maximum {}",
                    len, MAX_CLIENT_ID_LENGTH
                )));
            }
            let mut id_buf = vec![0u8; len];
            reader
                .read_exact(&mut id_buf)
                .await
                .map_err(|e| map_header_eof(e, "client id"))?;
            let id = String::from_utf8(id_buf).map_err(|e| {
                TidelogError::InvalidClientId(format!("client id is not valid UTF-8: {}", e))
            })?;
            Some(id)
        }
        n => {
            return Err(TidelogError::framing(format!(
                "invalid client id length {}",
                n
            )))
        }
    };

    Ok(RequestHeader {
        api_key,
        api_version,
        correlation_id,
        client_id,
    })
}

/// Read the opaque request payload that follows the header
///
/// `frame_size` is the value from the size prefix; the payload is whatever
/// remains after the header and client id.
pub async fn read_payload<R>(
    reader: &mut R,
    frame_size: usize,
    header: &RequestHeader,
) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let header_len = header.wire_len();
    let remaining = frame_size.checked_sub(header_len).ok_or_else(|| {
        TidelogError::framing(format!(
            "frame size {} smaller than header length {}",
            frame_size, header_len
        ))
    })?;

    let mut payload = BytesMut::zeroed(remaining);
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| map_header_eof(e, "request payload"))?;
    Ok(payload.freeze())
}

fn map_header_eof(e: std::io::Error, what: &str) -> TidelogError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TidelogError::framing(format!("unexpected EOF reading {}", what))
    } else {
        e.into()
    }
}

/// Encode a request frame for the client side of the wire
///
/// Used by peers and tests; the server only decodes requests.
pub fn encode_request(header: &RequestHeader, payload: &[u8]) -> Vec<u8> {
    let client_id_len = header.client_id.as_deref().map_or(0, str::len);
    let size = REQUEST_HEADER_BYTES + client_id_len + payload.len();

    let mut buf = Vec::with_capacity(SIZE_PREFIX_BYTES + size);
    buf.put_i32(size as i32);
    buf.put_i16(header.api_key);
    buf.put_i16(header.api_version);
    buf.put_i32(header.correlation_id);
    match &header.client_id {
        None => buf.put_i16(NO_CLIENT_ID),
        Some(id) => {
            buf.put_i16(id.len() as i16);
            buf.put_slice(id.as_bytes());
        }
    }
    buf.put_slice(payload);
    buf
}

/// A response ready to be written back to the client
///
/// The payload may be scattered across several chunks; they are written
/// back-to-back after the correlation id without intermediate copies.
#[derive(Debug, Clone)]
pub struct Response {
    pub correlation_id: i32,
    pub chunks: Vec<Bytes>,
}

impl Response {
    /// Response with a single payload chunk
    pub fn new(correlation_id: i32, payload: Bytes) -> Self {
        Self {
            correlation_id,
            chunks: vec![payload],
        }
    }

    /// Response with no payload
    pub fn empty(correlation_id: i32) -> Self {
        Self {
            correlation_id,
            chunks: Vec::new(),
        }
    }

    /// Total payload length across all chunks
    pub fn payload_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Bytes this response occupies on the wire, including the size prefix
    pub fn wire_len(&self) -> usize {
        SIZE_PREFIX_BYTES + 4 + self.payload_len()
    }

    /// Write the framed response: size prefix, correlation id, chunks
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let size = (4 + self.payload_len()) as i32;
        let mut head = [0u8; 8];
        head[..4].copy_from_slice(&size.to_be_bytes());
        head[4..].copy_from_slice(&self.correlation_id.to_be_bytes());
        writer.write_all(&head).await?;
        for chunk in &self.chunks {
            writer.write_all(chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(correlation_id: i32, client_id: Option<&str>) -> RequestHeader {
        RequestHeader {
            api_key: 0,
            api_version: 9,
            correlation_id,
            client_id: client_id.map(str::to_string),
        }
    }

    async fn decode_frame(wire: &[u8]) -> Result<(RequestHeader, Bytes)> {
        let mut reader = wire;
        let size = read_frame_size(&mut reader).await?.expect("frame present");
        let header = read_header(&mut reader).await?;
        let payload = read_payload(&mut reader, size, &header).await?;
        Ok((header, payload))
    }

    #[tokio::test]
    async fn test_roundtrip_with_client_id() {
        let wire = encode_request(&header(7, Some("t")), b"hello");
        let (decoded, payload) = decode_frame(&wire).await.unwrap();
        assert_eq!(decoded.correlation_id, 7);
        assert_eq!(decoded.client_id.as_deref(), Some("t"));
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_null_client_id() {
        let wire = encode_request(&header(1, None), b"x");
        let (decoded, _) = decode_frame(&wire).await.unwrap();
        assert_eq!(decoded.client_id, None);
        assert_eq!(decoded.wire_len(), REQUEST_HEADER_BYTES);
    }

    #[tokio::test]
    async fn test_empty_client_id() {
        let wire = encode_request(&header(2, Some("")), b"");
        let (decoded, payload) = decode_frame(&wire).await.unwrap();
        assert_eq!(decoded.client_id.as_deref(), Some(""));
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_32_byte_utf8_client_id() {
        let id = "produkt-strömmar-ö-12345678901"; // 32 bytes of UTF-8
        assert_eq!(id.len(), 32);
        let wire = encode_request(&header(3, Some(id)), b"payload");
        let (decoded, _) = decode_frame(&wire).await.unwrap();
        assert_eq!(decoded.client_id.as_deref(), Some(id));
    }

    #[tokio::test]
    async fn test_negative_size_is_fatal() {
        let wire = (-5i32).to_be_bytes();
        let mut reader = &wire[..];
        let err = read_frame_size(&mut reader).await.unwrap_err();
        assert!(matches!(err, TidelogError::InvalidRequestSize(-5)));
    }

    #[tokio::test]
    async fn test_eof_at_boundary_is_clean() {
        let mut reader: &[u8] = &[];
        assert!(read_frame_size(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_header_is_framing_error() {
        // Size promises a full header but only two bytes follow.
        let mut wire = Vec::new();
        wire.extend_from_slice(&10i32.to_be_bytes());
        wire.extend_from_slice(&[0, 0]);
        let mut reader = &wire[..];
        let _ = read_frame_size(&mut reader).await.unwrap();
        let err = read_header(&mut reader).await.unwrap_err();
        assert!(matches!(err, TidelogError::Framing(_)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_client_id_rejected() {
        let mut wire = Vec::new();
        let size = REQUEST_HEADER_BYTES + 2;
        wire.extend_from_slice(&(size as i32).to_be_bytes());
        wire.extend_from_slice(&0i16.to_be_bytes()); // api_key
        wire.extend_from_slice(&0i16.to_be_bytes()); // api_version
        wire.extend_from_slice(&9i32.to_be_bytes()); // correlation_id
        wire.extend_from_slice(&2i16.to_be_bytes()); // client_id_size
        wire.extend_from_slice(&[0xff, 0xfe]); // not UTF-8

        let mut reader = &wire[..];
        let _ = read_frame_size(&mut reader).await.unwrap();
        let err = read_header(&mut reader).await.unwrap_err();
        assert!(matches!(err, TidelogError::InvalidClientId(_)));
    }

    #[tokio::test]
    async fn test_oversized_client_id_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&1000i32.to_be_bytes());
        wire.extend_from_slice(&0i16.to_be_bytes());
        wire.extend_from_slice(&0i16.to_be_bytes());
        wire.extend_from_slice(&1i32.to_be_bytes());
        wire.extend_from_slice(&300i16.to_be_bytes());
        wire.extend_from_slice(&[b'a'; 300]);

        let mut reader = &wire[..];
        let _ = read_frame_size(&mut reader).await.unwrap();
        let err = read_header(&mut reader).await.unwrap_err();
        assert!(matches!(err, TidelogError::InvalidClientId(_)));
    }

    #[tokio::test]
    async fn test_frame_smaller_than_header_rejected() {
        let h = header(4, Some("abc"));
        // Claimed frame size shorter than the header actually read.
        let err = read_payload(&mut &[][..], 5, &h).await.unwrap_err();
        assert!(matches!(err, TidelogError::Framing(_)));
    }

    #[tokio::test]
    async fn test_response_wire_format() {
        let response = Response::new(7, Bytes::from_static(b"abcd"));
        let mut out = Vec::new();
        response.write_to(&mut out).await.unwrap();

        assert_eq!(&out[..4], &8i32.to_be_bytes()); // 4 (corr id) + 4 payload
        assert_eq!(&out[4..8], &7i32.to_be_bytes());
        assert_eq!(&out[8..], b"abcd");
        assert_eq!(response.wire_len(), out.len());
    }

    #[tokio::test]
    async fn test_response_scattered_chunks_concatenate() {
        let response = Response {
            correlation_id: 1,
            chunks: vec![
                Bytes::from_static(b"ab"),
                Bytes::from_static(b""),
                Bytes::from_static(b"cd"),
            ],
        };
        let mut out = Vec::new();
        response.write_to(&mut out).await.unwrap();
        assert_eq!(&out[8..], b"abcd");
    }
}

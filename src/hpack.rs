//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! Thin wrapper around `fluke-hpack` providing the H2Header type, the
//! decoder/encoder interfaces used by the frame codec, and the header
//! classification the decoder reports alongside each decoded field.

/// A decoded HTTP/2 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// HPACK decoding failed; the connection's dynamic table is now unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("HPACK decode error: {0}")]
pub struct HpackError(String);

/// Well-known header names, so consumers can match without string compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderName {
    Method,
    Scheme,
    Authority,
    Path,
    Status,
    Protocol,
    Cookie,
    SetCookie,
    Host,
    Connection,
    ContentLength,
    ContentType,
    ContentEncoding,
    Expect,
    TransferEncoding,
    Te,
    Trailer,
    Upgrade,
    KeepAlive,
    ProxyConnection,
    Other,
}

impl HeaderName {
    /// Classify an already-lowercase header name.
    pub fn from_lowercase(name: &str) -> Self {
        match name {
            ":method" => Self::Method,
            ":scheme" => Self::Scheme,
            ":authority" => Self::Authority,
            ":path" => Self::Path,
            ":status" => Self::Status,
            ":protocol" => Self::Protocol,
            "cookie" => Self::Cookie,
            "set-cookie" => Self::SetCookie,
            "host" => Self::Host,
            "connection" => Self::Connection,
            "content-length" => Self::ContentLength,
            "content-type" => Self::ContentType,
            "content-encoding" => Self::ContentEncoding,
            "expect" => Self::Expect,
            "transfer-encoding" => Self::TransferEncoding,
            "te" => Self::Te,
            "trailer" => Self::Trailer,
            "upgrade" => Self::Upgrade,
            "keep-alive" => Self::KeepAlive,
            "proxy-connection" => Self::ProxyConnection,
            _ => Self::Other,
        }
    }

    pub fn is_pseudo(self) -> bool {
        matches!(
            self,
            Self::Method | Self::Scheme | Self::Authority | Self::Path | Self::Status | Self::Protocol
        )
    }

    /// Connection-specific fields are forbidden in HTTP/2 (RFC 7540 Section 8.1.2.2).
    fn is_connection_specific(self) -> bool {
        matches!(
            self,
            Self::Connection | Self::KeepAlive | Self::ProxyConnection | Self::TransferEncoding | Self::Upgrade
        )
    }
}

/// What role a header block plays in the message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBlock {
    /// 1xx response headers; zero or more precede the main block.
    Informational,
    /// Request or final response headers.
    Main,
    /// Trailers after the body; carry no pseudo-headers.
    Trailing,
}

/// Classify a complete header block and report whether it is malformed.
///
/// Informational blocks carry a 1xx `:status`, trailing blocks carry no
/// pseudo-headers, anything else is a main block.
pub fn classify_block(headers: &[H2Header]) -> (HeaderBlock, bool) {
    let mut block = HeaderBlock::Trailing;
    let mut malformed = false;
    let mut seen_regular = false;

    for header in headers {
        let name = HeaderName::from_lowercase(&header.name);
        if header.name.bytes().any(|b| b.is_ascii_uppercase()) || header.name.is_empty() {
            malformed = true;
        }
        if header.is_pseudo() {
            if seen_regular || !name.is_pseudo() {
                malformed = true;
            }
            block = HeaderBlock::Main;
            if name == HeaderName::Status && header.value.starts_with('1') && header.value.len() == 3 {
                block = HeaderBlock::Informational;
            }
        } else {
            seen_regular = true;
            if name.is_connection_specific() || (name == HeaderName::Te && header.value != "trailers") {
                malformed = true;
            }
        }
    }

    (block, malformed)
}

/// HPACK decoder for HTTP/2 header blocks.
/// Wraps `fluke_hpack::Decoder` which maintains dynamic table state per-connection.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }

    /// Decode an HPACK-encoded header block into H2Headers.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<H2Header>, HpackError> {
        let pairs = self
            .inner
            .decode(data)
            .map_err(|e| HpackError(format!("{:?}", e)))?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| {
                H2Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

/// HPACK encoder for HTTP/2 header blocks.
/// Wraps `fluke_hpack::Encoder` which maintains dynamic table state per-connection.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encode headers into an HPACK header block.
    pub fn encode(&mut self, headers: &[H2Header]) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_bytes(), h.value.as_bytes()))
            .collect();
        self.inner.encode(pairs)
    }
}

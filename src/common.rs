use http::StatusCode;

pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Builds the proxy's own synthesized responses: `HTTP/1.1 <status>\r\n\r\n<body>`.
pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn status_line(status: StatusCode) -> String {
        format!(
            "HTTP/1.1 {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
    }

    pub fn error(status: StatusCode, message: &str) -> Vec<u8> {
        let mut out = Self::status_line(status).into_bytes();
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(message.as_bytes());
        out
    }
}

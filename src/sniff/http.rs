//! HTTP/1.x Host extraction

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use url::Url;

use super::peek::Rewind;
use crate::error::SniffError;

/// Header slots tried first; doubled while httparse runs out of them.
const INITIAL_HEADERS: usize = 64;
/// Shortest possible header line: `a:\r\n`.
const MIN_HEADER_LINE: usize = 4;
const MAX_HEAD_LEN: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

/// Peek one HTTP request head from `stream` and return its target host.
///
/// The host comes from an absolute-form request target or a CONNECT
/// authority, falling back to the `Host` header. Any `:port` suffix is
/// removed. `Ok(None)` means the request carried no host at all.
pub async fn read_http_host<T>(stream: &mut Rewind<T>) -> Result<Option<String>, SniffError>
where
    T: AsyncRead + Unpin,
{
    let mut peek = stream.peek();
    let mut head = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = peek.read(&mut chunk).await.map_err(SniffError::from_read)?;
        if n == 0 {
            return Err(SniffError::Http(
                "connection closed before the request head was complete".to_string(),
            ));
        }
        head.extend_from_slice(&chunk[..n]);

        if let Some(parsed) = parse_head(&head)? {
            debug!(
                head_len = parsed.len,
                consumed = peek.consumed(),
                method = %parsed.method,
                host = parsed.host.as_deref().unwrap_or(""),
                "peeked HTTP request head"
            );
            return Ok(parsed.host);
        }

        if head.len() >= MAX_HEAD_LEN {
            return Err(SniffError::Http(format!(
                "request head exceeds {} bytes",
                MAX_HEAD_LEN
            )));
        }
    }
}

struct ParsedHead {
    len: usize,
    method: String,
    host: Option<String>,
}

/// Parse `head` if it holds a complete request head; `Ok(None)` asks for more.
///
/// The number of header fields is only limited by the head size.
fn parse_head(head: &[u8]) -> Result<Option<ParsedHead>, SniffError> {
    let mut slots = INITIAL_HEADERS;
    loop {
        let mut headers = vec![httparse::EMPTY_HEADER; slots];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(head) {
            Ok(httparse::Status::Complete(len)) => {
                return Ok(Some(ParsedHead {
                    len,
                    method: req.method.unwrap_or("").to_string(),
                    host: request_host(&req)?,
                }))
            }
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(httparse::Error::TooManyHeaders) if slots <= head.len() / MIN_HEADER_LINE => {
                slots *= 2;
            }
            Err(e) => return Err(SniffError::Http(e.to_string())),
        }
    }
}

fn request_host(req: &httparse::Request<'_, '_>) -> Result<Option<String>, SniffError> {
    if let Some(target) = req.path {
        if req.method == Some("CONNECT") {
            let host = strip_port(target);
            if !host.is_empty() {
                return Ok(Some(host.to_string()));
            }
        } else if is_absolute_form(target) {
            let url = Url::parse(target)
                .map_err(|e| SniffError::Http(format!("bad request target: {}", e)))?;
            if let Some(host) = url.host_str() {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                if !host.is_empty() {
                    return Ok(Some(host.to_string()));
                }
            }
        }
    }

    let Some(header) = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
    else {
        return Ok(None);
    };

    let value = std::str::from_utf8(header.value)
        .map_err(|_| SniffError::Http("Host header is not valid UTF-8".to_string()))?;
    let host = strip_port(value.trim());
    Ok(if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    })
}

/// `scheme://authority/...`; origin-form targets start with `/` even when
/// their query carries a URL.
fn is_absolute_form(target: &str) -> bool {
    !target.starts_with('/') && target.contains("://")
}

/// Remove a trailing `:port` from an authority, unwrapping IPv6 brackets.
fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        };
    }
    match authority.rsplit_once(':') {
        // A bare IPv6 literal has more than one colon and no port.
        Some((host, _)) if !host.contains(':') => host,
        _ => authority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn host_of(data: &[u8]) -> Result<Option<String>, SniffError> {
        let mut stream = Rewind::new(data);
        let result = read_http_host(&mut stream).await;

        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, data);
        result
    }

    #[tokio::test]
    async fn test_host_header() {
        let host = host_of(b"GET / HTTP/1.1\r\nHost: example.org\r\n\r\nbody")
            .await
            .unwrap();
        assert_eq!(host.as_deref(), Some("example.org"));
    }

    #[tokio::test]
    async fn test_host_header_port_is_stripped() {
        let host = host_of(b"GET / HTTP/1.1\r\nhost: example.org:8080\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(host.as_deref(), Some("example.org"));
    }

    #[tokio::test]
    async fn test_absolute_form_target_wins() {
        let host = host_of(b"GET http://origin.example:81/x HTTP/1.1\r\nHost: other\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(host.as_deref(), Some("origin.example"));
    }

    #[tokio::test]
    async fn test_url_in_query_uses_host_header() {
        let host = host_of(
            b"GET /login?next=https://example.com/home HTTP/1.1\r\nHost: app.example\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(host.as_deref(), Some("app.example"));
    }

    #[tokio::test]
    async fn test_absolute_target_without_host_falls_back() {
        let host = host_of(b"GET file:///etc/motd HTTP/1.1\r\nHost: files.example\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(host.as_deref(), Some("files.example"));
    }

    #[tokio::test]
    async fn test_many_header_fields() {
        let mut request = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..130 {
            request.extend_from_slice(format!("X-H{}: {}\r\n", i, i).as_bytes());
        }
        request.extend_from_slice(b"Host: many.example\r\n\r\n");

        let host = host_of(&request).await.unwrap();
        assert_eq!(host.as_deref(), Some("many.example"));
    }

    #[tokio::test]
    async fn test_connect_authority() {
        let host = host_of(b"CONNECT tunnel.example:443 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(host.as_deref(), Some("tunnel.example"));
    }

    #[tokio::test]
    async fn test_missing_host_is_empty() {
        let host = host_of(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        assert_eq!(host, None);
    }

    #[tokio::test]
    async fn test_garbage_is_rejected() {
        let err = host_of(b"\x00\x01\x02 not http at all\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, SniffError::Http(_)));
    }

    #[tokio::test]
    async fn test_incomplete_head_is_rejected() {
        let err = host_of(b"GET / HTTP/1.1\r\nHost: exa").await.unwrap_err();
        assert!(matches!(err, SniffError::Http(_)));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:443"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("[2001:db8::1]"), "2001:db8::1");
        assert_eq!(strip_port("2001:db8::1"), "2001:db8::1");
    }
}

use axum::http::StatusCode;
use serde::Serialize;
use std::fmt;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const CONTENT_TYPE_JSON: &str = "application/json ;charset=UTF-8";

const MAX_LINE_LEN: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;

#[derive(Debug)]
pub enum RequestError {
    Closed,
    Malformed(&'static str),
    TooLarge(usize),
    Io(io::Error),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed mid-request"),
            Self::Malformed(reason) => write!(f, "malformed request: {reason}"),
            Self::TooLarge(len) => write!(f, "request too large: {len} bytes"),
            Self::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<io::Error> for RequestError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Closed
        } else {
            Self::Io(err)
        }
    }
}

impl RequestError {
    pub fn warrants_reply(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::TooLarge(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    // lower-cased names
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub async fn read_request<R>(reader: &mut R, max_body: usize) -> Result<Request, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let line = match read_line(reader).await? {
        Some(line) => line,
        None => return Err(RequestError::Closed),
    };
    tracing::debug!(request_line = %line.trim_end(), "request line");
    let (method, path) = parse_request_line(&line)?;

    let mut headers = Vec::new();
    loop {
        let Some(line) = read_line(reader).await? else {
            break;
        };
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(RequestError::Malformed("too many headers"));
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let content_length = match headers.iter().find(|(name, _)| name == "content-length") {
        Some((_, value)) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid content-length"))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(RequestError::TooLarge(content_length));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') && n == MAX_LINE_LEN {
        return Err(RequestError::Malformed("line too long"));
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| RequestError::Malformed("non utf-8 header"))
}

fn parse_request_line(line: &str) -> Result<(String, String), RequestError> {
    // The controller sends "GET /api/myactions HTTP/1.1 \r\n", trailing blank included.
    let mut parts = line.trim_end_matches([' ', '\t', '\r', '\n']).split_whitespace();
    let method = parts
        .next()
        .ok_or(RequestError::Malformed("missing method"))?;
    let target = parts.next().ok_or(RequestError::Malformed("missing path"))?;
    if let Some(version) = parts.next() {
        if !version.starts_with("HTTP/") {
            return Err(RequestError::Malformed("bad http version"));
        }
    }
    if !target.starts_with('/') {
        return Err(RequestError::Malformed("bad request target"));
    }
    let path = target.split_once('?').map_or(target, |(path, _)| path);
    Ok((method.to_ascii_uppercase(), path.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl Response {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    pub fn json<T: Serialize>(status: StatusCode, payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(mut body) => {
                body.push(b'\n');
                Self { status, body }
            }
            Err(err) => {
                tracing::error!(error = %err, "response encode failed");
                Self::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }

    pub fn error(status: StatusCode, message: &str) -> Self {
        let mut body = serde_json::json!({ "error": message }).to_string().into_bytes();
        body.push(b'\n');
        Self { status, body }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: {}\r\n\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown"),
            self.body.len(),
            CONTENT_TYPE_JSON,
        );
        let mut out = Vec::with_capacity(head.len() + self.body.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        // The controller does a single recv; a split response is lost.
        let bytes = self.to_bytes();
        writer.write_all(&bytes).await?;
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::BufReader;

    async fn parse(raw: &[u8]) -> Result<Request, RequestError> {
        let mut reader = BufReader::new(raw);
        read_request(&mut reader, 1024).await
    }

    #[tokio::test]
    async fn parses_request_with_trailing_space_on_request_line() {
        let req = parse(b"GET /api/serverinfos HTTP/1.1 \r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/serverinfos");
        assert_eq!(req.header("HOST"), Some("x"));
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn reads_body_by_content_length() {
        let req = parse(b"POST /api/mystatus HTTP/1.0\r\ncontent-LENGTH:  5 \r\n\r\nhelloEXTRA")
            .await
            .unwrap();
        assert_eq!(req.body, b"hello");
    }

    #[tokio::test]
    async fn strips_query_and_accepts_missing_version() {
        let req = parse(b"get /api/myactions?x=1\n\n").await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/myactions");
    }

    #[tokio::test]
    async fn rejects_missing_path() {
        let err = parse(b"GET\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, RequestError::Malformed("missing path")));
        assert!(err.warrants_reply());
    }

    #[tokio::test]
    async fn rejects_bad_content_length_and_oversize_body() {
        let err = parse(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));

        let err = parse(b"POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::TooLarge(4096)));
    }

    #[tokio::test]
    async fn truncated_body_is_treated_as_closed() {
        let err = parse(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Closed));
        assert!(!err.warrants_reply());
    }

    #[tokio::test]
    async fn empty_connection_is_closed() {
        assert!(matches!(parse(b"").await, Err(RequestError::Closed)));
    }

    fn with_headers(count: usize) -> Vec<u8> {
        let mut raw = b"GET /health HTTP/1.1\r\n".to_vec();
        for i in 0..count {
            raw.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        raw
    }

    #[tokio::test]
    async fn header_count_is_capped() {
        let req = parse(&with_headers(MAX_HEADERS)).await.unwrap();
        assert_eq!(req.headers.len(), MAX_HEADERS);

        let err = parse(&with_headers(MAX_HEADERS + 1)).await.unwrap_err();
        assert!(matches!(err, RequestError::Malformed("too many headers")));
        assert!(err.warrants_reply());
    }

    #[tokio::test]
    async fn overlong_lines_are_rejected() {
        let mut raw = b"GET /health HTTP/1.1\r\nX-Long: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN + 16));
        raw.extend_from_slice(b"\r\n\r\n");
        let err = parse(&raw).await.unwrap_err();
        assert!(matches!(err, RequestError::Malformed("line too long")));

        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        assert!(matches!(
            parse(&raw).await,
            Err(RequestError::Malformed("line too long"))
        ));
    }

    #[tokio::test]
    async fn line_just_under_the_cap_is_accepted() {
        let mut raw = b"GET /health HTTP/1.1\r\nX-Long: ".to_vec();
        let used = "X-Long: ".len() + 2;
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN - used));
        raw.extend_from_slice(b"\r\n\r\n");
        let req = parse(&raw).await.unwrap();
        assert_eq!(req.header("x-long").map(str::len), Some(MAX_LINE_LEN - used));
    }

    #[test]
    fn renders_exact_header_block() {
        let response = Response::json(StatusCode::OK, &serde_json::json!({"status": "ok"}));
        let text = String::from_utf8(response.to_bytes()).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\n\
             Connection: close\r\n\
             Content-Length: 16\r\n\
             Content-Type: application/json ;charset=UTF-8\r\n\
             \r\n\
             {\"status\":\"ok\"}\n"
        );
    }

    #[test]
    fn created_ack_has_empty_body() {
        let text = String::from_utf8(Response::empty(StatusCode::CREATED).to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn content_length_counts_bytes_not_chars() {
        let response = Response::json(StatusCode::OK, &"éé");
        let text = String::from_utf8(response.to_bytes()).unwrap();
        assert!(text.contains(&format!("Content-Length: {}\r\n", response.body.len())));
        assert_eq!(response.body.len(), "\"éé\"\n".len());
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<Vec<u8>>,
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.writes.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn response_goes_out_in_one_write() {
        let response = Response::json(
            StatusCode::OK,
            &serde_json::json!({"isconnected": true, "infos": [1, 2, 3]}),
        );
        let mut writer = RecordingWriter::default();
        response.write_to(&mut writer).await.unwrap();
        assert_eq!(writer.writes.len(), 1);
        assert_eq!(writer.writes[0], response.to_bytes());
    }
}

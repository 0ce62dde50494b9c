//! MCMP wire codec
//!
//! Requests travel as an HTTP/1.1 request whose body is a form-urlencoded
//! parameter list, `JVMRoute` first. Responses are HTTP-like: a status line,
//! headers and a `Content-Length` body.

use bytes::{BufMut, Bytes, BytesMut};
use modcluster_config::{CONTENT_TYPE, JVM_ROUTE, USER_AGENT};
use url::form_urlencoded;

use super::request::{McmpRequest, RequestType};
use super::response::{McmpResponse, ResponseHead};
use crate::{McmpError, Result};

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Form-urlencoded request body
pub fn encode_body(request: &McmpRequest) -> String {
    let mut body = form_urlencoded::Serializer::new(String::new());
    if let Some(route) = request.jvm_route() {
        body.append_pair(JVM_ROUTE, route);
    }
    for (name, value) in request.parameters() {
        body.append_pair(name, value);
    }
    body.finish()
}

/// Serialize a request for the proxy reachable as `host`
///
/// `proxy_url` is an optional path prefix configured for the proxy's
/// management handler.
pub fn encode_request(request: &McmpRequest, proxy_url: Option<&str>, host: &str) -> Bytes {
    let body = encode_body(request);
    let prefix = proxy_url.unwrap_or_default().trim_end_matches('/');
    let path = if request.is_wildcard() { "/*" } else { "/" };

    let head = format!(
        "{} {}{} HTTP/1.1\r\n\
         Host: {}\r\n\
         Content-Length: {}\r\n\
         User-Agent: {}\r\n\
         Connection: Keep-Alive\r\n\
         Content-Type: {}\r\n\r\n",
        request.request_type().command(),
        prefix,
        path,
        host,
        body.len(),
        USER_AGENT,
        CONTENT_TYPE,
    );

    let mut buffer = BytesMut::with_capacity(head.len() + body.len());
    buffer.put_slice(head.as_bytes());
    buffer.put_slice(body.as_bytes());
    buffer.freeze()
}

/// Parse request wire bytes back into a request
pub fn decode_request(data: &[u8]) -> Result<McmpRequest> {
    let (head, body) = split_message(data)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let request_type: RequestType = parts
        .next()
        .ok_or_else(|| McmpError::protocol("Empty request line"))?
        .parse()?;
    let path = parts
        .next()
        .ok_or_else(|| McmpError::protocol(format!("Missing path: {:?}", request_line)))?;
    if !parts.next().is_some_and(|v| v.starts_with("HTTP/")) {
        return Err(McmpError::protocol(format!(
            "Missing protocol version: {:?}",
            request_line
        )));
    }

    let content_length = content_length(lines)?;
    let body = truncate_body(body, content_length)?;

    let mut jvm_route = None;
    let mut parameters = Vec::new();
    for (name, value) in form_urlencoded::parse(body) {
        if name == JVM_ROUTE {
            jvm_route = Some(value.into_owned());
        } else {
            parameters.push((name.into_owned(), value.into_owned()));
        }
    }

    let request = parameters.into_iter().fold(
        McmpRequest::new(request_type, path.ends_with("/*"), jvm_route),
        |request, (name, value)| request.with_parameter(name, value),
    );
    Ok(request)
}

/// Parse a complete response held in memory
pub fn decode_response(data: &[u8]) -> Result<McmpResponse> {
    let (head_text, body) = split_message(data)?;
    let mut lines = head_text.split("\r\n");

    let mut head = ResponseHead::from_status_line(lines.next().unwrap_or_default())?;
    for line in lines {
        head.apply_header(line)?;
    }

    let body = truncate_body(body, Some(head.content_length))?;
    Ok(McmpResponse {
        head,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}

fn split_message(data: &[u8]) -> Result<(String, &[u8])> {
    let end = data
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .ok_or_else(|| McmpError::protocol("Incomplete message head"))?;

    let head = std::str::from_utf8(&data[..end])
        .map_err(|_| McmpError::protocol("Message head is not valid UTF-8"))?;
    Ok((head.to_string(), &data[end + HEADER_END.len()..]))
}

fn content_length<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Option<usize>> {
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let length = value.trim().parse().map_err(|_| {
                    McmpError::protocol(format!("Invalid Content-Length: {:?}", value))
                })?;
                return Ok(Some(length));
            }
        }
    }
    Ok(None)
}

fn truncate_body(body: &[u8], length: Option<usize>) -> Result<&[u8]> {
    match length {
        Some(length) if length > body.len() => Err(McmpError::protocol(format!(
            "Body shorter than Content-Length: {} < {}",
            body.len(),
            length
        ))),
        Some(length) => Ok(&body[..length]),
        None => Ok(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_request_round_trip() {
        let request = McmpRequest::new(RequestType::Config, false, Some("node1".into()))
            .with_parameter("Host", "10.0.0.1")
            .with_parameter("Port", "8009")
            .with_parameter("Type", "ajp");

        let wire = encode_request(&request, None, "10.0.0.5:6666");
        let decoded = decode_request(&wire).unwrap();

        assert_eq!(decoded, request);
        assert_eq!(decoded.request_type(), RequestType::Config);
        assert_eq!(decoded.parameter("Host"), Some("10.0.0.1"));
        assert_eq!(decoded.parameter("Port"), Some("8009"));
        assert_eq!(decoded.parameter("Type"), Some("ajp"));
    }

    #[test]
    fn test_wire_layout() {
        let request = McmpRequest::new(RequestType::RemoveApp, true, Some("node 1".into()));
        let wire = encode_request(&request, Some("/mcm/"), "proxy:6666");
        let text = std::str::from_utf8(&wire).unwrap();

        assert!(text.starts_with("REMOVE-APP /mcm/* HTTP/1.1\r\nHost: proxy:6666\r\n"));
        assert!(text.contains("User-Agent: ClusterListener/1.0\r\n"));
        assert!(text.ends_with("\r\n\r\nJVMRoute=node+1"));
        assert!(text.contains("Content-Length: 15\r\n"));
    }

    #[test]
    fn test_alias_list_is_escaped() {
        let request = McmpRequest::new(RequestType::EnableApp, false, Some("node1".into()))
            .with_parameter("Context", "/app")
            .with_parameter("Alias", "localhost,example.com");

        assert_eq!(
            encode_body(&request),
            "JVMRoute=node1&Context=%2Fapp&Alias=localhost%2Cexample.com"
        );
        let decoded = decode_request(&encode_request(&request, None, "p:1")).unwrap();
        assert_eq!(decoded.parameter("Alias"), Some("localhost,example.com"));
    }

    #[test]
    fn test_request_without_route() {
        let request = McmpRequest::new(RequestType::Info, false, None);
        let decoded = decode_request(&encode_request(&request, None, "p:1")).unwrap();
        assert_eq!(decoded.jvm_route(), None);
        assert!(decoded.parameters().is_empty());
    }

    #[test]
    fn test_decode_request_rejects_unknown_command() {
        let wire = b"FROB / HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        assert!(decode_request(wire).is_err());
        assert!(decode_request(b"CONFIG / HTTP/1.1\r\n").is_err());
    }

    #[test]
    fn test_decode_response_with_body() {
        let wire = b"HTTP/1.1 200 OK\r\nDate: now\r\nContent-Length: 5\r\n\r\nhello trailing";
        let response = decode_response(wire).unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, "hello");
    }

    #[test]
    fn test_decode_error_response() {
        let wire = b"HTTP/1.1 500 Internal Error\r\nVersion: 1\r\nType: SYNTAX\r\nMess: SYNTAX: Can't parse message\r\nContent-Length: 0\r\n\r\n";
        let response = decode_response(wire).unwrap();
        assert_eq!(response.status(), 500);
        let err = response.into_result().unwrap_err();
        assert!(err.is_syntax_error());
    }

    #[test]
    fn test_decode_response_short_body() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort";
        assert!(decode_response(wire).is_err());
    }
}

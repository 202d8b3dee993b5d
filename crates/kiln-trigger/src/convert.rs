//! HTTP type conversions between hyper/http and Kiln values.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode, Uri};
use http_body_util::Full;
use tracing::warn;

/// Convert a status code from u16.
pub fn status_from_u16(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Copy `http` headers into a Kiln header map.
///
/// Values that are not valid UTF-8 are converted lossily.
pub fn headers_from_http(headers: &http::HeaderMap) -> kiln_core::HeaderMap {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Copy Kiln headers into an `http` header map.
///
/// Names or values `http` rejects are skipped with a warning.
pub fn headers_to_http(headers: &kiln_core::HeaderMap) -> http::HeaderMap {
    let mut map = http::HeaderMap::new();
    for (name, values) in headers.iter() {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = %name, "dropping response header with invalid name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    map.append(header_name.clone(), value);
                }
                Err(_) => warn!(header = %name, "dropping invalid response header value"),
            }
        }
    }
    map
}

/// Extract the path and query from a URI.
pub fn uri_path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Build a Kiln request from request parts and an already collected body.
pub fn to_kiln_request(parts: &http::request::Parts, body: Bytes) -> kiln_core::Request {
    kiln_core::Request::new(
        parts.method.as_str(),
        uri_path_and_query(&parts.uri),
        headers_from_http(&parts.headers),
        body,
    )
}

/// Convert a collected Kiln response into a hyper response.
pub fn to_http_response(response: kiln_core::Response) -> http::Response<Full<Bytes>> {
    let (status, headers, body) = response.into_parts();
    let mut out = http::Response::new(Full::new(body));
    *out.status_mut() = status_from_u16(status);
    *out.headers_mut() = headers_to_http(&headers);
    out
}

/// A plain-text response with the given status.
pub fn plain(status: StatusCode, text: &'static str) -> http::Response<Full<Bytes>> {
    let mut out = http::Response::new(Full::new(Bytes::from_static(text.as_bytes())));
    *out.status_mut() = status;
    out.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    out
}

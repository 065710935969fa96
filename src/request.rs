//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;

use crate::error::Error;

/// An incoming HTTP request with its body already read.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: SocketAddr,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Self {
        Self { method, uri, headers, body, params: HashMap::new(), remote_addr }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// Header value as text. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Decodes the JSON body. A malformed body is the client's fault: `400`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::validation(http::StatusCode::BAD_REQUEST, format!("unable to decode payload: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    fn request(body: &'static str) -> Request {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        Request::new(
            Method::POST,
            Uri::from_static("/v1/users?page=1"),
            headers,
            Bytes::from_static(body.as_bytes()),
            "127.0.0.1:50000".parse().unwrap(),
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NewUser {
        email: String,
    }

    #[test]
    fn decodes_json_body() {
        let req = request(r#"{"email":"bill@example.com"}"#);
        assert_eq!(req.path(), "/v1/users");
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.json::<NewUser>().unwrap(), NewUser { email: "bill@example.com".into() });
    }

    #[test]
    fn malformed_body_is_a_validation_error() {
        let err = request("{not json").json::<NewUser>().unwrap_err();
        match err {
            Error::Validation { status, message, .. } => {
                assert_eq!(status, http::StatusCode::BAD_REQUEST);
                assert!(message.starts_with("unable to decode payload"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Blocking request/response transport
//!
//! Every call blocks until the server answers or the transport's own
//! per-request timeout expires. There is no cancellation: a stuck socket
//! consumes the timeout and the control loop resumes afterwards.
//!
//! A server answer of any status is a [`Response`], not an error. Only
//! failures where no status exists (connect, DNS, I/O) are reported as
//! [`TransportError`].

use crate::errors::TransportError;

/// One `multipart/form-data` part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Form field name
    pub name: String,
    /// Optional filename attribute
    pub filename: Option<String>,
    /// MIME type of the data
    pub content_type: String,
    /// Raw bytes
    pub data: Vec<u8>,
}

impl Part {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: content_type.into(),
            data,
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// `application/json` document
    Json(String),
    /// `multipart/form-data` parts, in order
    Multipart(Vec<Part>),
}

/// Outbound `POST`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Absolute URL
    pub url: String,
    /// Value of the `Authorization` header, if any
    pub authorization: Option<String>,
    /// Payload
    pub body: Body,
}

impl Request {
    pub fn json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            authorization: None,
            body: Body::Json(body.into()),
        }
    }

    pub fn multipart(url: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            url: url.into(),
            authorization: None,
            body: Body::Multipart(parts),
        }
    }

    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }
}

/// Server answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Body as text (empty when none)
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `200` or `204`, the only statuses the backend uses for success
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 204)
    }
}

/// Blocking HTTP-like transport
pub trait Transport {
    /// Send a `POST` and wait for the answer
    fn post(&mut self, request: &Request) -> Result<Response, TransportError>;

    /// Send a bare `GET` (used for reachability probes)
    fn get(&mut self, url: &str) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn post(&mut self, request: &Request) -> Result<Response, TransportError> {
        (**self).post(request)
    }

    fn get(&mut self, url: &str) -> Result<Response, TransportError> {
        (**self).get(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses() {
        assert!(Response::new(200, "").is_success());
        assert!(Response::new(204, "").is_success());
        assert!(!Response::new(201, "").is_success());
        assert!(!Response::new(401, "").is_success());
    }

    #[test]
    fn request_builder() {
        let req = Request::json("http://h/x", "{}").authorization("Device abc");
        assert_eq!(req.authorization.as_deref(), Some("Device abc"));
        assert_eq!(req.body, Body::Json("{}".into()));
    }
}

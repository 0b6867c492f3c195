//! Backend endpoints and the authenticated data uplink
//!
//! Status contract shared by every data endpoint:
//!
//! | Status      | Meaning                         | Queue action          |
//! |-------------|---------------------------------|-----------------------|
//! | `200`/`204` | accepted                        | archive               |
//! | `401`       | access token invalid            | keep, refresh session |
//! | other       | transient                       | keep                  |
//! | no status   | transport failure               | keep                  |

use log::debug;

use crate::constants::AUTH_SCHEME;
use crate::errors::DeliveryError;
use crate::queue::Uplink;
use crate::traits::{Part, Request, Response, Transport};

/// Backend base URL and paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base_url: String,
    pub activate: String,
    pub auth_check: String,
    pub refresh: String,
    pub ambient: String,
    pub capture: String,
}

impl Endpoints {
    /// Endpoints with the default paths under `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            activate: "/api/device/activate".into(),
            auth_check: "/api/device/auth".into(),
            refresh: "/api/device/refresh".into(),
            ambient: "/api/data/ambient".into(),
            capture: "/api/data/capture".into(),
        }
    }

    /// Absolute URL for a path
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// `Authorization` header value for an access token
pub fn authorization(token: &str) -> String {
    format!("{} {}", AUTH_SCHEME, token)
}

/// Map a data-endpoint response onto the delivery contract
pub fn classify(response: &Response) -> Result<(), DeliveryError> {
    match response.status {
        200 | 204 => Ok(()),
        401 => Err(DeliveryError::Unauthorized),
        status => Err(DeliveryError::Rejected { status }),
    }
}

/// Data uplink bound to one access token
///
/// Built fresh for each send or reconciliation pass so a refreshed token is
/// always picked up.
pub struct BackendUplink<'a> {
    transport: &'a mut dyn Transport,
    endpoints: &'a Endpoints,
    token: &'a str,
}

impl<'a> BackendUplink<'a> {
    pub fn new(transport: &'a mut dyn Transport, endpoints: &'a Endpoints, token: &'a str) -> Self {
        Self {
            transport,
            endpoints,
            token,
        }
    }

    fn submit(&mut self, request: Request) -> Result<(), DeliveryError> {
        let request = request.authorization(authorization(self.token));
        let response = self.transport.post(&request)?;
        debug!("uplink: {} -> {}", request.url, response.status);
        classify(&response)
    }
}

impl Uplink for BackendUplink<'_> {
    fn send_ambient(&mut self, body: &str) -> Result<(), DeliveryError> {
        let url = self.endpoints.url(&self.endpoints.ambient);
        self.submit(Request::json(url, body))
    }

    fn send_capture(&mut self, thermal: &str, image: Option<&[u8]>) -> Result<(), DeliveryError> {
        let url = self.endpoints.url(&self.endpoints.capture);
        let mut parts = vec![
            Part::new("thermal", "application/json", thermal.as_bytes().to_vec())
                .filename("thermal.json"),
        ];
        if let Some(image) = image {
            parts.push(Part::new("image", "image/jpeg", image.to_vec()).filename("image.jpg"));
        }
        self.submit(Request::multipart(url, parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::traits::Body;

    struct Recorder {
        requests: Vec<Request>,
        status: u16,
    }

    impl Transport for Recorder {
        fn post(&mut self, request: &Request) -> Result<Response, TransportError> {
            self.requests.push(request.clone());
            Ok(Response::new(self.status, ""))
        }

        fn get(&mut self, _url: &str) -> Result<Response, TransportError> {
            Err(TransportError::Connect("unused".into()))
        }
    }

    #[test]
    fn urls_join_cleanly() {
        let endpoints = Endpoints::new("https://api.example.com/");
        assert_eq!(endpoints.url("/x"), "https://api.example.com/x");
        assert_eq!(endpoints.url("y"), "https://api.example.com/y");
    }

    #[test]
    fn classification() {
        assert_eq!(classify(&Response::new(200, "")), Ok(()));
        assert_eq!(classify(&Response::new(204, "")), Ok(()));
        assert_eq!(classify(&Response::new(401, "")), Err(DeliveryError::Unauthorized));
        assert_eq!(
            classify(&Response::new(503, "")),
            Err(DeliveryError::Rejected { status: 503 })
        );
    }

    #[test]
    fn capture_without_image_sends_only_thermal_part() {
        let endpoints = Endpoints::new("http://h");
        let mut transport = Recorder {
            requests: Vec::new(),
            status: 204,
        };
        {
            let mut uplink = BackendUplink::new(&mut transport, &endpoints, "tok");
            uplink.send_capture("{}", None).unwrap();
            uplink.send_capture("{}", Some(&[0xff, 0xd8])).unwrap();
        }

        let first = &transport.requests[0];
        assert_eq!(first.url, "http://h/api/data/capture");
        assert_eq!(first.authorization.as_deref(), Some("Device tok"));
        match &first.body {
            Body::Multipart(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].name, "thermal");
            }
            other => panic!("unexpected body {:?}", other),
        }
        match &transport.requests[1].body {
            Body::Multipart(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[1].name, "image");
                assert_eq!(parts[1].data, vec![0xff, 0xd8]);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }
}

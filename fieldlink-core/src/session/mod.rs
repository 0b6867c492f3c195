//! Device Credential Session
//!
//! ## Overview
//!
//! A device is provisioned once with an activation code and from then on
//! authenticates with a short-lived access token, renewed through a
//! longer-lived refresh token. Both survive reboots in an encrypted state
//! file.
//!
//! ```text
//!  activate ──200──▶ activated ──auth check 401──▶ refresh ──200──▶ activated
//!                                                     │
//!                                          401 / no refresh token
//!                                                     ▼
//!                                               deactivated (re-activation required)
//! ```
//!
//! ## Backend Contract
//!
//! | Operation   | `200`                         | `401`                   | other / no answer |
//! |-------------|-------------------------------|-------------------------|-------------------|
//! | activate    | store tokens, activated       | deactivated             | deactivated       |
//! | auth check  | absorb rotated tokens         | refresh                 | unchanged, error  |
//! | refresh     | store new tokens              | clear tokens, deactivate| unchanged, error  |
//!
//! Every change is persisted by rewriting the whole state file.

pub mod cipher;
pub mod store;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::backend::{authorization, Endpoints};
use crate::constants::DEFAULT_COLLECTION_INTERVAL_MINUTES;
use crate::errors::{SessionError, SessionResult, TransportError};
use crate::traits::{Request, Response, Transport};

pub use cipher::SessionCipher;
pub use store::SessionStore;

/// Persisted session state
///
/// `access_token` means nothing unless `activated` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    access_token: String,
    refresh_token: String,
    #[serde(rename = "collectionInterval")]
    collection_interval_minutes: u32,
    activated: bool,
}

impl Session {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        collection_interval_minutes: u32,
        activated: bool,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            collection_interval_minutes,
            activated,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn collection_interval_minutes(&self) -> u32 {
        self.collection_interval_minutes
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }
}

impl Default for Session {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            collection_interval_minutes: DEFAULT_COLLECTION_INTERVAL_MINUTES,
            activated: false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivationRequest<'a> {
    device_id: u32,
    activation_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac_address: Option<&'a str>,
}

/// Token material a `200` may carry; every field is optional on the wire
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TokenGrant {
    access_token: Option<String>,
    refresh_token: Option<String>,
    collection_interval: Option<u32>,
}

impl TokenGrant {
    fn parse(response: &Response) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&response.body)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Activation and token lifecycle, persisted on every change
pub struct CredentialSession {
    session: Session,
    store: SessionStore,
    endpoints: Endpoints,
}

impl CredentialSession {
    /// Load persisted state (or defaults)
    pub fn open(store: SessionStore, endpoints: Endpoints) -> Self {
        let session = store.load();
        Self {
            session,
            store,
            endpoints,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_activated(&self) -> bool {
        self.session.activated
    }

    pub fn access_token(&self) -> &str {
        &self.session.access_token
    }

    pub fn collection_interval_minutes(&self) -> u32 {
        self.session.collection_interval_minutes
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Exchange the activation code for tokens
    ///
    /// Only a `200` carrying both tokens activates the device; any other
    /// outcome leaves it deactivated.
    pub fn activate(
        &mut self,
        transport: &mut dyn Transport,
        device_id: u32,
        activation_code: &str,
        mac_address: Option<&str>,
    ) -> SessionResult<()> {
        let body = serde_json::to_string(&ActivationRequest {
            device_id,
            activation_code,
            mac_address,
        })
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let url = self.endpoints.url(&self.endpoints.activate);
        let result = transport
            .post(&Request::json(url, body))
            .map_err(SessionError::from)
            .and_then(|response| match response.status {
                200 => {
                    let grant = TokenGrant::parse(&response)
                        .map_err(|e| SessionError::MalformedResponse(e.to_string()))?;
                    match (non_empty(grant.access_token), non_empty(grant.refresh_token)) {
                        (Some(access), Some(refresh)) => Ok((access, refresh, grant.collection_interval)),
                        _ => Err(SessionError::MalformedResponse("missing tokens".into())),
                    }
                }
                status => Err(SessionError::Rejected { status }),
            });

        match result {
            Ok((access, refresh, interval)) => {
                self.session.access_token = access;
                self.session.refresh_token = refresh;
                if let Some(minutes) = interval {
                    self.session.collection_interval_minutes = minutes;
                }
                self.session.activated = true;
                self.persist();
                info!("session: device {} activated", device_id);
                Ok(())
            }
            Err(e) => {
                warn!("session: activation failed: {}", e);
                if self.session.activated {
                    self.session.activated = false;
                    self.persist();
                }
                Err(e)
            }
        }
    }

    /// Confirm the access token is still accepted, refreshing when rejected
    ///
    /// Statuses other than `200`/`401` are returned unchanged as
    /// [`SessionError::Rejected`]; the caller retries later.
    pub fn ensure_authenticated(&mut self, transport: &mut dyn Transport) -> SessionResult<()> {
        if !self.session.activated {
            return Err(SessionError::NotActivated);
        }
        if self.session.access_token.is_empty() {
            debug!("session: no access token cached, refreshing first");
            self.refresh(transport)?;
        }

        let url = self.endpoints.url(&self.endpoints.auth_check);
        let response = transport.post(&self.token_request(url, &self.session.access_token))?;
        match response.status {
            200 => {
                match TokenGrant::parse(&response) {
                    Ok(grant) => {
                        if self.absorb(grant) {
                            debug!("session: backend rotated session state");
                            self.persist();
                        }
                    }
                    Err(e) => debug!("session: auth check body ignored: {}", e),
                }
                Ok(())
            }
            401 => {
                info!("session: access token rejected, refreshing");
                self.refresh(transport)
            }
            status => {
                warn!("session: auth check answered {}", status);
                Err(SessionError::Rejected { status })
            }
        }
    }

    /// Mint a new access token from the refresh token
    ///
    /// A missing or rejected refresh token deactivates the device.
    pub fn refresh(&mut self, transport: &mut dyn Transport) -> SessionResult<()> {
        if self.session.refresh_token.is_empty() {
            warn!("session: no refresh token, deactivating");
            self.session.activated = false;
            self.persist();
            return Err(SessionError::MissingRefreshToken);
        }

        let url = self.endpoints.url(&self.endpoints.refresh);
        let response = transport.post(&self.token_request(url, &self.session.refresh_token))?;
        match response.status {
            200 => {
                let grant = TokenGrant::parse(&response)
                    .map_err(|e| SessionError::MalformedResponse(e.to_string()))?;
                if non_empty(grant.access_token.clone()).is_none() {
                    return Err(SessionError::MalformedResponse("missing accessToken".into()));
                }
                self.absorb(grant);
                self.session.activated = true;
                self.persist();
                info!("session: access token refreshed");
                Ok(())
            }
            401 => {
                warn!("session: refresh token rejected, re-activation required");
                self.session.access_token.clear();
                self.session.refresh_token.clear();
                self.session.activated = false;
                self.persist();
                Err(SessionError::RefreshRejected)
            }
            status => {
                warn!("session: refresh answered {}", status);
                Err(SessionError::Rejected { status })
            }
        }
    }

    /// Drop activation; tokens are kept but no longer used
    pub fn deactivate(&mut self) {
        if self.session.activated {
            self.session.activated = false;
            self.persist();
        }
    }

    fn token_request(&self, url: String, token: &str) -> Request {
        let body = serde_json::json!({ "token": token }).to_string();
        let request = Request::json(url, body);
        if self.session.access_token.is_empty() {
            request
        } else {
            request.authorization(authorization(&self.session.access_token))
        }
    }

    /// Apply rotated tokens and interval from a `200`; true when anything changed
    fn absorb(&mut self, grant: TokenGrant) -> bool {
        let mut changed = false;
        if let Some(access) = non_empty(grant.access_token) {
            changed |= access != self.session.access_token;
            self.session.access_token = access;
        }
        if let Some(refresh) = non_empty(grant.refresh_token) {
            changed |= refresh != self.session.refresh_token;
            self.session.refresh_token = refresh;
        }
        if let Some(minutes) = grant.collection_interval {
            changed |= minutes != self.session.collection_interval_minutes;
            self.session.collection_interval_minutes = minutes;
        }
        changed
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.session) {
            warn!("session: state not persisted: {}", e);
        }
    }
}

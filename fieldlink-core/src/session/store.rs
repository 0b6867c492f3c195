//! Session persistence
//!
//! Loading is a chain of fallible steps (read, decrypt, parse); the first
//! failure falls through to defaults, which are then saved so the next boot
//! finds a valid file.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use super::cipher::SessionCipher;
use super::Session;
use crate::constants::SESSION_FILE_NAME;
use crate::errors::{StorageError, StorageResult};
use crate::storage::{Area, StorageManager};

/// Reads and writes the single session state file
pub struct SessionStore {
    storage: Arc<StorageManager>,
    cipher: Option<SessionCipher>,
}

impl SessionStore {
    /// `cipher` is `None` when no key could be bootstrapped
    pub fn new(storage: Arc<StorageManager>, cipher: Option<SessionCipher>) -> Self {
        if cipher.is_none() {
            warn!("session: encryption unavailable, state will be stored in cleartext");
        }
        Self { storage, cipher }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn path(&self) -> PathBuf {
        self.storage.dir(Area::SecureState).join(SESSION_FILE_NAME)
    }

    /// Persisted session, or defaults when there is no valid state
    pub fn load(&self) -> Session {
        if let Some(session) = self.read_session() {
            debug!("session: loaded (activated={})", session.is_activated());
            return session;
        }

        let session = Session::default();
        if let Err(e) = self.save(&session) {
            warn!("session: cannot persist defaults: {}", e);
        }
        session
    }

    fn read_session(&self) -> Option<Session> {
        let path = self.path();
        let text = match self.storage.read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.is_not_found() => {
                info!("session: no saved state");
                return None;
            }
            Err(e) => {
                warn!("session: cannot read state: {}", e);
                return None;
            }
        };

        let json = match &self.cipher {
            Some(cipher) => cipher
                .open(&text)
                .map_err(|e| warn!("session: discarding state: {}", e))
                .ok()?,
            None => text.into_bytes(),
        };

        serde_json::from_slice(&json)
            .map_err(|e| warn!("session: discarding unparsable state: {}", e))
            .ok()
    }

    /// Overwrite the state file with the whole session
    pub fn save(&self, session: &Session) -> StorageResult<()> {
        let path = self.path();
        let json = serde_json::to_vec(session).map_err(|e| StorageError::io(&path, e.into()))?;

        let contents = match &self.cipher {
            Some(cipher) => cipher
                .seal(&json)
                .map_err(|e| {
                    StorageError::io(
                        &path,
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    )
                })?
                .into_bytes(),
            None => {
                warn!("session: saving state in cleartext");
                json
            }
        };

        self.storage
            .write(Area::SecureState, SESSION_FILE_NAME, &contents)?;
        Ok(())
    }
}

use crate::domain::models::ApiSession;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

// Creating the session (login) is the auth layer's job; this store only
// keeps what it produced.
pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &ApiSession) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<ApiSession>, InfraError>;
    fn delete_session(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringSessionStore {
    service_name: String,
    account_name: String,
}

impl KeyringSessionStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new("focusleon.session", "default")
    }
}

impl SessionStore for KeyringSessionStore {
    fn save_session(&self, session: &ApiSession) -> Result<(), InfraError> {
        let payload = serde_json::to_string(session)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_session(&self) -> Result<Option<ApiSession>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let session = serde_json::from_str::<ApiSession>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(session))
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<ApiSession>>,
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &ApiSession) -> Result<(), InfraError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<ApiSession>, InfraError> {
        let guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_session(&self) -> Result<(), InfraError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}

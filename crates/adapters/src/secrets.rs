use docdeck_core::session::{KeyValueStore, SessionError, KEY_PASSWORD};

pub const DEFAULT_KEYRING_SERVICE: &str = "docdeck";
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
const KEYRING_ACCOUNT: &str = "session-password";

/// Session store that keeps the password in the OS keyring and every
/// other key in `inner`. On platforms without a keyring backend the
/// password falls through to `inner` as well.
#[derive(Debug)]
pub struct KeyringKeyValueStore<S> {
    inner: S,
    service: String,
}

impl<S: KeyValueStore> KeyringKeyValueStore<S> {
    #[must_use]
    pub fn new(inner: S, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl<S: KeyValueStore> KeyValueStore for KeyringKeyValueStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        if key == KEY_PASSWORD && keyring_supported() {
            return load_secret(&self.service);
        }
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        if key == KEY_PASSWORD && keyring_supported() {
            return store_secret(&self.service, value);
        }
        self.inner.set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), SessionError> {
        if key == KEY_PASSWORD && keyring_supported() {
            return delete_secret(&self.service);
        }
        self.inner.remove(key)
    }
}

fn keyring_supported() -> bool {
    cfg!(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "windows"
    ))
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(service: &str) -> Result<keyring::Entry, SessionError> {
    keyring::Entry::new(service, KEYRING_ACCOUNT).map_err(secret_error)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn secret_error(error: keyring::Error) -> SessionError {
    SessionError::Secret(error.to_string())
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_secret(service: &str) -> Result<Option<String>, SessionError> {
    match keyring_entry(service)?.get_password() {
        Ok(password) => Ok(Some(password).filter(|password| !password.is_empty())),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(error) => Err(secret_error(error)),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_secret(_service: &str) -> Result<Option<String>, SessionError> {
    Ok(None)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_secret(service: &str, password: &str) -> Result<(), SessionError> {
    if password.is_empty() {
        return delete_secret(service);
    }
    keyring_entry(service)?
        .set_password(password)
        .map_err(secret_error)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_secret(_service: &str, _password: &str) -> Result<(), SessionError> {
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn delete_secret(service: &str) -> Result<(), SessionError> {
    match keyring_entry(service)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(error) => {
            tracing::warn!(%error, "failed to remove password from keyring");
            Err(secret_error(error))
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn delete_secret(_service: &str) -> Result<(), SessionError> {
    Ok(())
}

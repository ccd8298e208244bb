use crate::api::{self, Error};
use crate::model::{Api, Credentials};
use crate::preferences;
use crate::store::{CredentialStore, StorageKey};
use async_trait::async_trait;

const UNLOCK_PROMPT: &str = "Authenticate to access the app";
const ENABLE_PROMPT: &str = "Authenticate to enable Face ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    Fingerprint,
    FacialRecognition,
    Iris,
}

/// Host biometric facility.
#[async_trait]
pub trait Biometric: Send + Sync {
    async fn has_hardware(&self) -> Result<bool, Error>;
    async fn supported_types(&self) -> Result<Vec<AuthenticationType>, Error>;
    /// `Ok(false)` on failure or cancellation.
    async fn authenticate(&self, prompt: &str) -> Result<bool, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
}

impl Access {
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Access::Granted => Ok(()),
            Access::Denied => Err(Error::AuthDenied),
        }
    }
}

/// Facial recognition available and enrolled.
pub async fn biometric_supported(biometric: &dyn Biometric) -> Result<bool, Error> {
    Ok(biometric.has_hardware().await?
        && biometric
            .supported_types()
            .await?
            .contains(&AuthenticationType::FacialRecognition))
}

/// Start-up biometric gate.
///
/// It only decides whether the first screen may be shown and does not protect the stored
/// credentials. It fails open: missing hardware, missing enrollment or any error from the
/// platform grants access. Only an explicit failed or cancelled prompt denies it.
pub struct SessionGate<'a> {
    store: &'a dyn CredentialStore,
    biometric: Option<&'a dyn Biometric>,
}

impl<'a> SessionGate<'a> {
    /// `biometric` is `None` when running somewhere without any biometric facility.
    pub fn new(
        store: &'a dyn CredentialStore,
        biometric: Option<&'a dyn Biometric>,
    ) -> SessionGate<'a> {
        SessionGate { store, biometric }
    }

    /// Decide at start-up whether the user may proceed.
    pub async fn check(&self) -> Access {
        let biometric = match self.biometric {
            Some(biometric) => biometric,
            None => {
                log::debug!("no biometric facility, access granted");
                return Access::Granted;
            }
        };

        match self.check_fallibly(biometric).await {
            Ok(access) => access,
            Err(e) => {
                log::error!("Authentication error: {}", e);
                Access::Granted
            }
        }
    }

    async fn check_fallibly(&self, biometric: &dyn Biometric) -> Result<Access, Error> {
        if !preferences::load(self.store).await?.biometric_enabled {
            return Ok(Access::Granted);
        }

        if !biometric_supported(biometric).await? {
            log::info!("biometric unlock enabled but unsupported here, access granted");
            return Ok(Access::Granted);
        }

        Ok(prompt(biometric).await)
    }

    /// Prompt again after a denial. There is no attempt limit.
    pub async fn retry(&self) -> Access {
        match self.biometric {
            Some(biometric) => prompt(biometric).await,
            None => Access::Granted,
        }
    }
}

async fn prompt(biometric: &dyn Biometric) -> Access {
    match biometric.authenticate(UNLOCK_PROMPT).await {
        Ok(true) => Access::Granted,
        Ok(false) => {
            log::warn!("Authentication failed");
            Access::Denied
        }
        Err(e) => {
            log::error!("Authentication error: {}", e);
            Access::Granted
        }
    }
}

pub async fn cached_credentials(store: &dyn CredentialStore) -> Option<Credentials> {
    api::stored_credentials(store).await.unwrap_or_else(|e| {
        log::error!("Error retrieving saved credentials: {}", e);
        None
    })
}

/// Validate `token_id`/`serial_number` against the cloud and persist them on success.
pub async fn connect(
    api: &Api,
    store: &dyn CredentialStore,
    token_id: &str,
    serial_number: &str,
) -> Result<Credentials, Error> {
    let credentials = Credentials::new(token_id, serial_number).ok_or(Error::NoCredentials)?;

    if !api::validate_credentials(api, token_id, serial_number).await {
        return Err(Error::ApiError(String::from(
            "Invalid credentials or device offline",
        )));
    }

    store.set(StorageKey::TokenId, token_id).await?;
    store.set(StorageKey::SerialNumber, serial_number).await?;
    log::info!("connected to inverter {}", serial_number);

    Ok(credentials)
}

pub async fn logout(store: &dyn CredentialStore) -> Result<(), Error> {
    api::clear_credentials(store).await?;
    log::info!("credentials cleared");
    Ok(())
}

/// Turn biometric unlock on or off. Turning it on requires a successful prompt first; returns
/// the resulting setting.
pub async fn set_biometric_enabled(
    store: &dyn CredentialStore,
    biometric: &dyn Biometric,
    enabled: bool,
) -> Result<bool, Error> {
    if enabled {
        if !biometric.authenticate(ENABLE_PROMPT).await? {
            return Ok(false);
        }
        store.set(StorageKey::BiometricEnabled, "true").await?;
        Ok(true)
    } else {
        store.set(StorageKey::BiometricEnabled, "false").await?;
        Ok(false)
    }
}

use crate::core::models::StoredSession;
use crate::error::Error;
use crate::source::CredentialSlot;

const SERVICE: &str = "homeroom";
const SLOT: &str = "session";

/// The production [`CredentialSlot`]: one JSON record in the OS keyring.
pub struct KeyringSlot;

fn entry() -> Result<keyring::Entry, Error> {
    keyring::Entry::new(SERVICE, SLOT).map_err(|e| {
        log::error!("keyring Entry::new failed for slot={SLOT:?}: {e}");
        Error::Credentials(format!("keyring error: {e}"))
    })
}

impl CredentialSlot for KeyringSlot {
    fn load(&self) -> Result<Option<StoredSession>, Error> {
        log::debug!("keyring GET: service={SERVICE:?} slot={SLOT:?}");
        match entry()?.get_password() {
            Ok(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                log::error!("session slot holds unreadable data: {e}");
                Error::Credentials(format!("session slot corrupt: {e}"))
            }),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                log::warn!("keyring get_password failed: {e}");
                Err(Error::Credentials(format!("keyring get: {e}")))
            }
        }
    }

    fn store(&self, session: &StoredSession) -> Result<(), Error> {
        log::debug!("keyring SET: service={SERVICE:?} slot={SLOT:?}");
        let raw = serde_json::to_string(session)
            .map_err(|e| Error::Credentials(format!("session encode: {e}")))?;
        entry()?.set_password(&raw).map_err(|e| {
            log::error!("keyring set_password failed: {e}");
            Error::Credentials(format!("keyring set: {e}"))
        })
    }

    fn clear(&self) -> Result<(), Error> {
        log::debug!("keyring DEL: service={SERVICE:?} slot={SLOT:?}");
        match entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                log::error!("keyring delete failed: {e}");
                Err(Error::Credentials(format!("keyring delete: {e}")))
            }
        }
    }
}

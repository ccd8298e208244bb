use crate::api::Error;
use crate::model::Preferences;
use crate::store::{CredentialStore, StorageKey};
use std::time::Duration;

pub const MIN_REFRESH_INTERVAL: i64 = 1;
pub const MAX_REFRESH_INTERVAL: i64 = 60;

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.as_deref() {
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            log::warn!("ignoring unparsable flag {:?}", other);
            default
        }
        None => default,
    }
}

fn clamp_interval(minutes: i64) -> u32 {
    minutes.clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL) as u32
}

/// Read preferences, falling back to defaults for absent or unparsable values.
pub async fn load(store: &dyn CredentialStore) -> Result<Preferences, Error> {
    let defaults = Preferences::default();

    let auto_refresh = parse_bool(
        store.get(StorageKey::AutoRefresh).await?,
        defaults.auto_refresh,
    );
    let biometric_enabled = parse_bool(
        store.get(StorageKey::BiometricEnabled).await?,
        defaults.biometric_enabled,
    );
    let refresh_interval_minutes = match store.get(StorageKey::RefreshInterval).await? {
        Some(value) => match value.trim().parse::<i64>() {
            Ok(minutes) => clamp_interval(minutes),
            Err(_) => {
                log::warn!("ignoring unparsable refresh interval {:?}", value);
                defaults.refresh_interval_minutes
            }
        },
        None => defaults.refresh_interval_minutes,
    };

    Ok(Preferences {
        auto_refresh,
        refresh_interval_minutes,
        biometric_enabled,
    })
}

pub async fn set_auto_refresh(store: &dyn CredentialStore, enabled: bool) -> Result<(), Error> {
    store
        .set(StorageKey::AutoRefresh, &enabled.to_string())
        .await
}

/// Clamp `minutes` to [1, 60], persist and return the value actually stored.
pub async fn update_refresh_interval(
    store: &dyn CredentialStore,
    minutes: i64,
) -> Result<u32, Error> {
    let minutes = clamp_interval(minutes);
    store
        .set(StorageKey::RefreshInterval, &minutes.to_string())
        .await?;
    Ok(minutes)
}

/// Timer period implied by `preferences`; `None` when auto refresh is off.
pub fn refresh_period(preferences: &Preferences) -> Option<Duration> {
    if preferences.auto_refresh {
        Some(Duration::from_secs(
            u64::from(preferences.refresh_interval_minutes) * 60,
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn defaults_when_absent() {
        let store = MemoryStore::new();
        let preferences = load(&store).await.unwrap();
        assert_eq!(Preferences::default(), preferences);
        assert_eq!(Some(Duration::from_secs(60)), refresh_period(&preferences));
    }

    #[tokio::test]
    async fn interval_is_clamped() {
        let store = MemoryStore::new();
        assert_eq!(1, update_refresh_interval(&store, 0).await.unwrap());
        assert_eq!(
            Some("1".to_string()),
            store.get(StorageKey::RefreshInterval).await.unwrap()
        );
        assert_eq!(60, update_refresh_interval(&store, 90).await.unwrap());
        assert_eq!(1, update_refresh_interval(&store, -5).await.unwrap());
        assert_eq!(15, update_refresh_interval(&store, 15).await.unwrap());
        assert_eq!(15, load(&store).await.unwrap().refresh_interval_minutes);
    }

    #[tokio::test]
    async fn stored_values_are_read_back() {
        let store = MemoryStore::new();
        set_auto_refresh(&store, false).await.unwrap();
        store
            .set(StorageKey::BiometricEnabled, "true")
            .await
            .unwrap();
        update_refresh_interval(&store, 5).await.unwrap();

        let preferences = load(&store).await.unwrap();
        assert!(!preferences.auto_refresh);
        assert!(preferences.biometric_enabled);
        assert_eq!(5, preferences.refresh_interval_minutes);
        assert_eq!(None, refresh_period(&preferences));
    }

    #[tokio::test]
    async fn garbage_falls_back_to_defaults() {
        let store = MemoryStore::new();
        store.set(StorageKey::AutoRefresh, "yes").await.unwrap();
        store.set(StorageKey::RefreshInterval, "soon").await.unwrap();

        assert_eq!(Preferences::default(), load(&store).await.unwrap());

        /* out-of-range values written by someone else are clamped on read */
        store.set(StorageKey::RefreshInterval, "600").await.unwrap();
        assert_eq!(60, load(&store).await.unwrap().refresh_interval_minutes);
    }
}

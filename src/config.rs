use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::store::{EntityStore, MemoryStore, MongoStore};
use crate::voting::{Clock, ElectionService, SystemClock};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_vote_timeout_ms")]
    vote_timeout_ms: u64,
    // secrets
    jwt_secret: String,
}

fn default_vote_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// Secret key used to verify bearer tokens.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// How long a vote may wait on storage before its outcome is reported
    /// as unknown.
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        Ok(rocket.manage(config))
    }
}

/// Which storage backend to run against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Mongodb,
}

/// Configuration for storage.
#[derive(Deserialize)]
struct StoreConfig {
    #[serde(default)]
    storage: StorageKind,
    // secrets
    db_uri: Option<String>,
    #[serde(default = "default_db_name")]
    db_name: String,
}

fn default_db_name() -> String {
    "clubvote".to_string()
}

/// A fairing that loads the storage config, connects to the chosen backend,
/// and places an `Arc<dyn EntityStore>` and the system `Arc<dyn Clock>`
/// into managed state.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Storage",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load storage config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: Arc<dyn EntityStore> = match config.storage {
            StorageKind::Memory => {
                info!("Using in-memory storage; nothing will survive a restart");
                Arc::new(MemoryStore::new())
            }
            StorageKind::Mongodb => {
                let uri = match config.db_uri {
                    Some(uri) => uri,
                    None => {
                        error!("`db_uri` must be set when `storage` is `mongodb`");
                        return Err(rocket);
                    }
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&uri, &config.db_name).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Arc::new(store)
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Ok(rocket.manage(store).manage(clock))
    }
}

/// A fairing that builds the [`ElectionService`] from the managed config,
/// store and clock, and manages it as an `Arc<ElectionService>`.
/// Must be attached after the fairings providing those.
pub struct ServiceFairing;

#[rocket::async_trait]
impl Fairing for ServiceFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election Service",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let parts = (
            rocket.state::<Config>(),
            rocket.state::<Arc<dyn EntityStore>>(),
            rocket.state::<Arc<dyn Clock>>(),
        );
        let service = match parts {
            (Some(config), Some(store), Some(clock)) => {
                ElectionService::new(store.clone(), clock.clone(), config.vote_timeout())
            }
            _ => {
                error!("Config, store and clock must be managed before the election service");
                return Err(rocket);
            }
        };
        Ok(rocket.manage(Arc::new(service)))
    }
}


#[cfg(test)]
mod tests {
    use rocket::figment::Figment;

    use super::*;

    #[test]
    fn vote_timeout_defaults_to_five_seconds() {
        let config: Config = Figment::new()
            .merge(("jwt_secret", "s"))
            .extract()
            .unwrap();
        assert_eq!(config.vote_timeout(), Duration::from_secs(5));
        assert_eq!(config.jwt_secret(), b"s");
    }

    #[test]
    fn storage_defaults_to_memory() {
        let config: StoreConfig = Figment::new().extract().unwrap();
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.db_name, "clubvote");

        let config: StoreConfig = Figment::new()
            .merge(("storage", "mongodb"))
            .merge(("db_uri", "mongodb://localhost:27017"))
            .extract()
            .unwrap();
        assert_eq!(config.storage, StorageKind::Mongodb);
    }
}

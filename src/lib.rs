#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, ServiceFairing, StoreFairing};
use crate::logging::LoggerFairing;
use crate::store::EntityStore;
use crate::voting::{Clock, FinalizerFairing};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod store;
pub mod voting;

/// Build a server with storage chosen by configuration.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build().attach(StoreFairing))
}

/// Build a server around an existing store and clock.
pub fn rocket_for_store(
    rocket: Rocket<Build>,
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
) -> Rocket<Build> {
    assemble(rocket.manage(store).manage(clock))
}

/// Attach everything that sits on top of the store. Fairing order matters:
/// each one reads state managed by those before it.
fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .attach(ConfigFairing)
        .attach(ServiceFairing)
        .attach(FinalizerFairing)
        .attach(LoggerFairing)
        .mount("/api", api::routes())
        .register("/", api::catchers())
}

/// A MongoDB store in a fresh, uniquely named database.
#[cfg(test)]
async fn test_store() -> store::MongoStore {
    use rand::Rng;

    let uri = std::env::var("ROCKET_DB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let db_name = format!("test{}", rand::thread_rng().gen::<u32>());
    store::MongoStore::connect(&uri, &db_name).await.unwrap()
}

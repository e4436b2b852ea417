use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{debug, error, info, trace, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::future::{BoxFuture, FutureExt},
    tokio::sync::Mutex,
    Build, Rocket,
};

use crate::model::{db::Election, mongodb::Id};
use crate::scheduled_task::ScheduledTask;

use super::{ElectionService, Result};

/// Map from election IDs to finalizer tasks.
type TaskMap = HashMap<Id, ScheduledTask<Result<()>>>;

/// Delay before a failed finalizer runs again.
const RETRY_INTERVAL_SECONDS: i64 = 300;

/// Election finalizers: tasks that run once an election closes, storing its
/// final status and reconciling the cached vote counts of its candidates.
pub struct ElectionFinalizers {
    tasks: Arc<Mutex<TaskMap>>,
    service: Arc<ElectionService>,
}

impl ElectionFinalizers {
    pub fn new(service: Arc<ElectionService>) -> Self {
        Self {
            tasks: Default::default(),
            service,
        }
    }

    /// Does the given election have a finalizer scheduled?
    pub async fn has_finalizer(&self, election: Id) -> bool {
        self.tasks.lock().await.contains_key(&election)
    }

    /// Schedule a finalizer for every election.
    /// Elections that have already closed are finalized straight away.
    pub async fn schedule_elections(&self) -> Result<()> {
        for details in self.service.elections(None, None).await? {
            self.schedule_election(&details.election).await;
        }
        Ok(())
    }

    /// Schedule a finalizer for the given election, replacing any existing one.
    pub async fn schedule_election(&self, election: &Election) {
        let finalizer = Self::finalizer(election.id, self.service.clone(), self.tasks.clone());
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.remove(&election.id) {
            if task.cancel().await {
                trace!("Finalizer for election {} had already run", election.id);
            }
        }
        // The window is inclusive, so the election is only closed strictly
        // after its end time.
        let run_at = election.end_time + Duration::milliseconds(1);
        tasks.insert(election.id, ScheduledTask::new(finalizer, run_at));
    }

    /// Drop the finalizer of a deleted election.
    pub async fn cancel_election(&self, election_id: Id) {
        if let Some(task) = self.tasks.lock().await.remove(&election_id) {
            task.cancel().await;
            debug!("Cancelled finalizer for election {election_id}");
        }
    }

    /// Run the finalizer for the given election now and wait for it.
    /// Returns `None` if none was scheduled or it was aborted.
    pub async fn finalize_election(&self, election_id: Id) -> Option<Result<()>> {
        let task = self.tasks.lock().await.remove(&election_id)?;
        task.trigger_now();
        match task.await {
            Ok(result) => Some(result),
            Err(e) => {
                error!("Finalizer for election {election_id} was aborted: {e}");
                None
            }
        }
    }

    /// Recursive, hence boxed.
    fn finalizer(
        election_id: Id,
        service: Arc<ElectionService>,
        tasks: Arc<Mutex<TaskMap>>,
    ) -> BoxFuture<'static, Result<()>> {
        async fn finalize(election_id: Id, service: &ElectionService) -> Result<()> {
            debug!("Running finalizer for election {election_id}");
            let status = match service.sync_status(election_id).await? {
                Some(status) => status,
                None => {
                    debug!("Election {election_id} no longer exists, nothing to finalize");
                    return Ok(());
                }
            };
            let corrections = service.reconcile_tallies(election_id).await?;
            info!(
                "Finalized election {election_id} as '{status}', corrected {} vote count(s)",
                corrections.len()
            );
            Ok(())
        }

        async move {
            let result = finalize(election_id, &service).await;
            match result {
                Ok(()) => {
                    tasks.lock().await.remove(&election_id);
                    trace!("Finalizer completed; removed self from list");
                }
                Err(ref e) => {
                    error!("Finalizer for election {election_id} failed: {e}");
                    let retry = Self::finalizer(election_id, service.clone(), tasks.clone());
                    let retry_time = Utc::now() + Duration::seconds(RETRY_INTERVAL_SECONDS);
                    tasks
                        .lock()
                        .await
                        .insert(election_id, ScheduledTask::new(retry, retry_time));
                    warn!("Failed finalizer will be retried in {RETRY_INTERVAL_SECONDS} seconds");
                }
            }
            result
        }
        .boxed()
    }
}

/// Schedules finalizers for all elections during ignition and places an
/// [`ElectionFinalizers`] into managed state. Must be attached after the
/// [`ElectionService`] is managed.
pub struct FinalizerFairing;

#[rocket::async_trait]
impl Fairing for FinalizerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election Finalizers",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        info!("Scheduling election finalizers...");
        let service = match rocket.state::<Arc<ElectionService>>() {
            Some(service) => service.clone(),
            None => {
                error!("Election service was not available when scheduling finalizers");
                return Err(rocket);
            }
        };
        let finalizers = ElectionFinalizers::new(service);
        if let Err(e) = finalizers.schedule_elections().await {
            error!("Failed to schedule election finalizers: {e}");
            return Err(rocket);
        }
        info!("...election finalizers scheduled!");

        Ok(rocket.manage(finalizers))
    }
}

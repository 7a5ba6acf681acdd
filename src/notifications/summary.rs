//! Periodic delivery of unprocessed notification events.
//!
//! Events are grouped per user (user-specific events) and per company
//! (investor-relations events, stored without a user). Each group produces at
//! most one email per run. A group whose dispatch fails stays unprocessed and
//! is retried on the next run; other groups are unaffected.

use crate::db::{self, Pool};
use crate::gateway::Collaborators;
use crate::model::NotificationEvent;
use anyhow::Result;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryOutcome {
    pub user_summaries_sent: usize,
    pub company_summaries_sent: usize,
    pub events_processed: usize,
    pub failed_groups: usize,
}

/// Framework name to the distinct reporting periods mentioned in `events`.
pub fn reporting_periods_by_framework(
    events: &[NotificationEvent],
) -> BTreeMap<&'static str, BTreeSet<String>> {
    let mut out: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
    for e in events {
        out.entry(e.framework.as_str())
            .or_default()
            .insert(e.reporting_period.clone());
    }
    out
}

type Groups = BTreeMap<String, Vec<NotificationEvent>>;

fn partition(events: Vec<NotificationEvent>) -> (Groups, Groups) {
    let mut by_user: Groups = BTreeMap::new();
    let mut by_company: Groups = BTreeMap::new();
    for event in events.into_iter().filter(|e| !e.is_processed) {
        match &event.user_id {
            Some(user_id) => by_user.entry(user_id.clone()).or_default().push(event),
            None => by_company
                .entry(event.company_id.clone())
                .or_default()
                .push(event),
        }
    }
    (by_user, by_company)
}

async fn mark_processed(pool: &Pool, events: &[NotificationEvent]) -> Result<usize> {
    let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
    Ok(db::mark_events_processed(pool, &ids).await? as usize)
}

/// Contact emails of the company plus the emails of its current owners.
async fn investor_relations_receivers(
    collaborators: &Collaborators,
    company_id: &str,
) -> Result<Vec<String>> {
    let mut receivers: BTreeSet<String> = collaborators
        .companies
        .get_company_contact_emails(company_id)
        .await?
        .into_iter()
        .filter(|e| !e.trim().is_empty())
        .collect();

    let owner_ids = collaborators.company_owner_ids(company_id).await?;
    let owners = try_join_all(
        owner_ids
            .iter()
            .map(|id| collaborators.users.get_user_by_id(id)),
    )
    .await?;
    receivers.extend(owners.into_iter().flatten().filter_map(|u| u.email));
    Ok(receivers.into_iter().collect())
}

/// Send one summary per user and one investor-relations email per company.
/// Never calls an email builder with an empty event list.
#[instrument(skip_all, fields(count = events.len()))]
pub async fn process_notification_events(
    pool: &Pool,
    collaborators: &Collaborators,
    events: Vec<NotificationEvent>,
) -> Result<SummaryOutcome> {
    let mut outcome = SummaryOutcome::default();
    let (by_user, by_company) = partition(events);

    for (user_id, events) in &by_user {
        match collaborators.email.send_user_summary(user_id, events).await {
            Ok(()) => {
                outcome.user_summaries_sent += 1;
                outcome.events_processed += mark_processed(pool, events).await?;
                info!(%user_id, events = events.len(), "user summary sent");
            }
            Err(err) => {
                outcome.failed_groups += 1;
                warn!(?err, %user_id, "user summary failed; events kept for next run");
            }
        }
    }

    for (company_id, events) in &by_company {
        let receivers = match investor_relations_receivers(collaborators, company_id).await {
            Ok(receivers) => receivers,
            Err(err) => {
                outcome.failed_groups += 1;
                warn!(?err, %company_id, "could not resolve receivers; events kept for next run");
                continue;
            }
        };
        if receivers.is_empty() {
            warn!(%company_id, "no receivers for investor relations summary; marking processed");
            outcome.events_processed += mark_processed(pool, events).await?;
            continue;
        }
        match collaborators
            .email
            .send_investor_relations_summary(company_id, &receivers, events)
            .await
        {
            Ok(()) => {
                outcome.company_summaries_sent += 1;
                outcome.events_processed += mark_processed(pool, events).await?;
                info!(%company_id, receivers = receivers.len(), "investor relations summary sent");
            }
            Err(err) => {
                outcome.failed_groups += 1;
                warn!(?err, %company_id, "investor relations summary failed; events kept for next run");
            }
        }
    }

    Ok(outcome)
}

const SUMMARY_LEASE: &str = "notification-summary";
const SUMMARY_LEASE_TTL: Duration = Duration::from_secs(15 * 60);

/// Runs summary passes on a fixed interval. A pass that is still running
/// causes the next one to be skipped, never to run alongside it.
///
/// Passes are serialized through a lease row in the database, so schedulers
/// in different processes sharing one database do not overlap either.
#[derive(Clone)]
pub struct NotificationScheduler {
    pool: Pool,
    collaborators: Collaborators,
    running: Arc<Mutex<()>>,
    holder: String,
}

impl NotificationScheduler {
    pub fn new(pool: Pool, collaborators: Collaborators) -> Self {
        Self {
            pool,
            collaborators,
            running: Arc::new(Mutex::new(())),
            holder: Uuid::new_v4().to_string(),
        }
    }

    /// One full pass. Returns `None` if another pass holds the lock.
    pub async fn run_once(&self) -> Result<Option<SummaryOutcome>> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("previous summary run still in progress; skipping");
            return Ok(None);
        };
        let ttl = SUMMARY_LEASE_TTL.as_millis() as i64;
        if !db::try_acquire_lease(&self.pool, SUMMARY_LEASE, &self.holder, ttl).await? {
            warn!("summary run in progress elsewhere; skipping");
            return Ok(None);
        }
        let outcome = self.run_leased().await;
        if let Err(err) = db::release_lease(&self.pool, SUMMARY_LEASE, &self.holder).await {
            warn!(?err, "failed to release summary lease; it will expire");
        }
        outcome.map(Some)
    }

    async fn run_leased(&self) -> Result<SummaryOutcome> {
        let events = db::unprocessed_notification_events(&self.pool).await?;
        if events.is_empty() {
            return Ok(SummaryOutcome::default());
        }
        process_notification_events(&self.pool, &self.collaborators, events).await
    }

    pub async fn run_forever(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(Some(outcome)) => info!(?outcome, "summary run finished"),
                Ok(None) => {}
                Err(err) => error!(?err, "summary run failed"),
            }
        }
    }
}

//! Derives notification events from request status transitions.
use crate::db::{self, Pool};
use crate::model::{
    DataMetaInfo, DataRequest, NotificationEvent, NotificationEventType, RequestStatus,
};
use anyhow::Result;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Event type for a request moving from `old` to `new`.
///
/// `new == None` is a re-check of a request whose status is not being
/// changed, e.g. a newer version of an already delivered dataset.
pub fn decide_event_type(
    old: RequestStatus,
    new: Option<RequestStatus>,
    earlier_approved_version_exists: bool,
) -> Option<NotificationEventType> {
    use RequestStatus::*;
    match (old, new) {
        (Withdrawn, _) => None,
        (Open, Some(Answered)) if earlier_approved_version_exists => {
            Some(NotificationEventType::UpdatedEvent)
        }
        (Open, Some(Answered)) => Some(NotificationEventType::AvailableEvent),
        (_, Some(Answered)) => Some(NotificationEventType::UpdatedEvent),
        (Open, Some(NonSourceable)) => Some(NotificationEventType::NonSourceableEvent),
        (Answered | Closed | Resolved, None) => Some(NotificationEventType::UpdatedEvent),
        (Resolved, Some(Resolved)) | (Closed, Some(Closed)) => {
            Some(NotificationEventType::UpdatedEvent)
        }
        _ => None,
    }
}

/// Record at most one event for `request` (in its pre-transition state).
///
/// The event is stored already processed when an immediate email went out,
/// so the summary run does not notify twice.
#[instrument(skip_all, fields(request_id = %request.id))]
pub async fn create_user_specific_notification_event(
    pool: &Pool,
    request: &DataRequest,
    new_status: Option<RequestStatus>,
    immediate_notification_was_sent: bool,
    earlier_approved_version_exists: bool,
) -> Result<Option<NotificationEvent>> {
    let Some(event_type) = decide_event_type(
        request.request_status,
        new_status,
        earlier_approved_version_exists,
    ) else {
        debug!(
            old = request.request_status.as_str(),
            new = new_status.map(|s| s.as_str()),
            "transition raises no notification event"
        );
        return Ok(None);
    };

    let event = NotificationEvent {
        id: Uuid::new_v4().to_string(),
        event_type,
        user_id: Some(request.user_id.clone()),
        company_id: request.company_id.clone(),
        framework: request.data_type,
        reporting_period: request.reporting_period.clone(),
        is_processed: immediate_notification_was_sent,
        creation_timestamp: db::now_millis(),
    };
    db::insert_notification_event(pool, &event).await?;
    info!(event_type = event_type.as_str(), "notification event recorded");
    Ok(Some(event))
}

/// Company-wide event for a newly accepted dataset. Fanned out to the
/// company's contacts and owners when the summary runs.
#[instrument(skip_all, fields(data_id = %meta.data_id))]
pub async fn create_investor_relations_event(
    pool: &Pool,
    meta: &DataMetaInfo,
) -> Result<NotificationEvent> {
    let event = NotificationEvent {
        id: Uuid::new_v4().to_string(),
        event_type: NotificationEventType::InvestorRelationsEvent,
        user_id: None,
        company_id: meta.company_id.clone(),
        framework: meta.data_type,
        reporting_period: meta.reporting_period.clone(),
        is_processed: false,
        creation_timestamp: db::now_millis(),
    };
    db::insert_notification_event(pool, &event).await?;
    info!(company_id = %event.company_id, "investor relations event recorded");
    Ok(event)
}

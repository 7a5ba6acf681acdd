//! Access to private datasets.
use super::create::new_data_request;
use super::update::non_trivial_contacts;
use crate::db::{self, Pool};
use crate::error::{RequestError, RequestResult};
use crate::gateway::Collaborators;
use crate::model::{
    AccessRequest, AccessStatus, AuthContext, DataRequest, Framework, RequestStatus,
    StatusHistoryEntry,
};
use tracing::{debug, info, instrument};

/// Whether `user_id` may see the dataset. Public frameworks are open to
/// everyone; private ones need a request with Granted access.
#[instrument(skip_all, fields(company_id = %company_id, data_type = %data_type))]
pub async fn has_access_to_private_dataset(
    pool: &Pool,
    user_id: &str,
    company_id: &str,
    data_type: &str,
    reporting_period: &str,
) -> RequestResult<bool> {
    let framework = Framework::parse_name(data_type)
        .ok_or_else(|| RequestError::invalid(format!("unknown data type {}", data_type)))?;
    if !framework.is_private() {
        return Ok(true);
    }
    let granted = db::find_by_natural_key(pool, user_id, company_id, framework, reporting_period)
        .await?
        .iter()
        .any(|r| r.access_status == AccessStatus::Granted);
    debug!(granted, "private dataset access checked");
    Ok(granted)
}

/// Ask for access to a private dataset.
///
/// An existing request for the dataset is reused: revoked or public access
/// goes back to Pending, anything else is only touched. Without one, a new
/// request is stored as Answered with Pending access.
#[instrument(skip_all, fields(company_id = %request.company_id, correlation_id = %correlation_id))]
pub async fn create_access_request_to_private_dataset(
    pool: &Pool,
    collaborators: &Collaborators,
    ctx: &AuthContext,
    request: &AccessRequest,
    correlation_id: &str,
) -> RequestResult<DataRequest> {
    let Some(user_id) = ctx.user_id() else {
        return Err(RequestError::denied("access requests need a user"));
    };
    if !request.data_type.is_private() {
        return Err(RequestError::invalid(format!(
            "{} datasets are public; no access request needed",
            request.data_type
        )));
    }
    collaborators
        .companies
        .assert_company_id_is_valid(&request.company_id)
        .await?;

    let existing = db::find_by_natural_key(
        pool,
        user_id,
        &request.company_id,
        request.data_type,
        &request.reporting_period,
    )
    .await?;
    if let Some(before) = existing.into_iter().next() {
        return reopen_access(pool, before).await;
    }

    let contacts = non_trivial_contacts(request.contacts.as_ref());
    let message = request
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    let mut stored = new_data_request(
        user_id,
        &request.company_id,
        request.data_type,
        &request.reporting_period,
        contacts.as_ref(),
        message,
        false,
    );
    stored.request_status = RequestStatus::Answered;
    stored.access_status = AccessStatus::Pending;
    for entry in &mut stored.status_history {
        entry.request_status = RequestStatus::Answered;
        entry.access_status = AccessStatus::Pending;
    }
    db::insert_data_request(pool, &stored).await?;
    info!(request_id = %stored.id, "access request stored as pending");
    Ok(stored)
}

async fn reopen_access(pool: &Pool, before: DataRequest) -> RequestResult<DataRequest> {
    let last_modified = db::next_timestamp(before.last_modified);
    let reopen = matches!(before.access_status, AccessStatus::Revoked | AccessStatus::Public);

    let mut after = before.clone();
    after.last_modified = last_modified;
    let status_entry = reopen.then(|| StatusHistoryEntry {
        request_status: before.request_status,
        access_status: AccessStatus::Pending,
        creation_timestamp: last_modified,
        request_status_change_reason: None,
        answering_data_id: None,
    });
    if let Some(entry) = &status_entry {
        after.access_status = AccessStatus::Pending;
        after.status_history.push(entry.clone());
    }

    if !db::save_data_request(pool, &after, before.last_modified, status_entry.as_ref(), None).await? {
        return Err(RequestError::Conflict(before.id));
    }
    info!(
        request_id = %after.id,
        access = after.access_status.as_str(),
        reopened = reopen,
        "access request recorded on existing data request"
    );
    Ok(after)
}

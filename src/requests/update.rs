//! Request status machine: applies patches, persists history and fires the
//! emails and notification events a transition calls for.

use super::auth::authorize_patch;
use crate::db::{self, DataRequestsFilter, Pool};
use crate::error::{RequestError, RequestResult};
use crate::gateway::Collaborators;
use crate::model::{
    AccessStatus, AuthContext, DataMetaInfo, DataRequest, DataRequestPatch, MessageHistoryEntry,
    NonSourceableInfo, RequestStatus, StatusHistoryEntry,
};
use crate::notifications;
use anyhow::anyhow;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const SUBSIDIARY_ANSWER_REASON: &str =
    "This data request was answered by a data upload to the parent company.";

/// Result of processing an accepted dataset.
#[derive(Debug, Clone, Default)]
pub struct ProcessedUserRequests {
    /// Requests moved to Answered, parent company first.
    pub answered: Vec<DataRequest>,
    /// Already answered, closed or resolved requests told about the new version.
    pub updated: Vec<String>,
}

/// Contacts with blanks removed; `None` if nothing usable is left.
pub(crate) fn non_trivial_contacts(contacts: Option<&BTreeSet<String>>) -> Option<BTreeSet<String>> {
    let cleaned: BTreeSet<String> = contacts?
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Apply `patch` to request `request_id` on behalf of `ctx`.
///
/// Status history grows only when the request or access status changes, or
/// when a request is marked NonSourceable again. `last_modified` moves for
/// status, priority, notification or message changes but not for an admin
/// comment alone.
#[instrument(skip_all, fields(request_id = %request_id, correlation_id = %correlation_id))]
pub async fn patch_data_request(
    pool: &Pool,
    collaborators: &Collaborators,
    ctx: &AuthContext,
    request_id: &str,
    patch: &DataRequestPatch,
    correlation_id: &str,
) -> RequestResult<DataRequest> {
    apply_patch(pool, collaborators, ctx, request_id, patch, correlation_id, false).await
}

async fn apply_patch(
    pool: &Pool,
    collaborators: &Collaborators,
    ctx: &AuthContext,
    request_id: &str,
    patch: &DataRequestPatch,
    correlation_id: &str,
    earlier_approved_version_exists: bool,
) -> RequestResult<DataRequest> {
    let before = db::fetch_data_request(pool, request_id)
        .await?
        .ok_or_else(|| RequestError::not_found(format!("data request {}", request_id)))?;
    authorize_patch(ctx, collaborators, &before, patch).await?;

    let contacts = non_trivial_contacts(patch.contacts.as_ref());
    let message = patch
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    if message.is_some() && contacts.is_none() {
        return Err(RequestError::invalid(
            "a message requires at least one non-blank contact",
        ));
    }

    let new_status = patch.request_status.unwrap_or(before.request_status);
    let mut new_access = patch.access_status.unwrap_or(before.access_status);
    if before.data_type.is_private()
        && new_status == RequestStatus::Answered
        && before.request_status != RequestStatus::Answered
        && new_access != AccessStatus::Granted
    {
        new_access = AccessStatus::Pending;
    }

    let request_status_changed = new_status != before.request_status;
    let write_status_entry = request_status_changed
        || new_access != before.access_status
        || patch.request_status == Some(RequestStatus::NonSourceable);

    // A status change consumes a pending "notify me immediately" request.
    let new_notify = match patch.notify_immediately {
        Some(v) => v,
        None if request_status_changed => false,
        None => before.notify_immediately,
    };
    let new_priority = patch.request_priority.unwrap_or(before.request_priority);
    let new_comment = patch
        .admin_comment
        .clone()
        .or_else(|| before.admin_comment.clone());

    let bumps_last_modified = write_status_entry
        || contacts.is_some()
        || new_priority != before.request_priority
        || new_notify != before.notify_immediately;
    if !bumps_last_modified && new_comment == before.admin_comment {
        return Ok(before);
    }

    let last_modified = if bumps_last_modified {
        db::next_timestamp(before.last_modified)
    } else {
        before.last_modified
    };

    let status_entry = write_status_entry.then(|| StatusHistoryEntry {
        request_status: new_status,
        access_status: new_access,
        creation_timestamp: last_modified,
        request_status_change_reason: patch.request_status_change_reason.clone(),
        answering_data_id: patch.answering_data_id.clone(),
    });
    let message_entry = contacts.as_ref().map(|contacts| MessageHistoryEntry {
        contacts: contacts.clone(),
        message: message.map(str::to_string),
        creation_timestamp: last_modified,
    });

    let mut after = before.clone();
    after.request_status = new_status;
    after.access_status = new_access;
    after.request_priority = new_priority;
    after.admin_comment = new_comment;
    after.notify_immediately = new_notify;
    after.last_modified = last_modified;
    after.status_history.extend(status_entry.clone());
    after.message_history.extend(message_entry.clone());

    let saved = db::save_data_request(
        pool,
        &after,
        before.last_modified,
        status_entry.as_ref(),
        message_entry.as_ref(),
    )
    .await?;
    if !saved {
        return Err(RequestError::Conflict(before.id.clone()));
    }
    info!(
        from = before.request_status.as_str(),
        to = after.request_status.as_str(),
        access = after.access_status.as_str(),
        "data request patched"
    );

    if before.request_status == RequestStatus::Withdrawn || new_status == RequestStatus::Withdrawn {
        return Ok(after);
    }

    let immediate_sent = run_side_effects(
        collaborators,
        &before,
        &after,
        message_entry.as_ref(),
        correlation_id,
    )
    .await;

    if request_status_changed {
        notifications::create_user_specific_notification_event(
            pool,
            &before,
            Some(new_status),
            immediate_sent,
            earlier_approved_version_exists,
        )
        .await?;
    }
    Ok(after)
}

/// Emails for a committed transition. Failures are logged, never rolled back.
/// Returns whether the requester was already told about the new status, in
/// which case the summary run must not tell them again.
async fn run_side_effects(
    collaborators: &Collaborators,
    before: &DataRequest,
    after: &DataRequest,
    message_entry: Option<&MessageHistoryEntry>,
    correlation_id: &str,
) -> bool {
    let email = &collaborators.email;
    let status_changed = before.request_status != after.request_status;
    let mut response_sent = false;

    let wants_response = status_changed
        && (matches!(after.request_status, RequestStatus::Answered | RequestStatus::Closed)
            || (after.request_status == RequestStatus::NonSourceable && before.notify_immediately));
    if wants_response {
        match email.send_data_request_response(after, correlation_id).await {
            Ok(()) => response_sent = true,
            Err(err) => warn!(?err, "failed to send data request response email"),
        }
    }

    if after.access_status == AccessStatus::Granted && before.access_status != AccessStatus::Granted {
        if let Err(err) = email.send_access_granted(after, correlation_id).await {
            warn!(?err, "failed to send access granted email");
        }
    }

    if let Some(entry) = message_entry {
        let contacts: Vec<String> = entry.contacts.iter().cloned().collect();
        if let Err(err) = email
            .send_single_request_to_contacts(after, &contacts, entry.message.as_deref(), correlation_id)
            .await
        {
            warn!(?err, "failed to forward message to contacts");
        }
        if after.request_status == RequestStatus::Answered
            && after.access_status == AccessStatus::Pending
        {
            if let Err(err) = email
                .send_access_requested_to_owners(after, correlation_id)
                .await
            {
                warn!(?err, "failed to notify company owners about access request");
            }
            if !response_sent {
                match email.send_data_request_response(after, correlation_id).await {
                    Ok(()) => response_sent = true,
                    Err(err) => warn!(?err, "failed to send data request response email"),
                }
            }
        }
    }

    response_sent
}

/// Outcome of patching many requests. One failing request does not stop the
/// others; failures are reported after the whole batch has been handled.
#[derive(Debug, Default)]
struct FanOut {
    patched: Vec<DataRequest>,
    failed: Vec<(String, RequestError)>,
}

impl FanOut {
    async fn patch_all(
        &mut self,
        pool: &Pool,
        collaborators: &Collaborators,
        requests: Vec<DataRequest>,
        patch: &DataRequestPatch,
        correlation_id: &str,
        earlier_approved_version_exists: bool,
    ) {
        for request in requests {
            match apply_patch(
                pool,
                collaborators,
                &AuthContext::System,
                &request.id,
                patch,
                correlation_id,
                earlier_approved_version_exists,
            )
            .await
            {
                Ok(patched) => self.patched.push(patched),
                Err(err) => {
                    warn!(?err, request_id = %request.id, "could not patch data request; continuing");
                    self.failed.push((request.id, err));
                }
            }
        }
    }

    fn into_error(failed: Vec<(String, RequestError)>) -> RequestError {
        let ids: Vec<&str> = failed.iter().map(|(id, _)| id.as_str()).collect();
        if failed
            .iter()
            .all(|(_, err)| matches!(err, RequestError::Conflict(_)))
        {
            return RequestError::Conflict(ids.join(", "));
        }
        let details: Vec<String> = failed
            .iter()
            .map(|(id, err)| format!("{}: {}", id, err))
            .collect();
        RequestError::Internal(anyhow!(
            "{} data request(s) could not be patched: {}",
            failed.len(),
            details.join("; ")
        ))
    }

    fn finish(self) -> RequestResult<Vec<DataRequest>> {
        if self.failed.is_empty() {
            Ok(self.patched)
        } else {
            Err(Self::into_error(self.failed))
        }
    }
}

async fn answer_requests_for_company(
    pool: &Pool,
    collaborators: &Collaborators,
    company_id: &str,
    meta: &DataMetaInfo,
    correlation_id: &str,
    reason: Option<&str>,
    earlier_approved_version_exists: bool,
    out: &mut FanOut,
) -> RequestResult<()> {
    let filter = DataRequestsFilter::for_dataset(
        company_id,
        meta.data_type,
        &meta.reporting_period,
        &[RequestStatus::Open, RequestStatus::NonSourceable],
    );
    let matching = db::search_data_requests(pool, &filter).await?;
    let patch = DataRequestPatch {
        request_status: Some(RequestStatus::Answered),
        answering_data_id: Some(meta.data_id.clone()),
        request_status_change_reason: reason.map(str::to_string),
        ..Default::default()
    };
    out.patch_all(
        pool,
        collaborators,
        matching,
        &patch,
        correlation_id,
        earlier_approved_version_exists,
    )
    .await;
    Ok(())
}

async fn answer_dataset(
    pool: &Pool,
    collaborators: &Collaborators,
    meta: &DataMetaInfo,
    correlation_id: &str,
) -> RequestResult<FanOut> {
    let accepted = collaborators
        .datasets
        .count_accepted_datasets(&meta.company_id, meta.data_type, &meta.reporting_period)
        .await?;
    let earlier_approved_version_exists = accepted > 1;

    let mut out = FanOut::default();
    answer_requests_for_company(
        pool,
        collaborators,
        &meta.company_id,
        meta,
        correlation_id,
        None,
        earlier_approved_version_exists,
        &mut out,
    )
    .await?;

    let subsidiaries = collaborators
        .companies
        .get_company_subsidiaries_by_parent_id(&meta.company_id)
        .await?;
    for subsidiary in subsidiaries {
        let subsidiary_correlation_id = Uuid::new_v4().to_string();
        info!(
            %subsidiary,
            parent_correlation_id = %correlation_id,
            %subsidiary_correlation_id,
            "answering subsidiary requests"
        );
        answer_requests_for_company(
            pool,
            collaborators,
            &subsidiary,
            meta,
            &subsidiary_correlation_id,
            Some(SUBSIDIARY_ANSWER_REASON),
            earlier_approved_version_exists,
            &mut out,
        )
        .await?;
    }
    Ok(out)
}

/// Move every Open or NonSourceable request for the dataset's company and its
/// direct subsidiaries to Answered.
#[instrument(skip_all, fields(data_id = %data_id, correlation_id = %correlation_id))]
pub async fn patch_request_status_from_open_or_non_sourceable_to_answered(
    pool: &Pool,
    collaborators: &Collaborators,
    data_id: &str,
    correlation_id: &str,
) -> RequestResult<Vec<DataRequest>> {
    let meta = collaborators.datasets.get_data_meta_info(data_id).await?;
    answer_dataset(pool, collaborators, &meta, correlation_id)
        .await?
        .finish()
}

/// Handle a newly accepted dataset: answer waiting requests and tell holders
/// of already answered requests that a new version exists.
#[instrument(skip_all, fields(data_id = %data_id, correlation_id = %correlation_id))]
pub async fn process_user_requests(
    pool: &Pool,
    collaborators: &Collaborators,
    data_id: &str,
    correlation_id: &str,
) -> RequestResult<ProcessedUserRequests> {
    let meta = collaborators.datasets.get_data_meta_info(data_id).await?;
    let FanOut {
        patched: answered,
        failed,
    } = answer_dataset(pool, collaborators, &meta, correlation_id).await?;
    // Failed requests are still waiting and must not be told about an update.
    let just_answered: BTreeSet<&str> = answered
        .iter()
        .map(|r| r.id.as_str())
        .chain(failed.iter().map(|(id, _)| id.as_str()))
        .collect();

    let filter = DataRequestsFilter::for_dataset(
        &meta.company_id,
        meta.data_type,
        &meta.reporting_period,
        &[RequestStatus::Answered, RequestStatus::Closed, RequestStatus::Resolved],
    );
    let mut updated = Vec::new();
    for request in db::search_data_requests(pool, &filter).await? {
        if just_answered.contains(request.id.as_str()) {
            continue;
        }
        // Private datasets never show up in summaries. Holders are emailed
        // directly unless their access was taken away.
        if request.data_type.is_private() {
            if request.access_status != AccessStatus::Revoked {
                if let Err(err) = collaborators
                    .email
                    .send_data_updated(&request, correlation_id)
                    .await
                {
                    warn!(?err, request_id = %request.id, "failed to send data updated email");
                }
            }
            updated.push(request.id);
            continue;
        }
        let mut immediate_sent = false;
        if request.notify_immediately {
            match collaborators
                .email
                .send_data_updated(&request, correlation_id)
                .await
            {
                Ok(()) => immediate_sent = true,
                Err(err) => warn!(?err, request_id = %request.id, "failed to send data updated email"),
            }
        }
        notifications::create_user_specific_notification_event(
            pool,
            &request,
            None,
            immediate_sent,
            true,
        )
        .await?;
        updated.push(request.id);
    }

    info!(
        answered = answered.len(),
        updated = updated.len(),
        failed = failed.len(),
        "user requests processed"
    );
    if !failed.is_empty() {
        return Err(FanOut::into_error(failed));
    }
    Ok(ProcessedUserRequests { answered, updated })
}

/// Mark every Open or NonSourceable request for the exact dataset triple as
/// NonSourceable. Refuses declarations that are not actually non-sourceable.
#[instrument(skip_all, fields(company_id = %info.company_id, correlation_id = %correlation_id))]
pub async fn patch_all_requests_to_status_non_sourceable(
    pool: &Pool,
    collaborators: &Collaborators,
    info: &NonSourceableInfo,
    correlation_id: &str,
) -> RequestResult<Vec<DataRequest>> {
    if !info.is_non_sourceable {
        return Err(RequestError::invalid(format!(
            "dataset {}/{}/{} is not declared non-sourceable",
            info.company_id,
            info.data_type.as_str(),
            info.reporting_period
        )));
    }
    let filter = DataRequestsFilter::for_dataset(
        &info.company_id,
        info.data_type,
        &info.reporting_period,
        &[RequestStatus::Open, RequestStatus::NonSourceable],
    );
    let patch = DataRequestPatch {
        request_status: Some(RequestStatus::NonSourceable),
        request_status_change_reason: Some(info.reason.clone()),
        ..Default::default()
    };
    let matching = db::search_data_requests(pool, &filter).await?;
    let mut out = FanOut::default();
    out.patch_all(pool, collaborators, matching, &patch, correlation_id, false)
        .await;
    out.finish()
}

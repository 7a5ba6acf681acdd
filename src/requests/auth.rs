//! Who may change what on a data request.
use crate::error::{RequestError, RequestResult};
use crate::gateway::Collaborators;
use crate::model::{AuthContext, DataRequest, DataRequestPatch, RequestStatus};

/// Status changes a requester may make on their own request.
pub fn user_may_change_status(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;
    matches!(
        (from, to),
        (Answered, Resolved)
            | (Answered, Open)
            | (Answered, Withdrawn)
            | (Open, Withdrawn)
            | (NonSourceable, Open)
    )
}

/// A message can be attached while the request is open, or when reopening an
/// answered request.
fn message_allowed(request: &DataRequest, patch: &DataRequestPatch) -> bool {
    let has_message = patch
        .message
        .as_deref()
        .is_some_and(|m| !m.trim().is_empty());
    let target = patch.request_status.unwrap_or(request.request_status);
    has_message
        && (request.request_status == RequestStatus::Open
            || (request.request_status == RequestStatus::Answered && target == RequestStatus::Open))
}

/// Reject the patch unless `ctx` may apply every part of it.
pub async fn authorize_patch(
    ctx: &AuthContext,
    collaborators: &Collaborators,
    request: &DataRequest,
    patch: &DataRequestPatch,
) -> RequestResult<()> {
    if ctx.is_admin() {
        return Ok(());
    }
    let Some(user_id) = ctx.user_id() else {
        return Err(RequestError::denied("unauthenticated caller"));
    };

    if patch.request_priority.is_some_and(|p| p != request.request_priority) {
        return Err(RequestError::denied("only admins may change the request priority"));
    }
    if patch.admin_comment.is_some() {
        return Err(RequestError::denied("only admins may set the admin comment"));
    }

    let is_requester = request.user_id == user_id;
    let is_owner = collaborators
        .is_company_owner(&request.company_id, user_id)
        .await?;

    if let Some(access) = patch.access_status {
        if access != request.access_status && !is_owner {
            return Err(RequestError::denied(
                "only company owners may change the access status",
            ));
        }
    }

    if let Some(status) = patch.request_status {
        if status != request.request_status
            && !(is_requester && user_may_change_status(request.request_status, status))
        {
            return Err(RequestError::denied(format!(
                "status change {} -> {} is not allowed for this user",
                request.request_status.as_str(),
                status.as_str()
            )));
        }
    }

    if (patch.contacts.is_some() || patch.message.is_some())
        && !(is_requester && message_allowed(request, patch))
    {
        return Err(RequestError::denied(
            "contacts can only be added with a message to an open request",
        ));
    }

    if patch.notify_immediately.is_some() && !is_requester {
        return Err(RequestError::denied(
            "only the requester may change notification settings",
        ));
    }

    if !is_requester && !is_owner {
        return Err(RequestError::denied(format!(
            "user {} may not modify data request {}",
            user_id, request.id
        )));
    }
    Ok(())
}

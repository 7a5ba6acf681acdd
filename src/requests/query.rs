use crate::db::{self, DataRequestsFilter, Pool};
use crate::error::{RequestError, RequestResult};
use crate::gateway::Collaborators;
use crate::model::{
    AggregatedDataRequestWithAggregatedPriority, AggregatedRequestPriority, AuthContext,
    DataRequest, Framework,
};
use crate::priority::{aggregate_request_priority, filter_based_on_aggregated_priority};
use std::collections::BTreeSet;
use tracing::instrument;

/// Open requests grouped per (framework, period, company) with their
/// aggregated priority, optionally restricted to one priority.
#[instrument(skip_all)]
pub async fn get_aggregated_open_data_requests_with_aggregated_request_priority(
    pool: &Pool,
    data_types: Option<&BTreeSet<Framework>>,
    reporting_period: Option<&str>,
    aggregated_priority: Option<AggregatedRequestPriority>,
) -> RequestResult<Vec<AggregatedDataRequestWithAggregatedPriority>> {
    // An empty framework set means "all frameworks".
    let types: Option<Vec<Framework>> = data_types
        .filter(|t| !t.is_empty())
        .map(|t| t.iter().copied().collect());
    let rows = db::aggregated_open_requests(pool, types.as_deref(), reporting_period).await?;
    let aggregated = aggregate_request_priority(&rows);
    Ok(match aggregated_priority {
        Some(target) => filter_based_on_aggregated_priority(&aggregated, target),
        None => aggregated,
    })
}

/// Admin search. `email_fragment` is resolved to user ids first; no matching
/// users means no results.
#[instrument(skip_all)]
pub async fn get_data_requests(
    pool: &Pool,
    collaborators: &Collaborators,
    ctx: &AuthContext,
    filter: &DataRequestsFilter,
    email_fragment: Option<&str>,
) -> RequestResult<Vec<DataRequest>> {
    if !ctx.is_admin() {
        return Err(RequestError::denied("only admins may search all data requests"));
    }
    let mut filter = filter.clone();
    if let Some(fragment) = email_fragment.filter(|f| !f.trim().is_empty()) {
        let users = collaborators.users.search_users_by_email(fragment).await?;
        filter.user_ids = Some(users.into_iter().map(|u| u.user_id).collect());
    }
    Ok(db::search_data_requests(pool, &filter).await?)
}

/// A single request, visible to its requester and to admins. The admin
/// comment is hidden from everyone else.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn get_data_request_by_id(
    pool: &Pool,
    ctx: &AuthContext,
    request_id: &str,
) -> RequestResult<DataRequest> {
    let mut request = db::fetch_data_request(pool, request_id)
        .await?
        .ok_or_else(|| RequestError::not_found(format!("data request {}", request_id)))?;
    if ctx.is_admin() {
        return Ok(request);
    }
    if ctx.user_id() != Some(request.user_id.as_str()) {
        return Err(RequestError::denied(format!(
            "data request {} belongs to another user",
            request_id
        )));
    }
    request.admin_comment = None;
    Ok(request)
}

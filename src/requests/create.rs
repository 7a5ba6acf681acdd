//! Creating data requests from single and bulk submissions.
use super::update::non_trivial_contacts;
use crate::db::{self, Pool};
use crate::error::{RequestError, RequestResult};
use crate::gateway::{Capability, Collaborators};
use crate::model::{
    AuthContext, BulkDataRequest, BulkDataRequestResponse, DataRequest, Framework,
    MessageHistoryEntry, RequestPriority, RequestReference, RequestStatus, SingleDataRequest,
    SingleDataRequestResponse, StatusHistoryEntry, ROLE_ADMIN, ROLE_PREMIUM_USER,
};
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

static COMPANY_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});
static LEI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Z]{18}[0-9]{2}$").unwrap());
static ISIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}[A-Z\d]{10}$").unwrap());
static PERM_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyIdentifierType {
    DatalandCompanyId,
    Lei,
    Isin,
    PermId,
}

/// Classify a user-supplied identifier. LEI is tried before ISIN since some
/// LEIs also have ISIN shape.
pub fn determine_identifier_type(value: &str) -> Option<CompanyIdentifierType> {
    if COMPANY_ID_RE.is_match(value) {
        Some(CompanyIdentifierType::DatalandCompanyId)
    } else if LEI_RE.is_match(value) {
        Some(CompanyIdentifierType::Lei)
    } else if ISIN_RE.is_match(value) {
        Some(CompanyIdentifierType::Isin)
    } else if PERM_ID_RE.is_match(value) {
        Some(CompanyIdentifierType::PermId)
    } else {
        None
    }
}

/// Dataland company id for `identifier`, or `None` if it cannot be resolved
/// to exactly one company. Unknown company ids are `NotFound`.
async fn resolve_company_id(
    collaborators: &Collaborators,
    identifier: &str,
) -> RequestResult<Option<String>> {
    match determine_identifier_type(identifier) {
        Some(CompanyIdentifierType::DatalandCompanyId) => {
            collaborators
                .companies
                .assert_company_id_is_valid(identifier)
                .await?;
            Ok(Some(identifier.to_string()))
        }
        Some(kind) => {
            let matches = collaborators
                .companies
                .find_companies_by_identifier(identifier)
                .await?;
            debug!(identifier, ?kind, matches = matches.len(), "identifier lookup");
            Ok(match matches.as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            })
        }
        None => Ok(None),
    }
}

async fn ensure_owner_policy_allows(
    collaborators: &Collaborators,
    company_id: &str,
) -> RequestResult<()> {
    match collaborators
        .data_owners
        .rejects_request_for_owned_company(company_id)
        .await
    {
        Capability::Implemented(true) => Err(RequestError::invalid(format!(
            "company {} has a data owner; request the data from them directly",
            company_id
        ))),
        Capability::Implemented(false) | Capability::NotYetImplemented => Ok(()),
    }
}

fn start_of_utc_day_millis() -> i64 {
    let today = Utc::now().date_naive();
    today
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight).timestamp_millis())
        .unwrap_or(0)
}

pub(crate) fn new_data_request(
    user_id: &str,
    company_id: &str,
    data_type: Framework,
    reporting_period: &str,
    contacts: Option<&BTreeSet<String>>,
    message: Option<&str>,
    notify_immediately: bool,
) -> DataRequest {
    let now = db::now_millis();
    let access_status = data_type.initial_access_status();
    DataRequest {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        company_id: company_id.to_string(),
        data_type,
        reporting_period: reporting_period.to_string(),
        creation_timestamp: now,
        last_modified: now,
        request_status: RequestStatus::Open,
        access_status,
        request_priority: RequestPriority::default(),
        admin_comment: None,
        notify_immediately,
        status_history: vec![StatusHistoryEntry {
            request_status: RequestStatus::Open,
            access_status,
            creation_timestamp: now,
            request_status_change_reason: None,
            answering_data_id: None,
        }],
        message_history: contacts
            .map(|contacts| MessageHistoryEntry {
                contacts: contacts.clone(),
                message: message.map(str::to_string),
                creation_timestamp: now,
            })
            .into_iter()
            .collect(),
    }
}

/// An Open or NonSourceable request the user already holds for the triple.
async fn existing_waiting_request(
    pool: &Pool,
    user_id: &str,
    company_id: &str,
    data_type: Framework,
    reporting_period: &str,
) -> RequestResult<Option<DataRequest>> {
    let existing =
        db::find_by_natural_key(pool, user_id, company_id, data_type, reporting_period).await?;
    Ok(existing
        .into_iter()
        .find(|r| r.request_status.is_awaiting_data()))
}

async fn requester_is_privileged(
    ctx: &AuthContext,
    collaborators: &Collaborators,
    user_id: &str,
    impersonating: bool,
) -> RequestResult<bool> {
    if !impersonating {
        return Ok(ctx.has_role(ROLE_PREMIUM_USER) || ctx.has_role(ROLE_ADMIN));
    }
    let roles = collaborators.users.get_user_role_names(user_id).await?;
    Ok(roles.iter().any(|r| r == ROLE_PREMIUM_USER || r == ROLE_ADMIN))
}

/// Store one request per reporting period unless the user already waits for
/// that dataset. Admins may file the request on behalf of another user.
#[instrument(skip_all, fields(identifier = %request.company_identifier, correlation_id = %correlation_id))]
pub async fn process_single_data_request(
    pool: &Pool,
    collaborators: &Collaborators,
    ctx: &AuthContext,
    request: &SingleDataRequest,
    impersonated_user_id: Option<&str>,
    max_requests_for_user: u32,
    correlation_id: &str,
) -> RequestResult<SingleDataRequestResponse> {
    let user_id = match (impersonated_user_id, ctx.user_id()) {
        (Some(other), _) if ctx.is_admin() => other.to_string(),
        (Some(_), _) => {
            return Err(RequestError::denied(
                "only admins may file requests on behalf of other users",
            ))
        }
        (None, Some(own)) => own.to_string(),
        (None, None) => return Err(RequestError::denied("a requesting user is required")),
    };

    if request.reporting_periods.is_empty() {
        return Err(RequestError::invalid("at least one reporting period is required"));
    }
    let contacts = non_trivial_contacts(request.contacts.as_ref());
    let message = request
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    if message.is_some() && contacts.is_none() {
        return Err(RequestError::invalid(
            "a message requires at least one non-blank contact",
        ));
    }

    let company_id = resolve_company_id(collaborators, &request.company_identifier)
        .await?
        .ok_or_else(|| {
            RequestError::invalid(format!(
                "company identifier {} does not match exactly one company",
                request.company_identifier
            ))
        })?;
    ensure_owner_policy_allows(collaborators, &company_id).await?;

    if !requester_is_privileged(ctx, collaborators, &user_id, impersonated_user_id.is_some()).await? {
        let today = db::count_requests_since(pool, &user_id, start_of_utc_day_millis()).await?;
        let wanted = request.reporting_periods.len() as i64;
        if today + wanted > i64::from(max_requests_for_user) {
            return Err(RequestError::QuotaExceeded(format!(
                "daily limit of {} requests reached ({} today, {} requested)",
                max_requests_for_user, today, wanted
            )));
        }
    }

    let mut stored = Vec::new();
    let mut duplicates = Vec::new();
    for period in &request.reporting_periods {
        if let Some(existing) =
            existing_waiting_request(pool, &user_id, &company_id, request.data_type, period).await?
        {
            debug!(request_id = %existing.id, %period, "request already exists");
            duplicates.push(period.clone());
            continue;
        }
        let new_request = new_data_request(
            &user_id,
            &company_id,
            request.data_type,
            period,
            contacts.as_ref(),
            message,
            request.notify_me_immediately,
        );
        db::insert_data_request(pool, &new_request).await?;
        info!(request_id = %new_request.id, %period, "data request stored");

        if let Some(contacts) = &contacts {
            let receivers: Vec<String> = contacts.iter().cloned().collect();
            if let Err(err) = collaborators
                .email
                .send_single_request_to_contacts(&new_request, &receivers, message, correlation_id)
                .await
            {
                warn!(?err, request_id = %new_request.id, "failed to send single request email");
            }
        }
        stored.push(period.clone());
    }

    let message = match (stored.len(), duplicates.len()) {
        (0, _) => "Your data request was not stored, as it was already created by you before.".to_string(),
        (n, 0) => format!("{} data request(s) stored.", n),
        (n, d) => format!(
            "{} data request(s) stored; {} already existed and were skipped.",
            n, d
        ),
    };
    Ok(SingleDataRequestResponse {
        message,
        reporting_periods_of_stored_data_requests: stored,
        reporting_periods_of_duplicate_data_requests: duplicates,
    })
}

fn empty_bulk_lists_message(request: &BulkDataRequest) -> Option<String> {
    let mut empty = Vec::new();
    if request.company_identifiers.is_empty() {
        empty.push("company identifiers");
    }
    if request.data_types.is_empty() {
        empty.push("frameworks");
    }
    if request.reporting_periods.is_empty() {
        empty.push("reporting periods");
    }
    (!empty.is_empty()).then(|| format!("empty list of {}", empty.join(" and ")))
}

/// Store one request per distinct (company, framework, period), however many
/// submitted identifiers resolve to the same company.
#[instrument(skip_all, fields(correlation_id = %correlation_id))]
pub async fn process_bulk_data_request(
    pool: &Pool,
    collaborators: &Collaborators,
    ctx: &AuthContext,
    request: &BulkDataRequest,
    correlation_id: &str,
) -> RequestResult<BulkDataRequestResponse> {
    let Some(user_id) = ctx.user_id() else {
        return Err(RequestError::denied("a requesting user is required"));
    };
    if let Some(msg) = empty_bulk_lists_message(request) {
        return Err(RequestError::invalid(msg));
    }

    let mut companies: BTreeMap<String, String> = BTreeMap::new();
    let mut rejected = Vec::new();
    for identifier in &request.company_identifiers {
        let resolved = match resolve_company_id(collaborators, identifier).await {
            Ok(resolved) => resolved,
            Err(RequestError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        match resolved {
            Some(company_id) => {
                companies.entry(company_id).or_insert_with(|| identifier.clone());
            }
            None => rejected.push(identifier.clone()),
        }
    }
    if companies.is_empty() {
        return Err(RequestError::invalid(
            "none of the company identifiers matches a known company",
        ));
    }
    for company_id in companies.keys() {
        ensure_owner_policy_allows(collaborators, company_id).await?;
    }

    let mut accepted = Vec::new();
    let mut already_existing = Vec::new();
    for (company_id, identifier) in &companies {
        for data_type in &request.data_types {
            for period in &request.reporting_periods {
                let reference = |id: &str| RequestReference {
                    data_request_id: id.to_string(),
                    company_id: company_id.clone(),
                    data_type: *data_type,
                    reporting_period: period.clone(),
                    user_provided_company_identifier: identifier.clone(),
                };
                if let Some(existing) =
                    existing_waiting_request(pool, user_id, company_id, *data_type, period).await?
                {
                    already_existing.push(reference(&existing.id));
                    continue;
                }
                let new_request = new_data_request(
                    user_id,
                    company_id,
                    *data_type,
                    period,
                    None,
                    None,
                    request.notify_me_immediately,
                );
                db::insert_data_request(pool, &new_request).await?;
                accepted.push(reference(&new_request.id));
            }
        }
    }
    info!(
        accepted = accepted.len(),
        existing = already_existing.len(),
        rejected = rejected.len(),
        "bulk data request processed"
    );

    if !accepted.is_empty() {
        if let Err(err) = collaborators
            .email
            .send_bulk_request_notification(user_id, &accepted, correlation_id)
            .await
        {
            warn!(?err, "failed to send bulk request notification");
        }
    }

    Ok(BulkDataRequestResponse {
        accepted_data_requests: accepted,
        already_existing_requests: already_existing,
        rejected_company_identifiers: rejected,
    })
}

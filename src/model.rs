use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle stage of a data request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Open,
    Answered,
    Resolved,
    Withdrawn,
    Closed,
    NonSourceable,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "Open",
            RequestStatus::Answered => "Answered",
            RequestStatus::Resolved => "Resolved",
            RequestStatus::Withdrawn => "Withdrawn",
            RequestStatus::Closed => "Closed",
            RequestStatus::NonSourceable => "NonSourceable",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(RequestStatus::Open),
            "Answered" => Some(RequestStatus::Answered),
            "Resolved" => Some(RequestStatus::Resolved),
            "Withdrawn" => Some(RequestStatus::Withdrawn),
            "Closed" => Some(RequestStatus::Closed),
            "NonSourceable" => Some(RequestStatus::NonSourceable),
            _ => None,
        }
    }

    /// Statuses that still wait for data to arrive.
    pub fn is_awaiting_data(&self) -> bool {
        matches!(self, RequestStatus::Open | RequestStatus::NonSourceable)
    }
}

/// Permission axis for private datasets, independent of the request status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AccessStatus {
    Public,
    Pending,
    Granted,
    Revoked,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Public => "Public",
            AccessStatus::Pending => "Pending",
            AccessStatus::Granted => "Granted",
            AccessStatus::Revoked => "Revoked",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "Public" => Some(AccessStatus::Public),
            "Pending" => Some(AccessStatus::Pending),
            "Granted" => Some(AccessStatus::Granted),
            "Revoked" => Some(AccessStatus::Revoked),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub enum RequestPriority {
    #[default]
    Low,
    Baseline,
    High,
    Urgent,
}

impl RequestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::Low => "Low",
            RequestPriority::Baseline => "Baseline",
            RequestPriority::High => "High",
            RequestPriority::Urgent => "Urgent",
        }
    }

    pub fn parse_priority(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(RequestPriority::Low),
            "Baseline" => Some(RequestPriority::Baseline),
            "High" => Some(RequestPriority::High),
            "Urgent" => Some(RequestPriority::Urgent),
            _ => None,
        }
    }
}

/// Rollup of individual request priorities for one (company, framework, period) group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregatedRequestPriority {
    Low,
    Normal,
    Baseline,
    High,
    VeryHigh,
    Urgent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationEventType {
    AvailableEvent,
    UpdatedEvent,
    NonSourceableEvent,
    InvestorRelationsEvent,
}

impl NotificationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEventType::AvailableEvent => "AvailableEvent",
            NotificationEventType::UpdatedEvent => "UpdatedEvent",
            NotificationEventType::NonSourceableEvent => "NonSourceableEvent",
            NotificationEventType::InvestorRelationsEvent => "InvestorRelationsEvent",
        }
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "AvailableEvent" => Some(NotificationEventType::AvailableEvent),
            "UpdatedEvent" => Some(NotificationEventType::UpdatedEvent),
            "NonSourceableEvent" => Some(NotificationEventType::NonSourceableEvent),
            "InvestorRelationsEvent" => Some(NotificationEventType::InvestorRelationsEvent),
            _ => None,
        }
    }
}

/// QA verdict attached to an uploaded dataset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QaStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Framework (data type) names shared with the backend. Anything outside this
/// list is rejected where it enters the process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Framework {
    #[serde(rename = "additional-company-information")]
    AdditionalCompanyInformation,
    #[serde(rename = "esg-datenerhebung")]
    EsgDatenerhebung,
    #[serde(rename = "eutaxonomy-financials")]
    EutaxonomyFinancials,
    #[serde(rename = "eutaxonomy-non-financials")]
    EutaxonomyNonFinancials,
    #[serde(rename = "heimathafen")]
    Heimathafen,
    #[serde(rename = "lksg")]
    Lksg,
    #[serde(rename = "nuclear-and-gas")]
    NuclearAndGas,
    #[serde(rename = "p2p")]
    P2p,
    #[serde(rename = "pcaf")]
    Pcaf,
    #[serde(rename = "sfdr")]
    Sfdr,
    #[serde(rename = "vsme")]
    Vsme,
}

impl Framework {
    pub const ALL: [Framework; 11] = [
        Framework::AdditionalCompanyInformation,
        Framework::EsgDatenerhebung,
        Framework::EutaxonomyFinancials,
        Framework::EutaxonomyNonFinancials,
        Framework::Heimathafen,
        Framework::Lksg,
        Framework::NuclearAndGas,
        Framework::P2p,
        Framework::Pcaf,
        Framework::Sfdr,
        Framework::Vsme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::AdditionalCompanyInformation => "additional-company-information",
            Framework::EsgDatenerhebung => "esg-datenerhebung",
            Framework::EutaxonomyFinancials => "eutaxonomy-financials",
            Framework::EutaxonomyNonFinancials => "eutaxonomy-non-financials",
            Framework::Heimathafen => "heimathafen",
            Framework::Lksg => "lksg",
            Framework::NuclearAndGas => "nuclear-and-gas",
            Framework::P2p => "p2p",
            Framework::Pcaf => "pcaf",
            Framework::Sfdr => "sfdr",
            Framework::Vsme => "vsme",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        Framework::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Private frameworks are only visible after the company grants access.
    pub fn is_private(&self) -> bool {
        matches!(self, Framework::Vsme)
    }

    pub fn initial_access_status(&self) -> AccessStatus {
        if self.is_private() {
            AccessStatus::Pending
        } else {
            AccessStatus::Public
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub request_status: RequestStatus,
    pub access_status: AccessStatus,
    pub creation_timestamp: i64,
    pub request_status_change_reason: Option<String>,
    pub answering_data_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistoryEntry {
    pub contacts: BTreeSet<String>,
    pub message: Option<String>,
    pub creation_timestamp: i64,
}

/// A user's request for one dataset, together with its full history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub id: String,
    pub user_id: String,
    pub company_id: String,
    pub data_type: Framework,
    pub reporting_period: String,
    pub creation_timestamp: i64,
    pub last_modified: i64,
    pub request_status: RequestStatus,
    pub access_status: AccessStatus,
    pub request_priority: RequestPriority,
    pub admin_comment: Option<String>,
    pub notify_immediately: bool,
    pub status_history: Vec<StatusHistoryEntry>,
    pub message_history: Vec<MessageHistoryEntry>,
}

impl DataRequest {
    /// Status of the newest history entry; falls back to the stored column
    /// for rows that have no history yet.
    pub fn current_status(&self) -> (RequestStatus, AccessStatus) {
        self.status_history
            .iter()
            .max_by_key(|e| e.creation_timestamp)
            .map(|e| (e.request_status, e.access_status))
            .unwrap_or((self.request_status, self.access_status))
    }
}

/// Changes requested for a single data request. `None` means "leave as is".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataRequestPatch {
    pub request_status: Option<RequestStatus>,
    pub access_status: Option<AccessStatus>,
    pub contacts: Option<BTreeSet<String>>,
    pub message: Option<String>,
    pub request_priority: Option<RequestPriority>,
    pub admin_comment: Option<String>,
    pub notify_immediately: Option<bool>,
    pub request_status_change_reason: Option<String>,
    pub answering_data_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: String,
    pub event_type: NotificationEventType,
    pub user_id: Option<String>,
    pub company_id: String,
    pub framework: Framework,
    pub reporting_period: String,
    pub is_processed: bool,
    pub creation_timestamp: i64,
}

/// Declaration that a dataset cannot be sourced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NonSourceableInfo {
    pub company_id: String,
    pub data_type: Framework,
    pub reporting_period: String,
    pub is_non_sourceable: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataMetaInfo {
    pub data_id: String,
    pub company_id: String,
    pub data_type: Framework,
    pub reporting_period: String,
    pub qa_status: QaStatus,
}

/// One row of the open-request GROUP BY: count of requests with `priority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedDataRequest {
    pub data_type: Framework,
    pub reporting_period: String,
    pub company_id: String,
    pub priority: RequestPriority,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedDataRequestWithAggregatedPriority {
    pub data_type: Framework,
    pub reporting_period: String,
    pub company_id: String,
    pub aggregated_priority: AggregatedRequestPriority,
    pub request_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CompanyRole {
    CompanyOwner,
    DataUploader,
    MemberAdmin,
    Member,
}

impl CompanyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyRole::CompanyOwner => "CompanyOwner",
            CompanyRole::DataUploader => "DataUploader",
            CompanyRole::MemberAdmin => "MemberAdmin",
            CompanyRole::Member => "Member",
        }
    }

    pub fn parse_role(s: &str) -> Option<Self> {
        match s {
            "CompanyOwner" => Some(CompanyRole::CompanyOwner),
            "DataUploader" => Some(CompanyRole::DataUploader),
            "MemberAdmin" => Some(CompanyRole::MemberAdmin),
            "Member" => Some(CompanyRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRoleAssignment {
    pub company_role: CompanyRole,
    pub company_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SingleDataRequest {
    pub company_identifier: String,
    pub data_type: Framework,
    pub reporting_periods: BTreeSet<String>,
    #[serde(default)]
    pub contacts: Option<BTreeSet<String>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub notify_me_immediately: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SingleDataRequestResponse {
    pub message: String,
    pub reporting_periods_of_stored_data_requests: Vec<String>,
    pub reporting_periods_of_duplicate_data_requests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkDataRequest {
    pub company_identifiers: BTreeSet<String>,
    pub data_types: BTreeSet<Framework>,
    pub reporting_periods: BTreeSet<String>,
    #[serde(default)]
    pub notify_me_immediately: bool,
}

/// Reference to a stored request returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestReference {
    pub data_request_id: String,
    pub company_id: String,
    pub data_type: Framework,
    pub reporting_period: String,
    pub user_provided_company_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkDataRequestResponse {
    pub accepted_data_requests: Vec<RequestReference>,
    pub already_existing_requests: Vec<RequestReference>,
    pub rejected_company_identifiers: Vec<String>,
}

/// A user asking to see a private dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub company_id: String,
    pub data_type: Framework,
    pub reporting_period: String,
    #[serde(default)]
    pub contacts: Option<BTreeSet<String>>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Caller identity, passed explicitly into every mutating entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    /// Internal callers such as message listeners and the scheduler.
    System,
    User(AuthenticatedUser),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub roles: Vec<String>,
}

pub const ROLE_ADMIN: &str = "ROLE_ADMIN";
pub const ROLE_PREMIUM_USER: &str = "ROLE_PREMIUM_USER";

impl AuthContext {
    pub fn user(user_id: impl Into<String>, roles: &[&str]) -> Self {
        AuthContext::User(AuthenticatedUser {
            user_id: user_id.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        })
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuthContext::System => None,
            AuthContext::User(u) => Some(&u.user_id),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        match self {
            AuthContext::System => false,
            AuthContext::User(u) => u.roles.iter().any(|r| r == role),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AuthContext::System) || self.has_role(ROLE_ADMIN)
    }
}

//! Query parameters used by repositories.
//!
//! Domain entities live in `crate::model`; this module only holds shapes that
//! exist for the sake of SQL.

use crate::model::{AccessStatus, Framework, RequestPriority, RequestStatus};

/// Structured search over stored data requests.
///
/// `None` leaves a column unconstrained. `Some(vec![])` matches nothing, which
/// is what an email search that resolved to zero users must produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRequestsFilter {
    pub data_types: Option<Vec<Framework>>,
    pub company_ids: Option<Vec<String>>,
    pub reporting_periods: Option<Vec<String>>,
    pub request_statuses: Option<Vec<RequestStatus>>,
    pub access_statuses: Option<Vec<AccessStatus>>,
    pub request_priorities: Option<Vec<RequestPriority>>,
    /// Substring match on the requesting user's id.
    pub user_id: Option<String>,
    /// Exact user ids, typically resolved from an email substring.
    pub user_ids: Option<Vec<String>>,
}

impl DataRequestsFilter {
    /// All requests for one dataset triple in any of `statuses`.
    pub fn for_dataset(
        company_id: &str,
        data_type: Framework,
        reporting_period: &str,
        statuses: &[RequestStatus],
    ) -> Self {
        Self {
            data_types: Some(vec![data_type]),
            company_ids: Some(vec![company_id.to_string()]),
            reporting_periods: Some(vec![reporting_period.to_string()]),
            request_statuses: Some(statuses.to_vec()),
            ..Default::default()
        }
    }
}

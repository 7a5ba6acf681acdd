//! Seams to the services the community manager talks to.
//!
//! Each collaborator is an async trait so the request logic can be driven by
//! recording doubles in tests and by the HTTP clients in `http` in production.

use crate::db::{self, Pool};
use crate::error::{RequestError, RequestResult};
use crate::model::{
    CompanyRole, CompanyRoleAssignment, DataMetaInfo, DataRequest, Framework, NotificationEvent,
    RequestReference, UserInfo,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub mod http;

/// Company master data owned by the backend.
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    /// Display name, or `NotFound` for unknown ids.
    async fn get_valid_company_name(&self, company_id: &str) -> RequestResult<String>;

    async fn assert_company_id_is_valid(&self, company_id: &str) -> RequestResult<()> {
        self.get_valid_company_name(company_id).await.map(|_| ())
    }

    async fn get_company_subsidiaries_by_parent_id(&self, company_id: &str) -> Result<Vec<String>>;

    async fn get_company_contact_emails(&self, company_id: &str) -> Result<Vec<String>>;

    /// Company ids matching an LEI, ISIN or PermId.
    async fn find_companies_by_identifier(&self, identifier: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait CompanyRoles: Send + Sync {
    async fn get_company_role_assignments_by_parameters(
        &self,
        role: Option<CompanyRole>,
        company_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<CompanyRoleAssignment>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserInfo>>;

    /// Users whose email address contains `fragment`.
    async fn search_users_by_email(&self, fragment: &str) -> Result<Vec<UserInfo>>;

    async fn get_user_role_names(&self, user_id: &str) -> Result<Vec<String>>;

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserInfo>>;
}

#[async_trait]
pub trait DatasetMetadata: Send + Sync {
    async fn get_data_meta_info(&self, data_id: &str) -> RequestResult<DataMetaInfo>;

    /// Number of QA-accepted datasets for the triple, including the newest upload.
    async fn count_accepted_datasets(
        &self,
        company_id: &str,
        data_type: Framework,
        reporting_period: &str,
    ) -> Result<usize>;
}

/// Builds and sends every message the community manager emits.
/// The gateway owns templates and delivery; callers only decide whether to send.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    /// Tells the requester that their request was answered or closed.
    async fn send_data_request_response(&self, request: &DataRequest, correlation_id: &str) -> Result<()>;

    async fn send_access_granted(&self, request: &DataRequest, correlation_id: &str) -> Result<()>;

    /// Asks the company owners to decide on a pending access request.
    async fn send_access_requested_to_owners(
        &self,
        request: &DataRequest,
        correlation_id: &str,
    ) -> Result<()>;

    async fn send_data_updated(&self, request: &DataRequest, correlation_id: &str) -> Result<()>;

    /// Forwards a requester's message to the given company contacts.
    async fn send_single_request_to_contacts(
        &self,
        request: &DataRequest,
        contacts: &[String],
        message: Option<&str>,
        correlation_id: &str,
    ) -> Result<()>;

    async fn send_bulk_request_notification(
        &self,
        user_id: &str,
        accepted: &[RequestReference],
        correlation_id: &str,
    ) -> Result<()>;

    async fn send_user_summary(&self, user_id: &str, events: &[NotificationEvent]) -> Result<()>;

    async fn send_investor_relations_summary(
        &self,
        company_id: &str,
        receivers: &[String],
        events: &[NotificationEvent],
    ) -> Result<()>;
}

/// A business rule that may not be decided yet. Callers must handle both arms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability<T> {
    Implemented(T),
    NotYetImplemented,
}

/// Rules about requests on companies that already have a data owner.
#[async_trait]
pub trait DataOwnerPolicy: Send + Sync {
    /// Whether a new request for `company_id` must be refused because the
    /// company has an owner who can supply the data directly.
    async fn rejects_request_for_owned_company(&self, company_id: &str) -> Capability<bool>;
}

/// Owner-based request rejection has not been decided.
#[derive(Debug, Clone, Copy, Default)]
pub struct UndecidedDataOwnerPolicy;

#[async_trait]
impl DataOwnerPolicy for UndecidedDataOwnerPolicy {
    async fn rejects_request_for_owned_company(&self, _company_id: &str) -> Capability<bool> {
        Capability::NotYetImplemented
    }
}

/// Company role assignments kept in the community manager's own database.
/// A user holds at most one role per company.
#[derive(Clone)]
pub struct SqliteCompanyRoles {
    pool: Pool,
    companies: Arc<dyn CompanyDirectory>,
}

impl SqliteCompanyRoles {
    pub fn new(pool: Pool, companies: Arc<dyn CompanyDirectory>) -> Self {
        Self { pool, companies }
    }

    /// Assign a role, replacing any other role the user held for the company.
    /// Unknown companies are `NotFound`; assigning an existing role is `InvalidInput`.
    #[instrument(skip_all, fields(company_id = %assignment.company_id))]
    pub async fn assign_company_role(&self, assignment: &CompanyRoleAssignment) -> RequestResult<()> {
        let company_name = self
            .companies
            .get_valid_company_name(&assignment.company_id)
            .await?;
        if !db::insert_company_role(&self.pool, assignment).await? {
            return Err(RequestError::invalid(format!(
                "user {} already holds role {} for company {}",
                assignment.user_id,
                assignment.company_role.as_str(),
                assignment.company_id
            )));
        }
        info!(
            role = assignment.company_role.as_str(),
            company_name = %company_name,
            "company role assigned"
        );
        Ok(())
    }

    pub async fn remove_company_role(&self, assignment: &CompanyRoleAssignment) -> RequestResult<()> {
        if !db::delete_company_role(&self.pool, assignment).await? {
            return Err(RequestError::not_found(format!(
                "role {} of user {} for company {}",
                assignment.company_role.as_str(),
                assignment.user_id,
                assignment.company_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CompanyRoles for SqliteCompanyRoles {
    async fn get_company_role_assignments_by_parameters(
        &self,
        role: Option<CompanyRole>,
        company_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<CompanyRoleAssignment>> {
        db::company_role_assignments(&self.pool, role, company_id, user_id).await
    }
}

/// Everything the request and notification services call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub companies: Arc<dyn CompanyDirectory>,
    pub roles: Arc<dyn CompanyRoles>,
    pub users: Arc<dyn UserDirectory>,
    pub datasets: Arc<dyn DatasetMetadata>,
    pub email: Arc<dyn EmailGateway>,
    pub data_owners: Arc<dyn DataOwnerPolicy>,
}

impl Collaborators {
    /// Ids of users holding `CompanyOwner` for `company_id`.
    pub async fn company_owner_ids(&self, company_id: &str) -> Result<Vec<String>> {
        Ok(self
            .roles
            .get_company_role_assignments_by_parameters(
                Some(CompanyRole::CompanyOwner),
                Some(company_id),
                None,
            )
            .await?
            .into_iter()
            .map(|a| a.user_id)
            .collect())
    }

    pub async fn is_company_owner(&self, company_id: &str, user_id: &str) -> Result<bool> {
        Ok(!self
            .roles
            .get_company_role_assignments_by_parameters(
                Some(CompanyRole::CompanyOwner),
                Some(company_id),
                Some(user_id),
            )
            .await?
            .is_empty())
    }
}

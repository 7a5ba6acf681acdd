#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use community_manager::db::{self, Pool};
use community_manager::error::{RequestError, RequestResult};
use community_manager::gateway::{
    Collaborators, CompanyDirectory, DatasetMetadata, EmailGateway, SqliteCompanyRoles,
    UndecidedDataOwnerPolicy, UserDirectory,
};
use community_manager::model::{
    DataMetaInfo, DataRequest, Framework, NotificationEvent, QaStatus,
    RequestPriority, RequestReference, RequestStatus, StatusHistoryEntry, UserInfo,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const PARENT: &str = "11111111-1111-4111-8111-111111111111";
pub const SUBSIDIARY: &str = "22222222-2222-4222-8222-222222222222";
pub const OTHER_COMPANY: &str = "33333333-3333-4333-8333-333333333333";

pub async fn setup_pool() -> Pool {
    // One connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

#[derive(Default)]
pub struct FakeCompanies {
    pub names: HashMap<String, String>,
    pub subsidiaries: HashMap<String, Vec<String>>,
    pub contacts: HashMap<String, Vec<String>>,
    /// LEI / ISIN / PermId to matching company ids.
    pub identifiers: HashMap<String, Vec<String>>,
}

impl FakeCompanies {
    pub fn with_defaults() -> Self {
        let mut companies = FakeCompanies::default();
        for (id, name) in [(PARENT, "Parent AG"), (SUBSIDIARY, "Subsidiary GmbH"), (OTHER_COMPANY, "Other SE")] {
            companies.names.insert(id.into(), name.into());
        }
        companies
            .subsidiaries
            .insert(PARENT.into(), vec![SUBSIDIARY.into()]);
        companies
    }
}

#[async_trait]
impl CompanyDirectory for FakeCompanies {
    async fn get_valid_company_name(&self, company_id: &str) -> RequestResult<String> {
        self.names
            .get(company_id)
            .cloned()
            .ok_or_else(|| RequestError::not_found(format!("company {}", company_id)))
    }

    async fn get_company_subsidiaries_by_parent_id(&self, company_id: &str) -> Result<Vec<String>> {
        Ok(self.subsidiaries.get(company_id).cloned().unwrap_or_default())
    }

    async fn get_company_contact_emails(&self, company_id: &str) -> Result<Vec<String>> {
        Ok(self.contacts.get(company_id).cloned().unwrap_or_default())
    }

    async fn find_companies_by_identifier(&self, identifier: &str) -> Result<Vec<String>> {
        Ok(self.identifiers.get(identifier).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeUsers {
    pub users: Vec<UserInfo>,
    pub roles: HashMap<String, Vec<String>>,
}

impl FakeUsers {
    pub fn with_user(mut self, user_id: &str, email: &str) -> Self {
        self.users.push(UserInfo {
            user_id: user_id.into(),
            email: Some(email.into()),
            first_name: None,
            last_name: None,
        });
        self
    }
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserInfo>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn search_users_by_email(&self, fragment: &str) -> Result<Vec<UserInfo>> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.email.as_deref().is_some_and(|e| e.contains(fragment)))
            .cloned()
            .collect())
    }

    async fn get_user_role_names(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self.roles.get(user_id).cloned().unwrap_or_default())
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserInfo>> {
        Ok(self.users.iter().find(|u| u.user_id == user_id).cloned())
    }
}

#[derive(Default)]
pub struct FakeDatasets {
    pub metas: HashMap<String, DataMetaInfo>,
    pub accepted_counts: HashMap<(String, Framework, String), usize>,
}

impl FakeDatasets {
    pub fn with_dataset(
        mut self,
        data_id: &str,
        company_id: &str,
        data_type: Framework,
        reporting_period: &str,
        accepted_versions: usize,
    ) -> Self {
        self.metas.insert(
            data_id.into(),
            DataMetaInfo {
                data_id: data_id.into(),
                company_id: company_id.into(),
                data_type,
                reporting_period: reporting_period.into(),
                qa_status: QaStatus::Accepted,
            },
        );
        self.accepted_counts.insert(
            (company_id.into(), data_type, reporting_period.into()),
            accepted_versions,
        );
        self
    }
}

#[async_trait]
impl DatasetMetadata for FakeDatasets {
    async fn get_data_meta_info(&self, data_id: &str) -> RequestResult<DataMetaInfo> {
        self.metas
            .get(data_id)
            .cloned()
            .ok_or_else(|| RequestError::not_found(format!("dataset {}", data_id)))
    }

    async fn count_accepted_datasets(
        &self,
        company_id: &str,
        data_type: Framework,
        reporting_period: &str,
    ) -> Result<usize> {
        Ok(self
            .accepted_counts
            .get(&(company_id.to_string(), data_type, reporting_period.to_string()))
            .copied()
            .unwrap_or(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailCall {
    Response { request_id: String, status: RequestStatus },
    AccessGranted { request_id: String },
    AccessRequested { request_id: String },
    DataUpdated { request_id: String },
    ToContacts { request_id: String, contacts: Vec<String> },
    Bulk { user_id: String, accepted: usize },
    UserSummary { user_id: String, events: usize },
    InvestorRelations { company_id: String, receivers: Vec<String>, events: usize },
}

#[derive(Clone, Default)]
pub struct RecordingEmail {
    pub calls: Arc<Mutex<Vec<EmailCall>>>,
    /// User, company or request ids whose summaries and responses fail to send.
    pub failing: Arc<Mutex<HashSet<String>>>,
    pub summary_delay: Option<Duration>,
}

impl RecordingEmail {
    pub async fn calls(&self) -> Vec<EmailCall> {
        self.calls.lock().await.clone()
    }

    pub async fn fail_for(&self, key: &str) {
        self.failing.lock().await.insert(key.to_string());
    }

    async fn record(&self, call: EmailCall) -> Result<()> {
        self.calls.lock().await.push(call);
        Ok(())
    }
}

#[async_trait]
impl EmailGateway for RecordingEmail {
    async fn send_data_request_response(&self, request: &DataRequest, _cid: &str) -> Result<()> {
        if self.failing.lock().await.contains(&request.id) {
            return Err(anyhow!("response to {} bounced", request.id));
        }
        self.record(EmailCall::Response {
            request_id: request.id.clone(),
            status: request.request_status,
        })
        .await
    }

    async fn send_access_granted(&self, request: &DataRequest, _cid: &str) -> Result<()> {
        self.record(EmailCall::AccessGranted {
            request_id: request.id.clone(),
        })
        .await
    }

    async fn send_access_requested_to_owners(&self, request: &DataRequest, _cid: &str) -> Result<()> {
        self.record(EmailCall::AccessRequested {
            request_id: request.id.clone(),
        })
        .await
    }

    async fn send_data_updated(&self, request: &DataRequest, _cid: &str) -> Result<()> {
        self.record(EmailCall::DataUpdated {
            request_id: request.id.clone(),
        })
        .await
    }

    async fn send_single_request_to_contacts(
        &self,
        request: &DataRequest,
        contacts: &[String],
        _message: Option<&str>,
        _cid: &str,
    ) -> Result<()> {
        self.record(EmailCall::ToContacts {
            request_id: request.id.clone(),
            contacts: contacts.to_vec(),
        })
        .await
    }

    async fn send_bulk_request_notification(
        &self,
        user_id: &str,
        accepted: &[RequestReference],
        _cid: &str,
    ) -> Result<()> {
        self.record(EmailCall::Bulk {
            user_id: user_id.into(),
            accepted: accepted.len(),
        })
        .await
    }

    async fn send_user_summary(&self, user_id: &str, events: &[NotificationEvent]) -> Result<()> {
        assert!(!events.is_empty(), "summary built from an empty event list");
        if let Some(delay) = self.summary_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().await.contains(user_id) {
            return Err(anyhow!("email service unavailable"));
        }
        self.record(EmailCall::UserSummary {
            user_id: user_id.into(),
            events: events.len(),
        })
        .await
    }

    async fn send_investor_relations_summary(
        &self,
        company_id: &str,
        receivers: &[String],
        events: &[NotificationEvent],
    ) -> Result<()> {
        assert!(!events.is_empty(), "summary built from an empty event list");
        if self.failing.lock().await.contains(company_id) {
            return Err(anyhow!("email service unavailable"));
        }
        self.record(EmailCall::InvestorRelations {
            company_id: company_id.into(),
            receivers: receivers.to_vec(),
            events: events.len(),
        })
        .await
    }
}

pub struct Harness {
    pub pool: Pool,
    pub collaborators: Collaborators,
    pub email: RecordingEmail,
    pub roles: SqliteCompanyRoles,
}

pub async fn harness(companies: FakeCompanies, users: FakeUsers, datasets: FakeDatasets) -> Harness {
    harness_with_email(companies, users, datasets, RecordingEmail::default()).await
}

pub async fn harness_with_email(
    companies: FakeCompanies,
    users: FakeUsers,
    datasets: FakeDatasets,
    email: RecordingEmail,
) -> Harness {
    let pool = setup_pool().await;
    let companies: Arc<dyn CompanyDirectory> = Arc::new(companies);
    let roles = SqliteCompanyRoles::new(pool.clone(), companies.clone());
    let collaborators = Collaborators {
        companies,
        roles: Arc::new(roles.clone()),
        users: Arc::new(users),
        datasets: Arc::new(datasets),
        email: Arc::new(email.clone()),
        data_owners: Arc::new(UndecidedDataOwnerPolicy),
    };
    Harness {
        pool,
        collaborators,
        email,
        roles,
    }
}

/// Store a request directly, bypassing creation rules.
pub async fn seed_request(
    pool: &Pool,
    id: &str,
    user_id: &str,
    company_id: &str,
    data_type: Framework,
    reporting_period: &str,
    status: RequestStatus,
) -> DataRequest {
    let created = db::now_millis() - 60_000;
    let access_status = data_type.initial_access_status();
    let request = DataRequest {
        id: id.into(),
        user_id: user_id.into(),
        company_id: company_id.into(),
        data_type,
        reporting_period: reporting_period.into(),
        creation_timestamp: created,
        last_modified: created,
        request_status: status,
        access_status,
        request_priority: RequestPriority::Low,
        admin_comment: None,
        notify_immediately: false,
        status_history: vec![StatusHistoryEntry {
            request_status: status,
            access_status,
            creation_timestamp: created,
            request_status_change_reason: None,
            answering_data_id: None,
        }],
        message_history: Vec::new(),
    };
    db::insert_data_request(pool, &request).await.unwrap();
    request
}

pub async fn load(pool: &Pool, id: &str) -> DataRequest {
    db::fetch_data_request(pool, id).await.unwrap().unwrap()
}

pub async fn event_count(pool: &Pool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM notification_events")
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Every stored event as (type, user, processed), oldest first.
pub async fn all_events(pool: &Pool) -> Vec<(String, Option<String>, bool)> {
    sqlx::query_as(
        "SELECT event_type, user_id, is_processed FROM notification_events ORDER BY creation_timestamp, id",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

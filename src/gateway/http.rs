//! HTTP implementations of the collaborator traits.
use super::{
    Collaborators, CompanyDirectory, DatasetMetadata, EmailGateway, SqliteCompanyRoles,
    UndecidedDataOwnerPolicy, UserDirectory,
};
use crate::config::Config;
use crate::db::Pool;
use crate::error::{RequestError, RequestResult};
use crate::model::{
    DataMetaInfo, DataRequest, Framework, NotificationEvent, QaStatus, RequestReference, UserInfo,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "community-manager/0.1";

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build HTTP client")
}

/// Production collaborators: backend, Keycloak and email service over HTTP,
/// company roles from the local database.
pub fn collaborators_from_config(cfg: &Config, pool: &Pool) -> Result<Collaborators> {
    let backend = Arc::new(BackendClient::from_config(cfg)?);
    Ok(Collaborators {
        companies: backend.clone(),
        roles: Arc::new(SqliteCompanyRoles::new(pool.clone(), backend.clone())),
        users: Arc::new(KeycloakClient::from_config(cfg)?),
        datasets: backend,
        email: Arc::new(EmailServiceClient::from_config(cfg)?),
        data_owners: Arc::new(UndecidedDataOwnerPolicy),
    })
}

/// Base URLs are joined with relative paths, so they must end with a slash.
fn parse_base_url(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).with_context(|| format!("invalid base URL {}", raw))
}

async fn read_json<T: DeserializeOwned>(res: reqwest::Response, what: &str) -> Result<T> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        warn!(%status, what, "upstream error");
        return Err(anyhow!("{} failed {}: {}", what, status, body));
    }
    res.json::<T>()
        .await
        .with_context(|| format!("invalid JSON in {} response", what))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyInformation {
    company_name: String,
    #[serde(default)]
    company_contact_details: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyIdAndName {
    company_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataMetaInformation {
    data_id: String,
    company_id: String,
    data_type: String,
    reporting_period: String,
    qa_status: QaStatus,
}

impl DataMetaInformation {
    fn into_meta_info(self) -> RequestResult<DataMetaInfo> {
        let data_type = Framework::parse_name(&self.data_type).ok_or_else(|| {
            RequestError::invalid(format!("dataset {} has unknown data type {}", self.data_id, self.data_type))
        })?;
        Ok(DataMetaInfo {
            data_id: self.data_id,
            company_id: self.company_id,
            data_type,
            reporting_period: self.reporting_period,
            qa_status: self.qa_status,
        })
    }
}

/// Client for the Dataland backend: company directory and dataset metadata.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.backend.base_url, cfg.backend.token.clone())
    }

    pub fn new(base_url: &str, token: String) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: parse_base_url(base_url)?,
            token,
        })
    }

    pub fn build_get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Request> {
        let url = self.base_url.join(path).context("invalid backend path")?;
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .build()
            .context("failed to build backend request")
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let request = self.build_get(path, query)?;
        debug!(url = %request.url(), "backend request");
        self.http
            .execute(request)
            .await
            .context("failed to reach backend")
    }

    async fn company_information(&self, company_id: &str) -> RequestResult<CompanyInformation> {
        let res = self.get(&format!("companies/{}/info", company_id), &[]).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(RequestError::not_found(format!("company {}", company_id)));
        }
        Ok(read_json(res, "company info").await?)
    }
}

#[async_trait]
impl CompanyDirectory for BackendClient {
    async fn get_valid_company_name(&self, company_id: &str) -> RequestResult<String> {
        Ok(self.company_information(company_id).await?.company_name)
    }

    async fn get_company_subsidiaries_by_parent_id(&self, company_id: &str) -> Result<Vec<String>> {
        let res = self
            .get(&format!("companies/{}/subsidiaries", company_id), &[])
            .await?;
        let companies: Vec<CompanyIdAndName> = read_json(res, "subsidiaries").await?;
        Ok(companies.into_iter().map(|c| c.company_id).collect())
    }

    async fn get_company_contact_emails(&self, company_id: &str) -> Result<Vec<String>> {
        match self.company_information(company_id).await {
            Ok(info) => Ok(info.company_contact_details.unwrap_or_default()),
            Err(RequestError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(anyhow!(err)),
        }
    }

    async fn find_companies_by_identifier(&self, identifier: &str) -> Result<Vec<String>> {
        let res = self
            .get("companies/names", &[("searchString", identifier)])
            .await?;
        let companies: Vec<CompanyIdAndName> = read_json(res, "company search").await?;
        Ok(companies.into_iter().map(|c| c.company_id).collect())
    }
}

#[async_trait]
impl DatasetMetadata for BackendClient {
    async fn get_data_meta_info(&self, data_id: &str) -> RequestResult<DataMetaInfo> {
        let res = self.get(&format!("metadata/{}", data_id), &[]).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(RequestError::not_found(format!("dataset {}", data_id)));
        }
        let meta: DataMetaInformation = read_json(res, "dataset metadata").await?;
        meta.into_meta_info()
    }

    async fn count_accepted_datasets(
        &self,
        company_id: &str,
        data_type: Framework,
        reporting_period: &str,
    ) -> Result<usize> {
        let res = self
            .get(
                "metadata",
                &[
                    ("companyId", company_id),
                    ("dataType", data_type.as_str()),
                    ("reportingPeriod", reporting_period),
                    ("showOnlyActive", "false"),
                ],
            )
            .await?;
        let metas: Vec<DataMetaInformation> = read_json(res, "dataset metadata search").await?;
        Ok(metas
            .iter()
            .filter(|m| m.qa_status == QaStatus::Accepted)
            .count())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<KeycloakUser> for UserInfo {
    fn from(u: KeycloakUser) -> Self {
        UserInfo {
            user_id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeycloakRole {
    name: String,
}

/// User directory backed by the Keycloak admin API.
#[derive(Clone)]
pub struct KeycloakClient {
    http: Client,
    base_url: Url,
    realm: String,
    token: String,
}

impl fmt::Debug for KeycloakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakClient")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl KeycloakClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: parse_base_url(&cfg.keycloak.base_url)?,
            realm: cfg.keycloak.realm.clone(),
            token: cfg.keycloak.token.clone(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let url = self
            .base_url
            .join(&format!("admin/realms/{}/{}", self.realm, path))
            .context("invalid keycloak path")?;
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .context("failed to reach keycloak")
    }

    async fn users(&self, query: &[(&str, &str)]) -> Result<Vec<UserInfo>> {
        let res = self.get("users", query).await?;
        let users: Vec<KeycloakUser> = read_json(res, "keycloak user search").await?;
        Ok(users.into_iter().map(UserInfo::from).collect())
    }
}

#[async_trait]
impl UserDirectory for KeycloakClient {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserInfo>> {
        Ok(self
            .users(&[("email", email), ("exact", "true")])
            .await?
            .into_iter()
            .next())
    }

    async fn search_users_by_email(&self, fragment: &str) -> Result<Vec<UserInfo>> {
        self.users(&[("email", fragment), ("max", "1000")]).await
    }

    async fn get_user_role_names(&self, user_id: &str) -> Result<Vec<String>> {
        let res = self
            .get(&format!("users/{}/role-mappings/realm", user_id), &[])
            .await?;
        let roles: Vec<KeycloakRole> = read_json(res, "keycloak roles").await?;
        Ok(roles.into_iter().map(|r| r.name).collect())
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserInfo>> {
        let res = self.get(&format!("users/{}", user_id), &[]).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let user: KeycloakUser = read_json(res, "keycloak user").await?;
        Ok(Some(user.into()))
    }
}

/// JSON body for one email, keyed by template name.
pub fn build_email_payload(template: &str, receivers: &[String], properties: Value) -> Value {
    json!({
        "template": template,
        "receivers": receivers,
        "properties": properties,
    })
}

fn request_properties(request: &DataRequest, correlation_id: &str) -> Value {
    json!({
        "dataRequestId": request.id,
        "companyId": request.company_id,
        "dataType": request.data_type.as_str(),
        "reportingPeriod": request.reporting_period,
        "requestStatus": request.request_status.as_str(),
        "accessStatus": request.access_status.as_str(),
        "correlationId": correlation_id,
    })
}

/// Client for the email service, which renders templates and delivers mail.
/// User receivers are passed as `user:<id>` and resolved by the service.
#[derive(Clone)]
pub struct EmailServiceClient {
    http: Client,
    base_url: Url,
    token: String,
    internal_recipients: Vec<String>,
}

impl fmt::Debug for EmailServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailServiceClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl EmailServiceClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: parse_base_url(&cfg.email.base_url)?,
            token: cfg.email.token.clone(),
            internal_recipients: cfg.email.internal_recipients.clone(),
        })
    }

    async fn post(&self, payload: Value) -> Result<()> {
        let url = self.base_url.join("emails").context("invalid email path")?;
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .context("failed to reach email service")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("email service error {}: {}", status, body));
        }
        info!(template = %payload["template"], "email dispatched");
        Ok(())
    }

    async fn send_to_requester(
        &self,
        template: &str,
        request: &DataRequest,
        correlation_id: &str,
    ) -> Result<()> {
        let receivers = vec![format!("user:{}", request.user_id)];
        self.post(build_email_payload(
            template,
            &receivers,
            request_properties(request, correlation_id),
        ))
        .await
    }
}

#[async_trait]
impl EmailGateway for EmailServiceClient {
    async fn send_data_request_response(&self, request: &DataRequest, correlation_id: &str) -> Result<()> {
        self.send_to_requester("DataRequestResponse", request, correlation_id)
            .await
    }

    async fn send_access_granted(&self, request: &DataRequest, correlation_id: &str) -> Result<()> {
        self.send_to_requester("AccessGranted", request, correlation_id)
            .await
    }

    async fn send_access_requested_to_owners(
        &self,
        request: &DataRequest,
        correlation_id: &str,
    ) -> Result<()> {
        let receivers = vec![format!("company-owners:{}", request.company_id)];
        self.post(build_email_payload(
            "AccessRequested",
            &receivers,
            request_properties(request, correlation_id),
        ))
        .await
    }

    async fn send_data_updated(&self, request: &DataRequest, correlation_id: &str) -> Result<()> {
        self.send_to_requester("DataUpdated", request, correlation_id)
            .await
    }

    async fn send_single_request_to_contacts(
        &self,
        request: &DataRequest,
        contacts: &[String],
        message: Option<&str>,
        correlation_id: &str,
    ) -> Result<()> {
        let mut properties = request_properties(request, correlation_id);
        properties["message"] = json!(message);
        self.post(build_email_payload("SingleDataRequest", contacts, properties))
            .await
    }

    async fn send_bulk_request_notification(
        &self,
        user_id: &str,
        accepted: &[RequestReference],
        correlation_id: &str,
    ) -> Result<()> {
        self.post(build_email_payload(
            "BulkDataRequest",
            &self.internal_recipients,
            json!({
                "userId": user_id,
                "acceptedRequests": accepted,
                "correlationId": correlation_id,
            }),
        ))
        .await
    }

    async fn send_user_summary(&self, user_id: &str, events: &[NotificationEvent]) -> Result<()> {
        let receivers = vec![format!("user:{}", user_id)];
        self.post(build_email_payload(
            "DataRequestSummary",
            &receivers,
            json!({ "events": events }),
        ))
        .await
    }

    async fn send_investor_relations_summary(
        &self,
        company_id: &str,
        receivers: &[String],
        events: &[NotificationEvent],
    ) -> Result<()> {
        self.post(build_email_payload(
            "InvestorRelations",
            receivers,
            json!({
                "companyId": company_id,
                "frameworks": crate::notifications::summary::reporting_periods_by_framework(events),
            }),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        assert_eq!(
            parse_base_url("http://localhost:8080/api").unwrap().as_str(),
            "http://localhost:8080/api/"
        );
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn backend_request_carries_token_and_query() {
        let client = BackendClient::new("http://localhost:8080/api", "secret".into()).unwrap();
        let req = client
            .build_get("companies/names", &[("searchString", "DE0005190003")])
            .unwrap();
        assert_eq!(
            req.url().as_str(),
            "http://localhost:8080/api/companies/names?searchString=DE0005190003"
        );
        assert_eq!(
            req.headers().get("authorization").unwrap().to_str().unwrap(),
            "Bearer secret"
        );
    }

    #[test]
    fn email_payload_shape() {
        let payload = build_email_payload(
            "DataRequestSummary",
            &["user:u1".to_string()],
            json!({ "events": [] }),
        );
        assert_eq!(payload["template"], "DataRequestSummary");
        assert_eq!(payload["receivers"][0], "user:u1");
        assert!(payload["properties"]["events"].as_array().unwrap().is_empty());
    }

    #[test]
    fn unknown_data_type_in_metadata_is_invalid() {
        let meta = DataMetaInformation {
            data_id: "d".into(),
            company_id: "c".into(),
            data_type: "sfdr-v2".into(),
            reporting_period: "2023".into(),
            qa_status: QaStatus::Accepted,
        };
        assert!(matches!(meta.into_meta_info(), Err(RequestError::InvalidInput(_))));
    }
}

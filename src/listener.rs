//! Inbound dataset events from the message queue.
//!
//! Every message is decoded into an [`InboundMessage`] before anything else
//! happens. A payload that cannot be decoded or fails validation is
//! `MessageRejected` and must be dead-lettered, never requeued.

use crate::db::Pool;
use crate::error::{RequestError, RequestResult};
use crate::gateway::Collaborators;
use crate::model::{Framework, NonSourceableInfo, QaStatus};
use crate::notifications;
use crate::requests;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
    correlation_id: String,
    payload: Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QaStatusChangeMessage {
    pub data_id: String,
    pub updated_qa_status: QaStatus,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateDataUploadMessage {
    pub data_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct NonSourceableMessage {
    company_id: String,
    data_type: String,
    reporting_period: String,
    is_non_sourceable: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    QaStatusUpdated(QaStatusChangeMessage),
    PrivateDataReceived(PrivateDataUploadMessage),
    DataNonSourceable(NonSourceableInfo),
}

pub const QA_STATUS_UPDATED: &str = "QA_STATUS_UPDATED";
pub const PRIVATE_DATA_RECEIVED: &str = "PRIVATE_DATA_RECEIVED";
pub const DATA_NONSOURCEABLE: &str = "DATA_NONSOURCEABLE";

fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> RequestResult<T> {
    serde_json::from_value(value)
        .map_err(|err| RequestError::rejected(format!("malformed {} payload: {}", kind, err)))
}

fn require_non_empty(field: &str, value: &str) -> RequestResult<()> {
    if value.trim().is_empty() {
        return Err(RequestError::rejected(format!("{} is empty", field)));
    }
    Ok(())
}

impl InboundMessage {
    /// Decode a raw envelope into its correlation id and typed message.
    pub fn decode(raw: &str) -> RequestResult<(String, InboundMessage)> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|err| RequestError::rejected(format!("malformed envelope: {}", err)))?;
        require_non_empty("correlationId", &envelope.correlation_id)?;

        let message = match envelope.message_type.as_str() {
            QA_STATUS_UPDATED => {
                let msg: QaStatusChangeMessage = payload(QA_STATUS_UPDATED, envelope.payload)?;
                require_non_empty("dataId", &msg.data_id)?;
                InboundMessage::QaStatusUpdated(msg)
            }
            PRIVATE_DATA_RECEIVED => {
                let msg: PrivateDataUploadMessage =
                    payload(PRIVATE_DATA_RECEIVED, envelope.payload)?;
                require_non_empty("dataId", &msg.data_id)?;
                InboundMessage::PrivateDataReceived(msg)
            }
            DATA_NONSOURCEABLE => {
                let msg: NonSourceableMessage = payload(DATA_NONSOURCEABLE, envelope.payload)?;
                require_non_empty("companyId", &msg.company_id)?;
                require_non_empty("dataType", &msg.data_type)?;
                require_non_empty("reportingPeriod", &msg.reporting_period)?;
                if !msg.is_non_sourceable {
                    return Err(RequestError::rejected(
                        "event did not set a dataset to non-sourceable",
                    ));
                }
                let data_type = Framework::parse_name(&msg.data_type).ok_or_else(|| {
                    RequestError::rejected(format!("unknown data type {}", msg.data_type))
                })?;
                InboundMessage::DataNonSourceable(NonSourceableInfo {
                    company_id: msg.company_id,
                    data_type,
                    reporting_period: msg.reporting_period,
                    is_non_sourceable: true,
                    reason: msg.reason,
                })
            }
            other => {
                return Err(RequestError::rejected(format!(
                    "unexpected message type {}",
                    other
                )))
            }
        };
        Ok((envelope.correlation_id, message))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// Valid message that needs no action, e.g. a dataset that was not accepted.
    Ignored,
    Answered { answered: usize, updated: usize },
    MarkedNonSourceable(usize),
}

#[derive(Clone)]
pub struct MessageListener {
    pool: Pool,
    collaborators: Collaborators,
}

impl MessageListener {
    pub fn new(pool: Pool, collaborators: Collaborators) -> Self {
        Self {
            pool,
            collaborators,
        }
    }

    pub async fn handle_raw(&self, raw: &str) -> RequestResult<ListenerOutcome> {
        let (correlation_id, message) = InboundMessage::decode(raw)?;
        self.handle(&correlation_id, message).await
    }

    #[instrument(skip_all, fields(correlation_id = %correlation_id))]
    pub async fn handle(
        &self,
        correlation_id: &str,
        message: InboundMessage,
    ) -> RequestResult<ListenerOutcome> {
        match message {
            InboundMessage::QaStatusUpdated(msg) => {
                if msg.updated_qa_status != QaStatus::Accepted {
                    info!(data_id = %msg.data_id, "dataset not accepted; request matching skipped");
                    return Ok(ListenerOutcome::Ignored);
                }
                let processed = requests::process_user_requests(
                    &self.pool,
                    &self.collaborators,
                    &msg.data_id,
                    correlation_id,
                )
                .await?;
                let meta = self
                    .collaborators
                    .datasets
                    .get_data_meta_info(&msg.data_id)
                    .await?;
                notifications::create_investor_relations_event(&self.pool, &meta).await?;
                Ok(ListenerOutcome::Answered {
                    answered: processed.answered.len(),
                    updated: processed.updated.len(),
                })
            }
            InboundMessage::PrivateDataReceived(msg) => {
                let processed = requests::process_user_requests(
                    &self.pool,
                    &self.collaborators,
                    &msg.data_id,
                    correlation_id,
                )
                .await?;
                Ok(ListenerOutcome::Answered {
                    answered: processed.answered.len(),
                    updated: processed.updated.len(),
                })
            }
            InboundMessage::DataNonSourceable(info) => {
                let patched = requests::patch_all_requests_to_status_non_sourceable(
                    &self.pool,
                    &self.collaborators,
                    &info,
                    correlation_id,
                )
                .await?;
                Ok(ListenerOutcome::MarkedNonSourceable(patched.len()))
            }
        }
    }
}

use super::model::DataRequestsFilter;
use crate::model::{
    AccessStatus, AggregatedDataRequest, CompanyRole, CompanyRoleAssignment, DataRequest,
    Framework, MessageHistoryEntry, NotificationEvent, NotificationEventType, RequestPriority,
    RequestStatus, StatusHistoryEntry,
};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    rebuilt.push('?');
    rebuilt.push_str(query_part.unwrap_or("mode=rwc"));
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Next modification time for a request last touched at `previous`.
/// Strictly greater than `previous` even when the wall clock is not.
pub fn next_timestamp(previous: i64) -> i64 {
    Utc::now().timestamp_millis().max(previous + 1)
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn request_from_row(row: &SqliteRow) -> Result<DataRequest> {
    let id: String = row.get("id");
    let data_type: String = row.get("data_type");
    let request_status: String = row.get("request_status");
    let access_status: String = row.get("access_status");
    let priority: String = row.get("request_priority");

    Ok(DataRequest {
        data_type: Framework::parse_name(&data_type)
            .ok_or_else(|| anyhow!("request {} has unknown data type {}", id, data_type))?,
        request_status: RequestStatus::parse_status(&request_status)
            .ok_or_else(|| anyhow!("request {} has unknown status {}", id, request_status))?,
        access_status: AccessStatus::parse_status(&access_status)
            .ok_or_else(|| anyhow!("request {} has unknown access status {}", id, access_status))?,
        request_priority: RequestPriority::parse_priority(&priority)
            .ok_or_else(|| anyhow!("request {} has unknown priority {}", id, priority))?,
        user_id: row.get("user_id"),
        company_id: row.get("company_id"),
        reporting_period: row.get("reporting_period"),
        creation_timestamp: row.get("creation_timestamp"),
        last_modified: row.get("last_modified"),
        admin_comment: row.get("admin_comment"),
        notify_immediately: row.get("notify_immediately"),
        status_history: Vec::new(),
        message_history: Vec::new(),
        id,
    })
}

/// Attach status and message history, both in timestamp order.
async fn load_history(pool: &Pool, request: &mut DataRequest) -> Result<()> {
    let rows = sqlx::query(
        "SELECT request_status, access_status, creation_timestamp, status_change_reason, answering_data_id \
         FROM request_status_history WHERE request_id = ? ORDER BY creation_timestamp ASC",
    )
    .bind(&request.id)
    .fetch_all(pool)
    .await?;
    request.status_history = rows
        .iter()
        .map(|row| {
            let rs: String = row.get("request_status");
            let acc: String = row.get("access_status");
            Ok(StatusHistoryEntry {
                request_status: RequestStatus::parse_status(&rs)
                    .ok_or_else(|| anyhow!("unknown status {} in history", rs))?,
                access_status: AccessStatus::parse_status(&acc)
                    .ok_or_else(|| anyhow!("unknown access status {} in history", acc))?,
                creation_timestamp: row.get("creation_timestamp"),
                request_status_change_reason: row.get("status_change_reason"),
                answering_data_id: row.get("answering_data_id"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let rows = sqlx::query(
        "SELECT contacts, message, creation_timestamp FROM message_history \
         WHERE request_id = ? ORDER BY creation_timestamp ASC, id ASC",
    )
    .bind(&request.id)
    .fetch_all(pool)
    .await?;
    request.message_history = rows
        .iter()
        .map(|row| {
            let contacts: String = row.get("contacts");
            Ok(MessageHistoryEntry {
                contacts: serde_json::from_str::<BTreeSet<String>>(&contacts)
                    .context("malformed contacts in message history")?,
                message: row.get("message"),
                creation_timestamp: row.get("creation_timestamp"),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(())
}

async fn hydrate(pool: &Pool, rows: Vec<SqliteRow>) -> Result<Vec<DataRequest>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut request = request_from_row(row)?;
        load_history(pool, &mut request).await?;
        out.push(request);
    }
    Ok(out)
}

/// Store a new request with its initial history entries.
#[instrument(skip_all, fields(request_id = %request.id))]
pub async fn insert_data_request(pool: &Pool, request: &DataRequest) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO data_requests (id, user_id, company_id, data_type, reporting_period, creation_timestamp, \
         last_modified, request_status, access_status, request_priority, admin_comment, notify_immediately) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id)
    .bind(&request.user_id)
    .bind(&request.company_id)
    .bind(request.data_type.as_str())
    .bind(&request.reporting_period)
    .bind(request.creation_timestamp)
    .bind(request.last_modified)
    .bind(request.request_status.as_str())
    .bind(request.access_status.as_str())
    .bind(request.request_priority.as_str())
    .bind(&request.admin_comment)
    .bind(request.notify_immediately)
    .execute(&mut *tx)
    .await
    .context("failed to insert data request")?;

    for entry in &request.status_history {
        insert_status_entry(&mut tx, &request.id, entry).await?;
    }
    for entry in &request.message_history {
        insert_message_entry(&mut tx, &request.id, entry).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_status_entry(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    request_id: &str,
    entry: &StatusHistoryEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO request_status_history (request_id, request_status, access_status, creation_timestamp, \
         status_change_reason, answering_data_id) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(request_id)
    .bind(entry.request_status.as_str())
    .bind(entry.access_status.as_str())
    .bind(entry.creation_timestamp)
    .bind(&entry.request_status_change_reason)
    .bind(&entry.answering_data_id)
    .execute(&mut **tx)
    .await
    .context("failed to append status history")?;
    Ok(())
}

async fn insert_message_entry(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    request_id: &str,
    entry: &MessageHistoryEntry,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO message_history (request_id, contacts, message, creation_timestamp) VALUES (?, ?, ?, ?)",
    )
    .bind(request_id)
    .bind(serde_json::to_string(&entry.contacts)?)
    .bind(&entry.message)
    .bind(entry.creation_timestamp)
    .execute(&mut **tx)
    .await
    .context("failed to append message history")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_data_request(pool: &Pool, id: &str) -> Result<Option<DataRequest>> {
    let row = sqlx::query("SELECT * FROM data_requests WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut request = request_from_row(&row)?;
    load_history(pool, &mut request).await?;
    Ok(Some(request))
}

/// All requests a user holds for one dataset triple. Duplicates are returned as-is.
#[instrument(skip_all)]
pub async fn find_by_natural_key(
    pool: &Pool,
    user_id: &str,
    company_id: &str,
    data_type: Framework,
    reporting_period: &str,
) -> Result<Vec<DataRequest>> {
    let rows = sqlx::query(
        "SELECT * FROM data_requests WHERE user_id = ? AND company_id = ? AND data_type = ? \
         AND reporting_period = ? ORDER BY creation_timestamp ASC",
    )
    .bind(user_id)
    .bind(company_id)
    .bind(data_type.as_str())
    .bind(reporting_period)
    .fetch_all(pool)
    .await?;
    hydrate(pool, rows).await
}

fn push_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: Vec<String>) {
    if values.is_empty() {
        qb.push(" AND 0");
        return;
    }
    qb.push(" AND ").push(column).push(" IN (");
    let mut sep = qb.separated(", ");
    for v in values {
        sep.push_bind(v);
    }
    sep.push_unseparated(")");
}

#[instrument(skip_all)]
pub async fn search_data_requests(
    pool: &Pool,
    filter: &DataRequestsFilter,
) -> Result<Vec<DataRequest>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM data_requests WHERE 1 = 1");
    if let Some(v) = &filter.data_types {
        push_in(&mut qb, "data_type", v.iter().map(|f| f.as_str().to_string()).collect());
    }
    if let Some(v) = &filter.company_ids {
        push_in(&mut qb, "company_id", v.clone());
    }
    if let Some(v) = &filter.reporting_periods {
        push_in(&mut qb, "reporting_period", v.clone());
    }
    if let Some(v) = &filter.request_statuses {
        push_in(&mut qb, "request_status", v.iter().map(|s| s.as_str().to_string()).collect());
    }
    if let Some(v) = &filter.access_statuses {
        push_in(&mut qb, "access_status", v.iter().map(|s| s.as_str().to_string()).collect());
    }
    if let Some(v) = &filter.request_priorities {
        push_in(&mut qb, "request_priority", v.iter().map(|p| p.as_str().to_string()).collect());
    }
    if let Some(v) = &filter.user_ids {
        push_in(&mut qb, "user_id", v.clone());
    }
    if let Some(fragment) = &filter.user_id {
        qb.push(" AND instr(user_id, ");
        qb.push_bind(fragment.clone());
        qb.push(") > 0");
    }
    qb.push(" ORDER BY creation_timestamp ASC, id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    debug!(count = rows.len(), "data request search");
    hydrate(pool, rows).await
}

/// Number of requests `user_id` created at or after `since_millis`.
#[instrument(skip_all)]
pub async fn count_requests_since(pool: &Pool, user_id: &str, since_millis: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM data_requests WHERE user_id = ? AND creation_timestamp >= ?",
    )
    .bind(user_id)
    .bind(since_millis)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Persist `updated` if the stored row still carries `expected_last_modified`,
/// appending the given history entries in the same transaction.
///
/// Returns `false` when another writer got there first; nothing is written then.
#[instrument(skip_all, fields(request_id = %updated.id))]
pub async fn save_data_request(
    pool: &Pool,
    updated: &DataRequest,
    expected_last_modified: i64,
    status_entry: Option<&StatusHistoryEntry>,
    message_entry: Option<&MessageHistoryEntry>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE data_requests SET request_status = ?, access_status = ?, request_priority = ?, \
         admin_comment = ?, notify_immediately = ?, last_modified = ? \
         WHERE id = ? AND last_modified = ?",
    )
    .bind(updated.request_status.as_str())
    .bind(updated.access_status.as_str())
    .bind(updated.request_priority.as_str())
    .bind(&updated.admin_comment)
    .bind(updated.notify_immediately)
    .bind(updated.last_modified)
    .bind(&updated.id)
    .bind(expected_last_modified)
    .execute(&mut *tx)
    .await
    .context("failed to update data request")?;

    if res.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }
    if let Some(entry) = status_entry {
        insert_status_entry(&mut tx, &updated.id, entry).await?;
    }
    if let Some(entry) = message_entry {
        insert_message_entry(&mut tx, &updated.id, entry).await?;
    }
    tx.commit().await?;
    Ok(true)
}

/// Open request counts per (framework, period, company, priority).
#[instrument(skip_all)]
pub async fn aggregated_open_requests(
    pool: &Pool,
    data_types: Option<&[Framework]>,
    reporting_period: Option<&str>,
) -> Result<Vec<AggregatedDataRequest>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT data_type, reporting_period, company_id, request_priority, COUNT(*) AS cnt \
         FROM data_requests WHERE request_status = 'Open'",
    );
    if let Some(types) = data_types {
        push_in(&mut qb, "data_type", types.iter().map(|f| f.as_str().to_string()).collect());
    }
    if let Some(period) = reporting_period {
        qb.push(" AND reporting_period = ");
        qb.push_bind(period.to_string());
    }
    qb.push(" GROUP BY data_type, reporting_period, company_id, request_priority");
    qb.push(" ORDER BY data_type, reporting_period, company_id");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            let data_type: String = row.get("data_type");
            let priority: String = row.get("request_priority");
            Ok(AggregatedDataRequest {
                data_type: Framework::parse_name(&data_type)
                    .ok_or_else(|| anyhow!("unknown data type {}", data_type))?,
                reporting_period: row.get("reporting_period"),
                company_id: row.get("company_id"),
                priority: RequestPriority::parse_priority(&priority)
                    .ok_or_else(|| anyhow!("unknown priority {}", priority))?,
                count: row.get("cnt"),
            })
        })
        .collect()
}

#[instrument(skip_all, fields(event_id = %event.id))]
pub async fn insert_notification_event(pool: &Pool, event: &NotificationEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO notification_events (id, event_type, user_id, company_id, framework, reporting_period, \
         is_processed, creation_timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.id)
    .bind(event.event_type.as_str())
    .bind(&event.user_id)
    .bind(&event.company_id)
    .bind(event.framework.as_str())
    .bind(&event.reporting_period)
    .bind(event.is_processed)
    .bind(event.creation_timestamp)
    .execute(pool)
    .await
    .context("failed to insert notification event")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn unprocessed_notification_events(pool: &Pool) -> Result<Vec<NotificationEvent>> {
    let rows = sqlx::query(
        "SELECT * FROM notification_events WHERE is_processed = 0 ORDER BY creation_timestamp ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let event_type: String = row.get("event_type");
            let framework: String = row.get("framework");
            Ok(NotificationEvent {
                event_type: NotificationEventType::parse_type(&event_type)
                    .ok_or_else(|| anyhow!("event {} has unknown type {}", id, event_type))?,
                framework: Framework::parse_name(&framework)
                    .ok_or_else(|| anyhow!("event {} has unknown framework {}", id, framework))?,
                user_id: row.get("user_id"),
                company_id: row.get("company_id"),
                reporting_period: row.get("reporting_period"),
                is_processed: row.get("is_processed"),
                creation_timestamp: row.get("creation_timestamp"),
                id,
            })
        })
        .collect()
}

#[instrument(skip_all, fields(count = ids.len()))]
pub async fn mark_events_processed(pool: &Pool, ids: &[String]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE notification_events SET is_processed = 1 WHERE 1 = 1");
    push_in(&mut qb, "id", ids.to_vec());
    let res = qb
        .build()
        .execute(pool)
        .await
        .context("failed to mark notification events processed")?;
    Ok(res.rows_affected())
}

/// Store `assignment` as the user's only role for the company, dropping any
/// other role they held there. Returns `false` (and changes nothing) if the
/// exact assignment already exists.
#[instrument(skip_all)]
pub async fn insert_company_role(pool: &Pool, assignment: &CompanyRoleAssignment) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM company_role_assignments WHERE company_role = ? AND company_id = ? AND user_id = ?",
    )
    .bind(assignment.company_role.as_str())
    .bind(&assignment.company_id)
    .bind(&assignment.user_id)
    .fetch_one(&mut *tx)
    .await?;
    if existing > 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let replaced = sqlx::query("DELETE FROM company_role_assignments WHERE company_id = ? AND user_id = ?")
        .bind(&assignment.company_id)
        .bind(&assignment.user_id)
        .execute(&mut *tx)
        .await
        .context("failed to drop previous company roles")?;
    sqlx::query("INSERT INTO company_role_assignments (company_role, company_id, user_id) VALUES (?, ?, ?)")
        .bind(assignment.company_role.as_str())
        .bind(&assignment.company_id)
        .bind(&assignment.user_id)
        .execute(&mut *tx)
        .await
        .context("failed to insert company role")?;
    tx.commit().await?;
    debug!(replaced = replaced.rows_affected(), "company role stored");
    Ok(true)
}

#[instrument(skip_all)]
pub async fn delete_company_role(pool: &Pool, assignment: &CompanyRoleAssignment) -> Result<bool> {
    let res = sqlx::query(
        "DELETE FROM company_role_assignments WHERE company_role = ? AND company_id = ? AND user_id = ?",
    )
    .bind(assignment.company_role.as_str())
    .bind(&assignment.company_id)
    .bind(&assignment.user_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn company_role_assignments(
    pool: &Pool,
    role: Option<CompanyRole>,
    company_id: Option<&str>,
    user_id: Option<&str>,
) -> Result<Vec<CompanyRoleAssignment>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT company_role, company_id, user_id FROM company_role_assignments WHERE 1 = 1",
    );
    if let Some(role) = role {
        qb.push(" AND company_role = ");
        qb.push_bind(role.as_str().to_string());
    }
    if let Some(company_id) = company_id {
        qb.push(" AND company_id = ");
        qb.push_bind(company_id.to_string());
    }
    if let Some(user_id) = user_id {
        qb.push(" AND user_id = ");
        qb.push_bind(user_id.to_string());
    }
    qb.push(" ORDER BY company_id, user_id");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            let role: String = row.get("company_role");
            Ok(CompanyRoleAssignment {
                company_role: CompanyRole::parse_role(&role)
                    .ok_or_else(|| anyhow!("unknown company role {}", role))?,
                company_id: row.get("company_id"),
                user_id: row.get("user_id"),
            })
        })
        .collect()
}

/// Claim the lease `name` for `holder` until `now + ttl_millis`.
///
/// Succeeds when nobody holds the lease, the previous holder's lease has
/// expired, or `holder` already holds it. Shared by every process using the
/// same database.
#[instrument(skip_all, fields(lease = %name))]
pub async fn try_acquire_lease(pool: &Pool, name: &str, holder: &str, ttl_millis: i64) -> Result<bool> {
    let now = now_millis();
    let res = sqlx::query(
        "INSERT INTO job_leases (name, holder, locked_until) VALUES (?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, locked_until = excluded.locked_until \
         WHERE job_leases.locked_until < ? OR job_leases.holder = excluded.holder",
    )
    .bind(name)
    .bind(holder)
    .bind(now + ttl_millis)
    .bind(now)
    .execute(pool)
    .await
    .context("failed to acquire lease")?;
    let acquired = res.rows_affected() == 1;
    debug!(acquired, "lease attempt");
    Ok(acquired)
}

/// Give up the lease if `holder` still owns it.
#[instrument(skip_all, fields(lease = %name))]
pub async fn release_lease(pool: &Pool, name: &str, holder: &str) -> Result<()> {
    sqlx::query("DELETE FROM job_leases WHERE name = ? AND holder = ?")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await
        .context("failed to release lease")?;
    Ok(())
}

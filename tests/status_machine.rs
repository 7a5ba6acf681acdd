mod common;

use common::*;
use community_manager::db;
use community_manager::error::RequestError;
use community_manager::model::{
    AccessStatus, AuthContext, CompanyRole, CompanyRoleAssignment, DataRequestPatch, Framework,
    NonSourceableInfo, NotificationEventType, RequestPriority, RequestStatus,
};
use community_manager::notifications::NotificationScheduler;
use community_manager::requests::{
    patch_all_requests_to_status_non_sourceable, patch_data_request, process_user_requests,
    SUBSIDIARY_ANSWER_REASON,
};

const CID: &str = "test-correlation";

fn alice() -> AuthContext {
    AuthContext::user("alice", &[])
}

async fn default_harness() -> Harness {
    harness(
        FakeCompanies::with_defaults(),
        FakeUsers::default(),
        FakeDatasets::default().with_dataset("data-1", PARENT, Framework::Sfdr, "2023", 1),
    )
    .await
}

#[tokio::test]
async fn admin_comment_alone_keeps_last_modified() {
    let h = default_harness().await;
    let seeded = seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    let commented = patch_data_request(
        &h.pool,
        &h.collaborators,
        &AuthContext::System,
        "r1",
        &DataRequestPatch {
            admin_comment: Some("checked with the company".into()),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();
    assert_eq!(commented.last_modified, seeded.last_modified);
    assert_eq!(commented.admin_comment.as_deref(), Some("checked with the company"));
    let stored = load(&h.pool, "r1").await;
    assert_eq!(stored.last_modified, seeded.last_modified);
    assert_eq!(stored.status_history.len(), 1);

    let prioritised = patch_data_request(
        &h.pool,
        &h.collaborators,
        &AuthContext::System,
        "r1",
        &DataRequestPatch {
            request_priority: Some(RequestPriority::High),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();
    assert!(prioritised.last_modified > seeded.last_modified);
    assert_eq!(load(&h.pool, "r1").await.status_history.len(), 1);

    let closed = patch_data_request(
        &h.pool,
        &h.collaborators,
        &AuthContext::System,
        "r1",
        &DataRequestPatch {
            request_status: Some(RequestStatus::Closed),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();
    assert!(closed.last_modified > prioritised.last_modified);
    let stored = load(&h.pool, "r1").await;
    assert_eq!(stored.status_history.len(), 2);
    assert_eq!(stored.request_status, RequestStatus::Closed);
    assert_eq!(stored.admin_comment.as_deref(), Some("checked with the company"));
}

#[tokio::test]
async fn unchanged_patch_is_a_no_op() {
    let h = default_harness().await;
    let seeded = seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    let same = patch_data_request(
        &h.pool,
        &h.collaborators,
        &alice(),
        "r1",
        &DataRequestPatch {
            request_status: Some(RequestStatus::Open),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();
    assert_eq!(same.last_modified, seeded.last_modified);
    assert_eq!(load(&h.pool, "r1").await.status_history.len(), 1);
    assert!(h.email.calls().await.is_empty());
}

#[tokio::test]
async fn missing_request_is_not_found() {
    let h = default_harness().await;
    let err = patch_data_request(
        &h.pool,
        &h.collaborators,
        &AuthContext::System,
        "missing",
        &DataRequestPatch::default(),
        CID,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RequestError::NotFound(_)));
}

#[tokio::test]
async fn non_sourceable_declaration_must_be_true() {
    let h = default_harness().await;
    seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    let info = NonSourceableInfo {
        company_id: PARENT.into(),
        data_type: Framework::Sfdr,
        reporting_period: "2023".into(),
        is_non_sourceable: false,
        reason: "published after all".into(),
    };
    let err = patch_all_requests_to_status_non_sourceable(&h.pool, &h.collaborators, &info, CID)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::InvalidInput(_)));

    let stored = load(&h.pool, "r1").await;
    assert_eq!(stored.request_status, RequestStatus::Open);
    assert_eq!(stored.status_history.len(), 1);
    assert_eq!(event_count(&h.pool).await, 0);
}

#[tokio::test]
async fn non_sourceable_marks_waiting_requests() {
    let h = default_harness().await;
    seed_request(&h.pool, "open", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "again", "bob", PARENT, Framework::Sfdr, "2023", RequestStatus::NonSourceable).await;
    seed_request(&h.pool, "done", "carol", PARENT, Framework::Sfdr, "2023", RequestStatus::Answered).await;
    seed_request(&h.pool, "other-year", "alice", PARENT, Framework::Sfdr, "2022", RequestStatus::Open).await;

    let info = NonSourceableInfo {
        company_id: PARENT.into(),
        data_type: Framework::Sfdr,
        reporting_period: "2023".into(),
        is_non_sourceable: true,
        reason: "no sustainability report".into(),
    };
    let patched = patch_all_requests_to_status_non_sourceable(&h.pool, &h.collaborators, &info, CID)
        .await
        .unwrap();
    let mut ids: Vec<_> = patched.iter().map(|r| r.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["again", "open"]);

    let open = load(&h.pool, "open").await;
    assert_eq!(open.request_status, RequestStatus::NonSourceable);
    assert_eq!(
        open.status_history.last().unwrap().request_status_change_reason.as_deref(),
        Some("no sustainability report")
    );
    // Re-marking appends history but raises no second event.
    assert_eq!(load(&h.pool, "again").await.status_history.len(), 2);
    let events = db::unprocessed_notification_events(&h.pool).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, NotificationEventType::NonSourceableEvent);
    assert_eq!(events[0].user_id.as_deref(), Some("alice"));

    assert_eq!(load(&h.pool, "done").await.request_status, RequestStatus::Answered);
    assert_eq!(load(&h.pool, "other-year").await.request_status, RequestStatus::Open);
    // Nobody opted into immediate notification.
    assert!(h.email.calls().await.is_empty());
}

#[tokio::test]
async fn accepted_dataset_answers_every_waiting_request() {
    let h = default_harness().await;
    seed_request(&h.pool, "ra", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "rb", "bob", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "lksg", "bob", PARENT, Framework::Lksg, "2023", RequestStatus::Open).await;

    let processed = process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap();
    assert_eq!(processed.answered.len(), 2);
    assert!(processed.updated.is_empty());

    for id in ["ra", "rb"] {
        let stored = load(&h.pool, id).await;
        assert_eq!(stored.request_status, RequestStatus::Answered);
        assert_eq!(stored.status_history.len(), 2);
        let latest = stored.status_history.last().unwrap();
        assert_eq!(latest.answering_data_id.as_deref(), Some("data-1"));
        assert_eq!(latest.request_status_change_reason, None);
        assert!(!stored.notify_immediately);
    }
    assert_eq!(load(&h.pool, "lksg").await.request_status, RequestStatus::Open);

    let calls = h.email.calls().await;
    let responses: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, EmailCall::Response { status: RequestStatus::Answered, .. }))
        .collect();
    assert_eq!(responses.len(), 2);

    // The response email already told both users, so the events are settled.
    let events = all_events(&h.pool).await;
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|(kind, _, processed)| kind == NotificationEventType::AvailableEvent.as_str() && *processed));
    assert!(db::unprocessed_notification_events(&h.pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn answered_requester_is_not_notified_again_by_summary() {
    let h = default_harness().await;
    seed_request(&h.pool, "ra", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap();
    let scheduler = NotificationScheduler::new(h.pool.clone(), h.collaborators.clone());
    let outcome = scheduler.run_once().await.unwrap().unwrap();
    assert_eq!(outcome.user_summaries_sent, 0);

    assert_eq!(
        h.email.calls().await,
        vec![EmailCall::Response {
            request_id: "ra".into(),
            status: RequestStatus::Answered,
        }]
    );
}

#[tokio::test]
async fn failed_response_email_leaves_event_for_summary() {
    let h = default_harness().await;
    seed_request(&h.pool, "ra", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    h.email.fail_for("ra").await;

    process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap();
    assert_eq!(load(&h.pool, "ra").await.request_status, RequestStatus::Answered);

    let scheduler = NotificationScheduler::new(h.pool.clone(), h.collaborators.clone());
    let outcome = scheduler.run_once().await.unwrap().unwrap();
    assert_eq!(outcome.user_summaries_sent, 1);
    assert_eq!(
        h.email.calls().await,
        vec![EmailCall::UserSummary {
            user_id: "alice".into(),
            events: 1,
        }]
    );
}

#[tokio::test]
async fn newer_version_reports_update_instead_of_availability() {
    let h = harness(
        FakeCompanies::with_defaults(),
        FakeUsers::default(),
        FakeDatasets::default().with_dataset("data-2", PARENT, Framework::Sfdr, "2023", 2),
    )
    .await;
    seed_request(&h.pool, "ra", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    process_user_requests(&h.pool, &h.collaborators, "data-2", CID)
        .await
        .unwrap();
    let events = all_events(&h.pool).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, NotificationEventType::UpdatedEvent.as_str());
}

#[tokio::test]
async fn parent_upload_answers_subsidiary_requests() {
    let h = default_harness().await;
    seed_request(&h.pool, "parent", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "sub", "bob", SUBSIDIARY, Framework::Sfdr, "2023", RequestStatus::NonSourceable).await;
    seed_request(&h.pool, "unrelated", "bob", OTHER_COMPANY, Framework::Sfdr, "2023", RequestStatus::Open).await;

    let processed = process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap();
    let ids: Vec<_> = processed.answered.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["parent", "sub"]);

    let sub = load(&h.pool, "sub").await;
    assert_eq!(sub.request_status, RequestStatus::Answered);
    let latest = sub.status_history.last().unwrap();
    assert_eq!(latest.request_status_change_reason.as_deref(), Some(SUBSIDIARY_ANSWER_REASON));
    assert_eq!(latest.answering_data_id.as_deref(), Some("data-1"));
    assert_eq!(load(&h.pool, "parent").await.status_history.last().unwrap().request_status_change_reason, None);
    assert_eq!(load(&h.pool, "unrelated").await.request_status, RequestStatus::Open);
}

#[tokio::test]
async fn already_answered_requests_hear_about_new_versions() {
    let h = default_harness().await;
    seed_request(&h.pool, "eager", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Answered).await;
    seed_request(&h.pool, "patient", "bob", PARENT, Framework::Sfdr, "2023", RequestStatus::Resolved).await;
    patch_data_request(
        &h.pool,
        &h.collaborators,
        &alice(),
        "eager",
        &DataRequestPatch {
            notify_immediately: Some(true),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();

    let processed = process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap();
    assert!(processed.answered.is_empty());
    assert_eq!(processed.updated.len(), 2);

    let calls = h.email.calls().await;
    assert_eq!(
        calls,
        vec![EmailCall::DataUpdated {
            request_id: "eager".into()
        }]
    );

    // Only bob still needs to hear about it in the next summary.
    let pending = db::unprocessed_notification_events(&h.pool).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].user_id.as_deref(), Some("bob"));
    assert_eq!(pending[0].event_type, NotificationEventType::UpdatedEvent);
    assert_eq!(event_count(&h.pool).await, 2);
}

#[tokio::test]
async fn stale_write_is_refused() {
    let h = default_harness().await;
    let seeded = seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    let mut first = seeded.clone();
    first.request_priority = RequestPriority::High;
    first.last_modified = db::next_timestamp(seeded.last_modified);
    assert!(db::save_data_request(&h.pool, &first, seeded.last_modified, None, None)
        .await
        .unwrap());

    let mut second = seeded.clone();
    second.request_priority = RequestPriority::Urgent;
    second.last_modified = db::next_timestamp(seeded.last_modified);
    assert!(!db::save_data_request(&h.pool, &second, seeded.last_modified, None, None)
        .await
        .unwrap());

    assert_eq!(load(&h.pool, "r1").await.request_priority, RequestPriority::High);
}

#[tokio::test]
async fn message_on_pending_private_answer_asks_owners() {
    let h = default_harness().await;
    let seeded = seed_request(&h.pool, "vsme", "alice", PARENT, Framework::Vsme, "2024", RequestStatus::Answered).await;
    assert_eq!(seeded.access_status, AccessStatus::Pending);

    patch_data_request(
        &h.pool,
        &h.collaborators,
        &AuthContext::System,
        "vsme",
        &DataRequestPatch {
            contacts: Some(["ir@parent.example".to_string()].into()),
            message: Some("Could you share your VSME report?".into()),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();

    assert_eq!(
        h.email.calls().await,
        vec![
            EmailCall::ToContacts {
                request_id: "vsme".into(),
                contacts: vec!["ir@parent.example".into()],
            },
            EmailCall::AccessRequested {
                request_id: "vsme".into()
            },
            EmailCall::Response {
                request_id: "vsme".into(),
                status: RequestStatus::Answered,
            },
        ]
    );
    let stored = load(&h.pool, "vsme").await;
    assert_eq!(stored.message_history.len(), 1);
    assert_eq!(stored.status_history.len(), 1);
}

#[tokio::test]
async fn message_without_contacts_is_invalid() {
    let h = default_harness().await;
    seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    let err = patch_data_request(
        &h.pool,
        &h.collaborators,
        &alice(),
        "r1",
        &DataRequestPatch {
            contacts: Some(["  ".to_string()].into()),
            message: Some("hello".into()),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RequestError::InvalidInput(_)));
    assert!(load(&h.pool, "r1").await.message_history.is_empty());
}

#[tokio::test]
async fn withdrawn_requests_trigger_nothing() {
    let h = default_harness().await;
    seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    let withdrawn = patch_data_request(
        &h.pool,
        &h.collaborators,
        &alice(),
        "r1",
        &DataRequestPatch {
            request_status: Some(RequestStatus::Withdrawn),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();
    assert_eq!(withdrawn.request_status, RequestStatus::Withdrawn);

    patch_data_request(
        &h.pool,
        &h.collaborators,
        &AuthContext::System,
        "r1",
        &DataRequestPatch {
            request_status: Some(RequestStatus::Answered),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();

    assert!(h.email.calls().await.is_empty());
    assert_eq!(event_count(&h.pool).await, 0);
    assert_eq!(load(&h.pool, "r1").await.status_history.len(), 3);
}

#[tokio::test]
async fn owner_grants_access_to_private_data() {
    let h = default_harness().await;
    seed_request(&h.pool, "vsme", "alice", PARENT, Framework::Vsme, "2024", RequestStatus::Answered).await;
    h.roles
        .assign_company_role(&CompanyRoleAssignment {
            company_role: CompanyRole::CompanyOwner,
            company_id: PARENT.into(),
            user_id: "olga".into(),
        })
        .await
        .unwrap();

    let granted = patch_data_request(
        &h.pool,
        &h.collaborators,
        &AuthContext::user("olga", &[]),
        "vsme",
        &DataRequestPatch {
            access_status: Some(AccessStatus::Granted),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();
    assert_eq!(granted.access_status, AccessStatus::Granted);
    assert_eq!(granted.request_status, RequestStatus::Answered);
    assert_eq!(
        h.email.calls().await,
        vec![EmailCall::AccessGranted {
            request_id: "vsme".into()
        }]
    );
    let stored = load(&h.pool, "vsme").await;
    assert_eq!(stored.status_history.len(), 2);
    assert_eq!(stored.current_status(), (RequestStatus::Answered, AccessStatus::Granted));
}

#[tokio::test]
async fn users_are_limited_to_their_own_transitions() {
    let h = default_harness().await;
    seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    let denied_patches = [
        (
            AuthContext::user("bob", &[]),
            DataRequestPatch {
                request_status: Some(RequestStatus::Withdrawn),
                ..Default::default()
            },
        ),
        (
            alice(),
            DataRequestPatch {
                request_priority: Some(RequestPriority::Urgent),
                ..Default::default()
            },
        ),
        (
            alice(),
            DataRequestPatch {
                admin_comment: Some("please hurry".into()),
                ..Default::default()
            },
        ),
        (
            alice(),
            DataRequestPatch {
                request_status: Some(RequestStatus::Answered),
                ..Default::default()
            },
        ),
        (
            alice(),
            DataRequestPatch {
                access_status: Some(AccessStatus::Granted),
                ..Default::default()
            },
        ),
        (
            AuthContext::user("bob", &[]),
            DataRequestPatch {
                notify_immediately: Some(true),
                ..Default::default()
            },
        ),
    ];
    for (ctx, patch) in denied_patches {
        let err = patch_data_request(&h.pool, &h.collaborators, &ctx, "r1", &patch, CID)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::AccessDenied(_)), "{:?}", patch);
    }

    let admin = AuthContext::user("admin", &["ROLE_ADMIN"]);
    patch_data_request(
        &h.pool,
        &h.collaborators,
        &admin,
        "r1",
        &DataRequestPatch {
            request_priority: Some(RequestPriority::Urgent),
            ..Default::default()
        },
        CID,
    )
    .await
    .unwrap();
    assert_eq!(load(&h.pool, "r1").await.request_priority, RequestPriority::Urgent);
}

#[tokio::test]
async fn current_status_follows_newest_history_entry() {
    let h = default_harness().await;
    seed_request(&h.pool, "r1", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;

    process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap();
    for status in [RequestStatus::Open, RequestStatus::Withdrawn] {
        patch_data_request(
            &h.pool,
            &h.collaborators,
            &alice(),
            "r1",
            &DataRequestPatch {
                request_status: Some(status),
                message: (status == RequestStatus::Open).then(|| "data is incomplete".to_string()),
                contacts: (status == RequestStatus::Open).then(|| ["ir@parent.example".to_string()].into()),
                ..Default::default()
            },
            CID,
        )
        .await
        .unwrap();
    }

    let stored = load(&h.pool, "r1").await;
    let timestamps: Vec<i64> = stored.status_history.iter().map(|e| e.creation_timestamp).collect();
    assert_eq!(timestamps.len(), 4);
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        stored.current_status(),
        (stored.request_status, stored.access_status)
    );
    assert_eq!(stored.request_status, RequestStatus::Withdrawn);
    assert_eq!(stored.message_history.len(), 1);
}

async fn hold_request(h: &Harness, id: &str) {
    // Silently skips every update of the row, as if another writer won each race.
    sqlx::query(&format!(
        "CREATE TRIGGER hold_{id} BEFORE UPDATE ON data_requests WHEN OLD.id = '{id}' \
         BEGIN SELECT RAISE(IGNORE); END"
    ))
    .execute(&h.pool)
    .await
    .unwrap();
}

async fn release_request(h: &Harness, id: &str) {
    sqlx::query(&format!("DROP TRIGGER hold_{id}"))
        .execute(&h.pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn one_conflicting_request_does_not_stop_the_others() {
    let h = default_harness().await;
    seed_request(&h.pool, "ra", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "rb", "bob", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "rc", "carol", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "sub", "dave", SUBSIDIARY, Framework::Sfdr, "2023", RequestStatus::Open).await;
    hold_request(&h, "rb").await;

    let err = process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Conflict(ref ids) if ids == "rb"), "{:?}", err);

    for id in ["ra", "rc", "sub"] {
        let stored = load(&h.pool, id).await;
        assert_eq!(stored.request_status, RequestStatus::Answered, "{}", id);
        assert_eq!(stored.status_history.len(), 2, "{}", id);
    }
    let held = load(&h.pool, "rb").await;
    assert_eq!(held.request_status, RequestStatus::Open);
    assert_eq!(held.status_history.len(), 1);

    // Replaying the message answers what was left and nothing twice.
    release_request(&h, "rb").await;
    let processed = process_user_requests(&h.pool, &h.collaborators, "data-1", CID)
        .await
        .unwrap();
    let ids: Vec<_> = processed.answered.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["rb"]);
    assert_eq!(load(&h.pool, "ra").await.status_history.len(), 2);
}

#[tokio::test]
async fn non_sourceable_marking_continues_past_a_conflict() {
    let h = default_harness().await;
    seed_request(&h.pool, "ra", "alice", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    seed_request(&h.pool, "rb", "bob", PARENT, Framework::Sfdr, "2023", RequestStatus::Open).await;
    hold_request(&h, "ra").await;

    let info = NonSourceableInfo {
        company_id: PARENT.into(),
        data_type: Framework::Sfdr,
        reporting_period: "2023".into(),
        is_non_sourceable: true,
        reason: "no report published".into(),
    };
    let err = patch_all_requests_to_status_non_sourceable(&h.pool, &h.collaborators, &info, CID)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Conflict(_)));
    assert_eq!(load(&h.pool, "ra").await.request_status, RequestStatus::Open);
    assert_eq!(load(&h.pool, "rb").await.request_status, RequestStatus::NonSourceable);
}

#[tokio::test]
async fn private_holders_hear_about_updates_unless_revoked() {
    let h = harness(
        FakeCompanies::with_defaults(),
        FakeUsers::default(),
        FakeDatasets::default().with_dataset("private-2", PARENT, Framework::Vsme, "2024", 2),
    )
    .await;
    seed_request(&h.pool, "granted", "alice", PARENT, Framework::Vsme, "2024", RequestStatus::Answered).await;
    seed_request(&h.pool, "revoked", "bob", PARENT, Framework::Vsme, "2024", RequestStatus::Resolved).await;
    sqlx::query("UPDATE data_requests SET access_status = 'Granted' WHERE id = 'granted'")
        .execute(&h.pool)
        .await
        .unwrap();
    sqlx::query("UPDATE data_requests SET access_status = 'Revoked' WHERE id = 'revoked'")
        .execute(&h.pool)
        .await
        .unwrap();

    let processed = process_user_requests(&h.pool, &h.collaborators, "private-2", CID)
        .await
        .unwrap();
    assert_eq!(processed.updated.len(), 2);
    assert_eq!(
        h.email.calls().await,
        vec![EmailCall::DataUpdated {
            request_id: "granted".into()
        }]
    );
    // Private datasets stay out of summaries.
    assert_eq!(event_count(&h.pool).await, 0);
}

use std::sync::Arc;

use serde_json::json;

use signoff_core::approvals::handlers::{
    DocumentHandlerRegistry, HandlerCall, InMemoryDocumentHandler,
};
use signoff_core::approvals::ports::InstanceFilter;
use signoff_core::approvals::{
    ApprovalService, CancelRequest, DecisionRequest, SubmitRequest, VisibilityBasis,
};
use signoff_core::audit::{AuditOutcome, InMemoryAuditSink};
use signoff_core::domain::approval::{ApprovalStatus, DecisionAction, RecordAction, Resolution};
use signoff_core::domain::document::{BizType, DocumentRef};
use signoff_core::domain::user::UserContext;
use signoff_core::errors::ApprovalError;
use signoff_core::flows::RawFlowDefinition;
use signoff_db::{
    connect_with_settings, migrations, DbPool, SqlFlowStore, SqlInstanceRepository,
    SqlUserDirectory,
};

struct Harness {
    pool: DbPool,
    service: ApprovalService,
    quotations: InMemoryDocumentHandler,
    audit: InMemoryAuditSink,
}

async fn harness_with(quotations: InMemoryDocumentHandler) -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");

    let users = SqlUserDirectory::new(pool.clone());
    for user in [
        UserContext::new("A", "alice").with_name("Alice").with_role("sales_manager"),
        UserContext::new("B", "bob").with_name("Bob").with_role("sales_manager"),
        UserContext::new("C", "carol").with_name("Carol").with_role("dept_manager").with_dept("D2"),
        UserContext::new("D", "dave").with_name("Dave").with_role("dept_manager").with_dept("D1"),
        UserContext::new("E", "erin").with_name("Erin").with_role("engineer").with_dept("D1"),
        UserContext::new("R", "root").with_name("Root").with_role("admin"),
    ] {
        users.upsert_user(&user).await.expect("seed user");
    }

    let audit = InMemoryAuditSink::default();
    let handlers = DocumentHandlerRegistry::new()
        .with_handler(BizType::quotation(), Arc::new(quotations.clone()));
    let service = ApprovalService::new(
        Arc::new(SqlFlowStore::new(pool.clone())),
        Arc::new(SqlInstanceRepository::new(pool.clone())),
        Arc::new(users),
        handlers,
        Arc::new(audit.clone()),
    );

    service.save_flow(two_step_flow("F"), "R", "corr-setup").await.expect("flow F");
    service.save_flow(one_step_flow("SINGLE"), "R", "corr-setup").await.expect("flow SINGLE");

    Harness { pool, service, quotations, audit }
}

async fn harness() -> Harness {
    harness_with(InMemoryDocumentHandler::default()).await
}

fn two_step_flow(code: &str) -> RawFlowDefinition {
    serde_json::from_value(json!({
        "code": code,
        "name": "Quotation approval",
        "bizType": "quotation",
        "nodes": [
            {"step": 1, "name": "Sales review", "approverType": "role", "targetId": "sales_manager"},
            {
                "step": 2,
                "name": "Department sign-off",
                "approverType": "department_manager",
                "targetId": "D1",
                "managerRoleCodes": ["dept_manager"]
            }
        ]
    }))
    .expect("raw flow")
}

fn one_step_flow(code: &str) -> RawFlowDefinition {
    serde_json::from_value(json!({
        "code": code,
        "name": "Single review",
        "bizType": "quotation",
        "nodes": [{"step": 1, "approverType": "role", "targetId": "sales_manager"}]
    }))
    .expect("raw flow")
}

fn submit(biz_id: &str, flow_code: &str, submitter: &str) -> SubmitRequest {
    SubmitRequest {
        biz_type: "quotation".to_string(),
        biz_id: biz_id.to_string(),
        flow_code: flow_code.to_string(),
        submitter_id: submitter.to_string(),
        submitter_name: submitter.to_string(),
    }
}

fn decision(instance_id: &str, approver: &str, action: DecisionAction) -> DecisionRequest {
    DecisionRequest {
        instance_id: instance_id.to_string(),
        action,
        approver_id: approver.to_string(),
        approver_name: String::new(),
        comment: Some(format!("{approver} decided")),
    }
}

#[tokio::test]
async fn two_step_quotation_runs_to_approval() {
    let h = harness().await;
    let instance = h.service.submit(submit("Q1", "F", "A"), "corr-1").await.expect("submit");
    assert_eq!(instance.current_step, 1);
    assert_eq!(instance.status, ApprovalStatus::Pending);
    assert_eq!(instance.flow.version, 1);

    let outcome = h
        .service
        .decide(decision(&instance.id.0, "B", DecisionAction::Approve), "corr-2")
        .await
        .expect("B approves step 1");
    assert_eq!(outcome.instance.current_step, 2);
    assert_eq!(outcome.instance.status, ApprovalStatus::Pending);
    assert_eq!(outcome.resolution, None);

    let error = h
        .service
        .decide(decision(&instance.id.0, "C", DecisionAction::Approve), "corr-3")
        .await
        .expect_err("C manages the wrong department");
    assert!(matches!(error, ApprovalError::Forbidden { .. }));

    let outcome = h
        .service
        .decide(decision(&instance.id.0, "D", DecisionAction::Approve), "corr-4")
        .await
        .expect("D approves step 2");
    assert_eq!(outcome.instance.status, ApprovalStatus::Approved);
    assert!(outcome.instance.completed_at.is_some());
    assert_eq!(outcome.resolution, Some(Resolution::Approved));

    let document = DocumentRef::new(BizType::quotation(), "Q1");
    assert_eq!(h.quotations.resolutions(), vec![(document.clone(), Resolution::Approved)]);
    assert_eq!(
        h.quotations.calls()[..2],
        [
            HandlerCall::Progress { document: document.clone(), step: 1 },
            HandlerCall::Progress { document, step: 2 },
        ]
    );

    let detail = h.service.detail(&instance.id.0, "A", "corr-5").await.expect("detail");
    let steps: Vec<(u32, RecordAction, &str)> = detail
        .records
        .iter()
        .map(|record| (record.step, record.action, record.approver_id.as_str()))
        .collect();
    assert_eq!(steps, vec![(1, RecordAction::Approve, "B"), (2, RecordAction::Approve, "D")]);
    assert_eq!(detail.records[1].approver_name, "Dave");
}

#[tokio::test]
async fn editing_a_flow_leaves_in_flight_instances_on_their_snapshot() {
    let h = harness().await;
    let instance = h.service.submit(submit("Q8", "F", "A"), "corr-1").await.expect("submit");

    let reassigned: RawFlowDefinition = serde_json::from_value(json!({
        "code": "F",
        "bizType": "quotation",
        "nodes": [{"step": 1, "approverType": "specific_user", "targetId": "E"}]
    }))
    .expect("raw flow");
    let saved = h.service.save_flow(reassigned, "R", "corr-2").await.expect("re-save F");
    assert_eq!(saved.version, 2);

    let pending =
        InstanceFilter { status: Some(ApprovalStatus::Pending), ..InstanceFilter::default() };
    let seen_by_e = h.service.list_visible("E", &pending, "corr-3").await.expect("list as E");
    assert!(seen_by_e.is_empty(), "the new step-1 owner must not see the old instance");
    let seen_by_b = h.service.list_visible("B", &pending, "corr-4").await.expect("list as B");
    assert_eq!(seen_by_b.len(), 1);

    let error = h
        .service
        .decide(decision(&instance.id.0, "E", DecisionAction::Approve), "corr-5")
        .await
        .expect_err("E only owns step 1 of the new version");
    assert!(matches!(error, ApprovalError::Forbidden { .. }));

    let outcome = h
        .service
        .decide(decision(&instance.id.0, "B", DecisionAction::Approve), "corr-6")
        .await
        .expect("B still approves against the snapshot");
    assert_eq!(outcome.instance.flow.version, 1);
    assert_eq!(outcome.instance.current_step, 2);
    assert_eq!(outcome.instance.status, ApprovalStatus::Pending);

    let fresh = h.service.submit(submit("Q9", "F", "A"), "corr-7").await.expect("new submission");
    assert_eq!(fresh.flow.version, 2);
    assert_eq!(fresh.flow.nodes.len(), 1);
}

#[tokio::test]
async fn concurrent_submissions_leave_one_pending_instance() {
    let h = harness().await;
    let (first, second) = tokio::join!(
        h.service.submit(submit("Q7", "F", "A"), "corr-a"),
        h.service.submit(submit("Q7", "F", "B"), "corr-b"),
    );

    let results = [first, second];
    let created = results.iter().filter(|result| result.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|result| matches!(result, Err(ApprovalError::DuplicateSubmission { .. })))
        .count();
    assert_eq!((created, duplicates), (1, 1));

    let pending = h
        .service
        .list_visible(
            "R",
            &InstanceFilter { status: Some(ApprovalStatus::Pending), ..InstanceFilter::default() },
            "corr-c",
        )
        .await
        .expect("list");
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn rejection_is_terminal_and_document_can_be_resubmitted() {
    let h = harness().await;
    let instance = h.service.submit(submit("Q2", "F", "A"), "corr-1").await.expect("submit");

    let rejected = h
        .service
        .decide(decision(&instance.id.0, "B", DecisionAction::Reject), "corr-2")
        .await
        .expect("reject at step 1");
    assert_eq!(rejected.instance.status, ApprovalStatus::Rejected);
    assert_eq!(rejected.instance.current_step, 1);
    assert_eq!(rejected.resolution, Some(Resolution::Rejected));
    assert_eq!(
        h.quotations.resolutions(),
        vec![(DocumentRef::new(BizType::quotation(), "Q2"), Resolution::Rejected)]
    );

    let error = h
        .service
        .decide(decision(&instance.id.0, "B", DecisionAction::Reject), "corr-3")
        .await
        .expect_err("already rejected");
    assert!(matches!(error, ApprovalError::InstanceNotPending { .. }));

    let records = h.service.detail(&instance.id.0, "A", "corr-4").await.expect("detail").records;
    assert_eq!(records.len(), 1);

    let again = h.service.submit(submit("Q2", "F", "A"), "corr-5").await.expect("resubmit");
    assert_ne!(again.id, instance.id);
}

#[tokio::test]
async fn submitter_cancels_and_others_cannot() {
    let h = harness().await;
    let instance = h.service.submit(submit("Q3", "F", "A"), "corr-1").await.expect("submit");

    let cancel = |operator: &str| CancelRequest {
        instance_id: instance.id.0.clone(),
        operator_id: operator.to_string(),
        comment: Some("withdrawn".to_string()),
    };

    let error = h.service.cancel(cancel("B"), "corr-2").await.expect_err("not the submitter");
    assert!(matches!(error, ApprovalError::Forbidden { .. }));

    let cancelled = h.service.cancel(cancel("A"), "corr-3").await.expect("cancel");
    assert_eq!(cancelled.status, ApprovalStatus::Cancelled);

    let records = h.service.detail(&instance.id.0, "A", "corr-4").await.expect("detail").records;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, RecordAction::Cancel);
    assert_eq!(
        h.quotations.resolutions(),
        vec![(DocumentRef::new(BizType::quotation(), "Q3"), Resolution::Cancelled)]
    );
}

#[tokio::test]
async fn listing_is_limited_to_submitter_current_approver_and_admin() {
    let h = harness().await;
    let instance = h.service.submit(submit("Q4", "F", "A"), "corr-1").await.expect("submit");

    let visible_ids = |items: Vec<signoff_core::approvals::ApprovalListItem>| -> Vec<String> {
        items.into_iter().map(|item| item.instance.id.0).collect()
    };

    let filter = InstanceFilter::default();
    let for_bob = h.service.list_visible("B", &filter, "corr-2").await.expect("bob");
    assert_eq!(visible_ids(for_bob), vec![instance.id.0.clone()]);

    let for_dave = h.service.list_visible("D", &filter, "corr-3").await.expect("dave");
    assert!(for_dave.is_empty());

    h.service
        .decide(decision(&instance.id.0, "B", DecisionAction::Approve), "corr-4")
        .await
        .expect("advance to step 2");

    let for_dave = h.service.list_visible("D", &filter, "corr-5").await.expect("dave");
    assert_eq!(visible_ids(for_dave), vec![instance.id.0.clone()]);
    let for_bob = h.service.list_visible("B", &filter, "corr-6").await.expect("bob");
    assert!(for_bob.is_empty());

    let error = h
        .service
        .detail(&instance.id.0, "E", "corr-7")
        .await
        .expect_err("engineer cannot see it");
    assert!(matches!(error, ApprovalError::InstanceNotFound(_)));

    let detail = h.service.detail(&instance.id.0, "R", "corr-8").await.expect("admin detail");
    assert_eq!(detail.visible_as, VisibilityBasis::AdminOverride);
    assert_eq!(h.audit.events_of("approval.admin_override").len(), 1);
}

#[tokio::test]
async fn failing_document_callback_does_not_undo_the_decision() {
    let h = harness_with(InMemoryDocumentHandler::failing("quotation row locked")).await;
    let instance = h.service.submit(submit("Q5", "SINGLE", "A"), "corr-1").await.expect("submit");

    let outcome = h
        .service
        .decide(decision(&instance.id.0, "B", DecisionAction::Approve), "corr-2")
        .await
        .expect("decision stands");
    assert_eq!(outcome.instance.status, ApprovalStatus::Approved);

    let stored = h.service.detail(&instance.id.0, "A", "corr-3").await.expect("detail");
    assert_eq!(stored.instance.status, ApprovalStatus::Approved);

    let callbacks = h.audit.events_of("approval.callback");
    assert!(!callbacks.is_empty());
    assert!(callbacks.iter().all(|event| event.outcome == AuditOutcome::Failed));
    assert!(callbacks
        .iter()
        .any(|event| event.metadata.get("outcome").map(String::as_str) == Some("approved")));
}

#[tokio::test]
async fn admin_decision_bypasses_node_and_is_audited() {
    let h = harness().await;
    let instance = h.service.submit(submit("Q6", "SINGLE", "A"), "corr-1").await.expect("submit");

    let outcome = h
        .service
        .decide(decision(&instance.id.0, "R", DecisionAction::Approve), "corr-2")
        .await
        .expect("admin approves");
    assert!(outcome.admin_override);
    assert_eq!(outcome.instance.status, ApprovalStatus::Approved);

    let overrides = h.audit.events_of("approval.admin_override");
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].correlation_id, "corr-2");
    assert_eq!(overrides[0].actor, "R");
}

#[tokio::test]
async fn racing_decisions_record_exactly_one_outcome() {
    let h = harness().await;
    let instance = h.service.submit(submit("Q8", "SINGLE", "A"), "corr-1").await.expect("submit");

    let (first, second) = tokio::join!(
        h.service.decide(decision(&instance.id.0, "B", DecisionAction::Approve), "corr-b"),
        h.service.decide(decision(&instance.id.0, "R", DecisionAction::Reject), "corr-r"),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(ApprovalError::InstanceNotPending { .. } | ApprovalError::ConcurrentDecision(_))
    )));

    let records = h.service.detail(&instance.id.0, "A", "corr-c").await.expect("detail").records;
    assert_eq!(records.len(), 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approval_record WHERE instance_id = ?")
        .bind(&instance.id.0)
        .fetch_one(&h.pool)
        .await
        .expect("count records");
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn unknown_flow_and_unregistered_document_type_are_refused() {
    let h = harness().await;

    let error =
        h.service.submit(submit("Q9", "MISSING", "A"), "corr-1").await.expect_err("no flow");
    assert!(matches!(error, ApprovalError::FlowNotFound(_)));

    let mut contract = submit("C1", "F", "A");
    contract.biz_type = "contract".to_string();
    let error = h.service.submit(contract, "corr-2").await.expect_err("no contract handler");
    assert!(matches!(error, ApprovalError::UnsupportedBizType(_)));

    let failures = h.audit.events_of("approval.submit_failed");
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|event| event.outcome == AuditOutcome::Rejected));
}

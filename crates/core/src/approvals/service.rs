use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::approvals::engine::{
    ApprovalEngine, CancelRequest, DecisionOutcome, DecisionRequest, SubmitRequest,
};
use crate::approvals::handlers::DocumentHandlerRegistry;
use crate::approvals::ports::{
    FlowDefinitionStore, FlowFilter, InstanceFilter, InstanceRepository, UserDirectory,
};
use crate::approvals::visibility::{VisibilityBasis, VisibilityFilter};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::approval::{ApprovalInstance, ApprovalRecord, InstanceId, Resolution};
use crate::domain::document::DocumentRef;
use crate::domain::flow::FlowDefinition;
use crate::domain::user::{UserContext, UserId};
use crate::errors::{ApprovalError, LogSeverity};
use crate::flows::{FlowLoader, RawFlowDefinition};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalListItem {
    #[serde(flatten)]
    pub instance: ApprovalInstance,
    pub document_summary: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDetail {
    pub instance: ApprovalInstance,
    pub records: Vec<ApprovalRecord>,
    pub visible_as: VisibilityBasis,
}

/// Entry point for every approval operation.
///
/// Loads what the engine needs through the ports, runs the pure state machine,
/// persists the result, then notifies the owning document. Document callbacks
/// run after the write is committed; their failures are logged and audited but
/// never undo a decision.
pub struct ApprovalService {
    flows: Arc<dyn FlowDefinitionStore>,
    instances: Arc<dyn InstanceRepository>,
    users: Arc<dyn UserDirectory>,
    handlers: DocumentHandlerRegistry,
    audit: Arc<dyn AuditSink>,
    engine: ApprovalEngine,
    visibility: VisibilityFilter,
    loader: FlowLoader,
}

impl ApprovalService {
    pub fn new(
        flows: Arc<dyn FlowDefinitionStore>,
        instances: Arc<dyn InstanceRepository>,
        users: Arc<dyn UserDirectory>,
        handlers: DocumentHandlerRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            flows,
            instances,
            users,
            handlers,
            audit,
            engine: ApprovalEngine::default(),
            visibility: VisibilityFilter::default(),
            loader: FlowLoader::default(),
        }
    }

    pub fn with_loader(mut self, loader: FlowLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn loader(&self) -> &FlowLoader {
        &self.loader
    }

    pub fn handlers(&self) -> &DocumentHandlerRegistry {
        &self.handlers
    }

    pub async fn submit(
        &self,
        request: SubmitRequest,
        correlation_id: &str,
    ) -> Result<ApprovalInstance, ApprovalError> {
        let context = AuditContext::new(correlation_id, request.submitter_id.trim());
        let document = request.document();

        let instance = match self.try_submit(&request).await {
            Ok(instance) => instance,
            Err(error) => {
                self.report_failure(
                    &context,
                    "approval.submit_failed",
                    AuditCategory::Submission,
                    Some(&document),
                    None,
                    &error,
                );
                return Err(error);
            }
        };

        tracing::info!(
            event_name = "approval.submitted",
            correlation_id = %correlation_id,
            instance_id = %instance.id,
            biz_type = %instance.document.biz_type,
            biz_id = %instance.document.biz_id,
            flow_code = %instance.flow_code,
            flow_version = instance.flow.version,
            "approval submitted"
        );
        self.audit.emit(
            AuditEvent::new(
                &context,
                "approval.submitted",
                AuditCategory::Submission,
                AuditOutcome::Success,
            )
            .for_instance(&instance.id, &instance.document)
            .with_metadata("flow_code", instance.flow_code.to_string())
            .with_metadata("flow_version", instance.flow.version.to_string()),
        );
        self.notify_progress(&context, &instance).await;

        Ok(instance)
    }

    async fn try_submit(&self, request: &SubmitRequest) -> Result<ApprovalInstance, ApprovalError> {
        request.validate()?;
        let document = request.document();
        if !self.handlers.supports(&document.biz_type) {
            return Err(ApprovalError::UnsupportedBizType(document.biz_type));
        }

        let code = request.flow_code();
        let flow = self
            .flows
            .find_flow(&code)
            .await?
            .ok_or_else(|| ApprovalError::FlowNotFound(code.clone()))?;
        let instance = self.engine.open(request, &flow, Utc::now())?;
        self.instances.insert_pending(&instance).await?;
        Ok(instance)
    }

    pub async fn decide(
        &self,
        request: DecisionRequest,
        correlation_id: &str,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let context = AuditContext::new(correlation_id, request.approver_id.trim());
        let instance_id = InstanceId(request.instance_id.trim().to_string());

        let outcome = match self.try_decide(&instance_id, request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.report_failure(
                    &context,
                    "approval.decide_failed",
                    AuditCategory::Decision,
                    None,
                    Some(&instance_id),
                    &error,
                );
                return Err(error);
            }
        };

        let instance = &outcome.instance;
        tracing::info!(
            event_name = "approval.decided",
            correlation_id = %correlation_id,
            instance_id = %instance.id,
            biz_type = %instance.document.biz_type,
            biz_id = %instance.document.biz_id,
            action = outcome.record.action.as_str(),
            from_step = outcome.transition.from_step,
            to_step = outcome.transition.to_step,
            status = %instance.status,
            "approval decision recorded"
        );
        if outcome.admin_override {
            self.report_admin_override(&context, instance, "decide");
        }
        self.audit.emit(
            AuditEvent::new(
                &context,
                "approval.decided",
                AuditCategory::Decision,
                AuditOutcome::Success,
            )
            .for_instance(&instance.id, &instance.document)
            .with_metadata("action", outcome.record.action.as_str())
            .with_metadata("from_step", outcome.transition.from_step.to_string())
            .with_metadata("to_step", outcome.transition.to_step.to_string())
            .with_metadata("status", instance.status.as_str()),
        );

        match outcome.resolution {
            Some(resolution) => self.notify_resolved(&context, instance, resolution).await,
            None => self.notify_progress(&context, instance).await,
        }

        Ok(outcome)
    }

    async fn try_decide(
        &self,
        instance_id: &InstanceId,
        request: DecisionRequest,
    ) -> Result<DecisionOutcome, ApprovalError> {
        request.validate()?;
        let instance = self.load_instance(instance_id).await?;
        self.engine.ensure_decidable(&instance)?;

        let mut approver = self.load_actor(request.approver_id.trim()).await?;
        let approver_name = request.approver_name.trim();
        if !approver_name.is_empty() {
            approver.name = approver_name.to_string();
        }

        let outcome =
            self.engine.decide(&instance, &approver, request.action, request.comment, Utc::now())?;
        self.instances
            .commit_transition(&outcome.instance, instance.current_step, &outcome.record)
            .await?;
        Ok(outcome)
    }

    pub async fn cancel(
        &self,
        request: CancelRequest,
        correlation_id: &str,
    ) -> Result<ApprovalInstance, ApprovalError> {
        let context = AuditContext::new(correlation_id, request.operator_id.trim());
        let instance_id = InstanceId(request.instance_id.trim().to_string());

        let outcome = match self.try_cancel(&instance_id, request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.report_failure(
                    &context,
                    "approval.cancel_failed",
                    AuditCategory::Cancellation,
                    None,
                    Some(&instance_id),
                    &error,
                );
                return Err(error);
            }
        };

        let instance = outcome.instance;
        tracing::info!(
            event_name = "approval.cancelled",
            correlation_id = %correlation_id,
            instance_id = %instance.id,
            biz_type = %instance.document.biz_type,
            biz_id = %instance.document.biz_id,
            step = outcome.transition.from_step,
            "approval cancelled by submitter"
        );
        self.audit.emit(
            AuditEvent::new(
                &context,
                "approval.cancelled",
                AuditCategory::Cancellation,
                AuditOutcome::Success,
            )
            .for_instance(&instance.id, &instance.document)
            .with_metadata("step", outcome.transition.from_step.to_string()),
        );
        self.notify_resolved(&context, &instance, Resolution::Cancelled).await;

        Ok(instance)
    }

    async fn try_cancel(
        &self,
        instance_id: &InstanceId,
        request: CancelRequest,
    ) -> Result<DecisionOutcome, ApprovalError> {
        request.validate()?;
        let instance = self.load_instance(instance_id).await?;
        let operator = self.load_actor(request.operator_id.trim()).await?;
        let outcome = self.engine.cancel(&instance, &operator, request.comment, Utc::now())?;
        self.instances
            .commit_transition(&outcome.instance, instance.current_step, &outcome.record)
            .await?;
        Ok(outcome)
    }

    /// Instances matching `filter` that `viewer_id` may see, each with its
    /// document's display summary when the document handler provides one.
    pub async fn list_visible(
        &self,
        viewer_id: &str,
        filter: &InstanceFilter,
        correlation_id: &str,
    ) -> Result<Vec<ApprovalListItem>, ApprovalError> {
        let context = AuditContext::new(correlation_id, viewer_id);
        let result = async {
            let viewer = self.resolve_viewer(viewer_id).await?;
            let instances = self.instances.list_instances(filter).await?;
            Ok::<_, ApprovalError>(
                self.visibility.filter_with_report(instances, &viewer, |instance| instance),
            )
        }
        .await;

        let report = match result {
            Ok(report) => report,
            Err(error) => {
                self.report_failure(
                    &context,
                    "approval.list_failed",
                    AuditCategory::Visibility,
                    None,
                    None,
                    &error,
                );
                return Err(error);
            }
        };

        tracing::debug!(
            event_name = "approval.listed",
            correlation_id = %correlation_id,
            viewer_id = %viewer_id,
            visible = report.visible.len(),
            hidden = report.hidden,
            "approval listing filtered"
        );
        if report.admin_overrides > 0 {
            tracing::info!(
                event_name = "approval.admin_override",
                correlation_id = %correlation_id,
                viewer_id = %viewer_id,
                scope = "list",
                count = report.admin_overrides,
                "admin override widened approval listing"
            );
            self.audit.emit(
                AuditEvent::new(
                    &context,
                    "approval.admin_override",
                    AuditCategory::Override,
                    AuditOutcome::Success,
                )
                .with_metadata("scope", "list")
                .with_metadata("count", report.admin_overrides.to_string()),
            );
        }

        let mut items = Vec::with_capacity(report.visible.len());
        for instance in report.visible {
            let document_summary = self.document_summary(correlation_id, &instance.document).await;
            items.push(ApprovalListItem { instance, document_summary });
        }
        Ok(items)
    }

    /// One instance with its history. Instances the viewer may not see are
    /// reported as not found.
    pub async fn detail(
        &self,
        instance_id: &str,
        viewer_id: &str,
        correlation_id: &str,
    ) -> Result<ApprovalDetail, ApprovalError> {
        let context = AuditContext::new(correlation_id, viewer_id);
        let id = InstanceId(instance_id.trim().to_string());

        let result = async {
            let viewer = self.resolve_viewer(viewer_id).await?;
            let instance = self.load_instance(&id).await?;
            let visible_as = self
                .visibility
                .visibility(&instance, &viewer)
                .ok_or_else(|| ApprovalError::InstanceNotFound(id.clone()))?;
            let records = self.instances.list_records(&id).await?;
            Ok::<_, ApprovalError>(ApprovalDetail { instance, records, visible_as })
        }
        .await;

        match result {
            Ok(detail) => {
                if detail.visible_as == VisibilityBasis::AdminOverride {
                    self.report_admin_override(&context, &detail.instance, "detail");
                }
                Ok(detail)
            }
            Err(error) => {
                self.report_failure(
                    &context,
                    "approval.detail_failed",
                    AuditCategory::Visibility,
                    None,
                    Some(&id),
                    &error,
                );
                Err(error)
            }
        }
    }

    /// Directory facts for a viewer or actor. Unknown users may not act.
    pub async fn resolve_viewer(&self, user_id: &str) -> Result<UserContext, ApprovalError> {
        self.load_actor(user_id.trim()).await
    }

    /// Normalizes and stores a flow definition.
    pub async fn save_flow(
        &self,
        raw: RawFlowDefinition,
        actor: &str,
        correlation_id: &str,
    ) -> Result<FlowDefinition, ApprovalError> {
        let context = AuditContext::new(correlation_id, actor);
        let code = raw.code.trim().to_string();

        let result = async {
            let flow = self
                .loader
                .load(raw, Utc::now())
                .map_err(|error| ApprovalError::InvalidFlow {
                    code: code.clone(),
                    reason: error.to_string(),
                })?;
            Ok::<_, ApprovalError>(self.flows.save_flow(flow).await?)
        }
        .await;

        match result {
            Ok(flow) => {
                tracing::info!(
                    event_name = "approval.flow_saved",
                    correlation_id = %correlation_id,
                    flow_code = %flow.code,
                    version = flow.version,
                    nodes = flow.nodes.len(),
                    enabled = flow.enabled,
                    "approval flow saved"
                );
                self.audit.emit(
                    AuditEvent::new(
                        &context,
                        "approval.flow_saved",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("flow_code", flow.code.to_string())
                    .with_metadata("version", flow.version.to_string()),
                );
                Ok(flow)
            }
            Err(error) => {
                self.report_failure(
                    &context,
                    "approval.flow_save_failed",
                    AuditCategory::Flow,
                    None,
                    None,
                    &error,
                );
                Err(error)
            }
        }
    }

    pub async fn list_flows(
        &self,
        filter: &FlowFilter,
    ) -> Result<Vec<FlowDefinition>, ApprovalError> {
        Ok(self.flows.list_flows(filter).await?)
    }

    async fn load_instance(&self, id: &InstanceId) -> Result<ApprovalInstance, ApprovalError> {
        self.instances
            .find_instance(id)
            .await?
            .ok_or_else(|| ApprovalError::InstanceNotFound(id.clone()))
    }

    async fn load_actor(&self, user_id: &str) -> Result<UserContext, ApprovalError> {
        if user_id.is_empty() {
            return Err(ApprovalError::Validation("user id is required".to_string()));
        }
        self.users.find_user(&UserId(user_id.to_string())).await?.ok_or_else(|| {
            ApprovalError::Forbidden {
                user_id: user_id.to_string(),
                reason: "user is not known to the directory".to_string(),
            }
        })
    }

    async fn document_summary(
        &self,
        correlation_id: &str,
        document: &DocumentRef,
    ) -> Option<Value> {
        let handler = self.handlers.get(&document.biz_type)?;
        match handler.summary(document).await {
            Ok(summary) => summary,
            Err(error) => {
                tracing::warn!(
                    event_name = "approval.summary_failed",
                    correlation_id = %correlation_id,
                    biz_type = %document.biz_type,
                    biz_id = %document.biz_id,
                    error = %error,
                    "document summary unavailable"
                );
                None
            }
        }
    }

    async fn notify_progress(&self, context: &AuditContext, instance: &ApprovalInstance) {
        let Some(handler) = self.handlers.get(&instance.document.biz_type) else {
            return;
        };
        if let Err(error) = handler.on_progress(&instance.document, instance.current_step).await {
            self.report_callback_failure(context, instance, "progress", &error.to_string());
        }
    }

    async fn notify_resolved(
        &self,
        context: &AuditContext,
        instance: &ApprovalInstance,
        resolution: Resolution,
    ) {
        let Some(handler) = self.handlers.get(&instance.document.biz_type) else {
            self.report_callback_failure(
                context,
                instance,
                resolution.as_str(),
                "no document handler registered",
            );
            return;
        };

        match handler.on_resolved(&instance.document, resolution).await {
            Ok(()) => self.audit.emit(
                AuditEvent::new(
                    context,
                    "approval.callback",
                    AuditCategory::Callback,
                    AuditOutcome::Success,
                )
                .for_instance(&instance.id, &instance.document)
                .with_metadata("outcome", resolution.as_str()),
            ),
            Err(error) => self.report_callback_failure(
                context,
                instance,
                resolution.as_str(),
                &error.to_string(),
            ),
        }
    }

    fn report_callback_failure(
        &self,
        context: &AuditContext,
        instance: &ApprovalInstance,
        outcome: &str,
        message: &str,
    ) {
        tracing::error!(
            event_name = "approval.callback_failed",
            correlation_id = %context.correlation_id,
            instance_id = %instance.id,
            biz_type = %instance.document.biz_type,
            biz_id = %instance.document.biz_id,
            outcome,
            error = %message,
            "document status callback failed"
        );
        self.audit.emit(
            AuditEvent::new(
                context,
                "approval.callback",
                AuditCategory::Callback,
                AuditOutcome::Failed,
            )
            .for_instance(&instance.id, &instance.document)
            .with_metadata("outcome", outcome)
            .with_metadata("error", message),
        );
    }

    fn report_admin_override(
        &self,
        context: &AuditContext,
        instance: &ApprovalInstance,
        scope: &str,
    ) {
        tracing::info!(
            event_name = "approval.admin_override",
            correlation_id = %context.correlation_id,
            actor = %context.actor,
            instance_id = %instance.id,
            step = instance.current_step,
            scope,
            "admin override used"
        );
        self.audit.emit(
            AuditEvent::new(
                context,
                "approval.admin_override",
                AuditCategory::Override,
                AuditOutcome::Success,
            )
            .for_instance(&instance.id, &instance.document)
            .with_metadata("scope", scope),
        );
    }

    fn report_failure(
        &self,
        context: &AuditContext,
        event_type: &str,
        category: AuditCategory,
        document: Option<&DocumentRef>,
        instance_id: Option<&InstanceId>,
        error: &ApprovalError,
    ) {
        let instance = instance_id.map(ToString::to_string).unwrap_or_default();
        let document_key = document.map(ToString::to_string).unwrap_or_default();
        let outcome = match error.severity() {
            LogSeverity::Error => {
                tracing::error!(
                    event_name = event_type,
                    correlation_id = %context.correlation_id,
                    actor = %context.actor,
                    instance_id = %instance,
                    document = %document_key,
                    kind = error.kind(),
                    error = %error,
                    "approval operation failed"
                );
                AuditOutcome::Failed
            }
            LogSeverity::Warn => {
                tracing::warn!(
                    event_name = event_type,
                    correlation_id = %context.correlation_id,
                    actor = %context.actor,
                    instance_id = %instance,
                    document = %document_key,
                    kind = error.kind(),
                    error = %error,
                    "approval operation refused by configuration"
                );
                AuditOutcome::Rejected
            }
            LogSeverity::Info => {
                tracing::info!(
                    event_name = event_type,
                    correlation_id = %context.correlation_id,
                    actor = %context.actor,
                    instance_id = %instance,
                    document = %document_key,
                    kind = error.kind(),
                    error = %error,
                    "approval operation refused"
                );
                AuditOutcome::Rejected
            }
        };

        let mut event = AuditEvent::new(context, event_type, category, outcome)
            .with_metadata("kind", error.kind())
            .with_metadata("error", error.to_string());
        if let Some(document) = document {
            event = event.for_document(document);
        }
        if let Some(instance_id) = instance_id {
            event.instance_id = Some(instance_id.clone());
        }
        self.audit.emit(event);
    }
}

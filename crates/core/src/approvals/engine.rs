//! Instance state machine.
//!
//! `pending -> approved | rejected | cancelled`; every terminal state absorbs.
//! The engine is pure: it validates a transition against an instance it is
//! handed and returns the next state plus the history record to append. The
//! service persists both in one optimistic write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::resolver::{ApproverResolver, Eligibility, GrantBasis};
use crate::domain::approval::{
    ApprovalInstance, ApprovalRecord, ApprovalStatus, DecisionAction, InstanceId, RecordAction,
    RecordId, Resolution,
};
use crate::domain::document::{BizType, DocumentRef};
use crate::domain::flow::{ApprovalNode, FlowCode, FlowDefinition};
use crate::domain::user::{UserContext, UserId};
use crate::errors::ApprovalError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub biz_type: String,
    #[serde(default)]
    pub biz_id: String,
    #[serde(default)]
    pub flow_code: String,
    #[serde(default)]
    pub submitter_id: String,
    #[serde(default)]
    pub submitter_name: String,
}

impl SubmitRequest {
    pub fn validate(&self) -> Result<(), ApprovalError> {
        let missing = missing_fields(&[
            ("bizType", &self.biz_type),
            ("bizId", &self.biz_id),
            ("flowCode", &self.flow_code),
            ("submitterId", &self.submitter_id),
            ("submitterName", &self.submitter_name),
        ]);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ApprovalError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(BizType::new(self.biz_type.as_str()), self.biz_id.trim())
    }

    pub fn flow_code(&self) -> FlowCode {
        FlowCode(self.flow_code.trim().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    #[serde(default)]
    pub instance_id: String,
    pub action: DecisionAction,
    #[serde(default)]
    pub approver_id: String,
    #[serde(default)]
    pub approver_name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl DecisionRequest {
    pub fn validate(&self) -> Result<(), ApprovalError> {
        let missing =
            missing_fields(&[("instanceId", &self.instance_id), ("approverId", &self.approver_id)]);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ApprovalError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub operator_id: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl CancelRequest {
    pub fn validate(&self) -> Result<(), ApprovalError> {
        let missing =
            missing_fields(&[("instanceId", &self.instance_id), ("operatorId", &self.operator_id)]);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ApprovalError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

fn missing_fields<'a>(fields: &[(&'a str, &String)]) -> Vec<&'a str> {
    fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from_status: ApprovalStatus,
    pub to_status: ApprovalStatus,
    pub from_step: u32,
    pub to_step: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub instance: ApprovalInstance,
    pub record: ApprovalRecord,
    pub transition: Transition,
    /// Set when this decision ended the instance.
    pub resolution: Option<Resolution>,
    pub admin_override: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalEngine {
    resolver: ApproverResolver,
}

impl ApprovalEngine {
    pub fn new(resolver: ApproverResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ApproverResolver {
        &self.resolver
    }

    /// Builds the pending instance for a submission at step 1 with the flow's
    /// nodes frozen into it. Single-pending is enforced by the repository.
    pub fn open(
        &self,
        request: &SubmitRequest,
        flow: &FlowDefinition,
        now: DateTime<Utc>,
    ) -> Result<ApprovalInstance, ApprovalError> {
        request.validate()?;
        if !flow.enabled {
            return Err(ApprovalError::FlowDisabled(flow.code.clone()));
        }
        if flow.nodes.is_empty() {
            return Err(ApprovalError::EmptyFlow(flow.code.clone()));
        }
        if flow.node_at(1).is_none() {
            return Err(ApprovalError::InvalidFlow {
                code: flow.code.to_string(),
                reason: "flow has no step 1".to_string(),
            });
        }

        Ok(ApprovalInstance {
            id: InstanceId::generate(),
            document: request.document(),
            flow_code: flow.code.clone(),
            flow: flow.snapshot(),
            current_step: 1,
            status: ApprovalStatus::Pending,
            submitter_id: UserId(request.submitter_id.trim().to_string()),
            submitter_name: request.submitter_name.trim().to_string(),
            submitted_at: now,
            completed_at: None,
            updated_at: now,
        })
    }

    /// Node the instance is waiting on, provided it can still be decided.
    pub fn ensure_decidable<'a>(
        &self,
        instance: &'a ApprovalInstance,
    ) -> Result<&'a ApprovalNode, ApprovalError> {
        if !instance.is_pending() {
            return Err(ApprovalError::InstanceNotPending {
                id: instance.id.clone(),
                status: instance.status,
            });
        }
        instance.current_node().ok_or_else(|| ApprovalError::StepOutOfRange {
            id: instance.id.clone(),
            step: instance.current_step,
        })
    }

    /// Applies one approver's decision. Eligibility is resolved against the
    /// approver facts passed in, which callers load fresh for every decision.
    pub fn decide(
        &self,
        instance: &ApprovalInstance,
        approver: &UserContext,
        action: DecisionAction,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let node = self.ensure_decidable(instance)?;
        let basis = match self.resolver.resolve(node, approver) {
            Eligibility::Granted { basis } => basis,
            Eligibility::Denied(denial) => {
                return Err(ApprovalError::Forbidden {
                    user_id: approver.id.to_string(),
                    reason: denial.reason(),
                });
            }
        };

        let mut next = instance.clone();
        let resolution = match action {
            DecisionAction::Reject => Some(Resolution::Rejected),
            DecisionAction::Approve if instance.is_last_step() => Some(Resolution::Approved),
            DecisionAction::Approve => {
                next.current_step += 1;
                None
            }
        };
        if let Some(resolution) = resolution {
            next.status = resolution.status();
            next.completed_at = Some(now);
        }
        next.updated_at = now;

        let record = ApprovalRecord {
            id: RecordId::generate(),
            instance_id: instance.id.clone(),
            step: instance.current_step,
            action: RecordAction::from(action),
            approver_id: approver.id.clone(),
            approver_name: approver.name.clone(),
            comment: normalize_comment(comment),
            acted_at: now,
        };

        Ok(DecisionOutcome {
            transition: transition(instance, &next),
            instance: next,
            record,
            resolution,
            admin_override: basis == GrantBasis::AdminOverride,
        })
    }

    /// Withdraws a pending instance. Only its submitter may do this.
    pub fn cancel(
        &self,
        instance: &ApprovalInstance,
        operator: &UserContext,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ApprovalError> {
        if !instance.is_pending() {
            return Err(ApprovalError::InstanceNotPending {
                id: instance.id.clone(),
                status: instance.status,
            });
        }
        if operator.id != instance.submitter_id {
            return Err(ApprovalError::Forbidden {
                user_id: operator.id.to_string(),
                reason: "only the submitter may cancel an approval".to_string(),
            });
        }

        let mut next = instance.clone();
        next.status = ApprovalStatus::Cancelled;
        next.completed_at = Some(now);
        next.updated_at = now;

        let record = ApprovalRecord {
            id: RecordId::generate(),
            instance_id: instance.id.clone(),
            step: instance.current_step,
            action: RecordAction::Cancel,
            approver_id: operator.id.clone(),
            approver_name: operator.name.clone(),
            comment: normalize_comment(comment),
            acted_at: now,
        };

        Ok(DecisionOutcome {
            transition: transition(instance, &next),
            instance: next,
            record,
            resolution: Some(Resolution::Cancelled),
            admin_override: false,
        })
    }
}

fn transition(before: &ApprovalInstance, after: &ApprovalInstance) -> Transition {
    Transition {
        from_status: before.status,
        to_status: after.status,
        from_step: before.current_step,
        to_step: after.current_step,
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}

use thiserror::Error;

use crate::approvals::ports::StoreError;
use crate::domain::approval::{ApprovalStatus, InstanceId};
use crate::domain::document::{BizType, DocumentRef};
use crate::domain::flow::FlowCode;

/// How loudly a failure is logged and audited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("a pending approval already exists for {document}")]
    DuplicateSubmission { document: DocumentRef },
    #[error("approval flow `{0}` not found")]
    FlowNotFound(FlowCode),
    #[error("approval flow `{0}` has no nodes")]
    EmptyFlow(FlowCode),
    #[error("approval flow `{0}` is disabled")]
    FlowDisabled(FlowCode),
    #[error("approval flow `{code}` is invalid: {reason}")]
    InvalidFlow { code: String, reason: String },
    #[error("no document handler is registered for `{0}`")]
    UnsupportedBizType(BizType),
    #[error("approval instance `{0}` not found")]
    InstanceNotFound(InstanceId),
    #[error("approval instance `{id}` is already {status}")]
    InstanceNotPending { id: InstanceId, status: ApprovalStatus },
    #[error("approval instance `{id}` points at step {step}, which its flow does not define")]
    StepOutOfRange { id: InstanceId, step: u32 },
    #[error("user `{user_id}` may not act: {reason}")]
    Forbidden { user_id: String, reason: String },
    #[error("approval instance `{0}` was decided concurrently")]
    ConcurrentDecision(InstanceId),
    #[error("persistence failure: {0}")]
    Store(String),
}

impl ApprovalError {
    /// Stable machine-readable code, surfaced to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::DuplicateSubmission { .. } => "duplicate_submission",
            Self::FlowNotFound(_) => "flow_not_found",
            Self::EmptyFlow(_) => "empty_flow",
            Self::FlowDisabled(_) => "flow_disabled",
            Self::InvalidFlow { .. } => "invalid_flow",
            Self::UnsupportedBizType(_) => "unsupported_biz_type",
            Self::InstanceNotFound(_) => "instance_not_found",
            Self::InstanceNotPending { .. } => "instance_not_pending",
            Self::StepOutOfRange { .. } => "step_out_of_range",
            Self::Forbidden { .. } => "forbidden",
            Self::ConcurrentDecision(_) => "concurrent_decision",
            Self::Store(_) => "store_error",
        }
    }

    /// `StepOutOfRange` means stored data no longer matches its flow and is
    /// logged as an error alongside backend failures. Expected refusals are info.
    pub fn severity(&self) -> LogSeverity {
        match self {
            Self::StepOutOfRange { .. } | Self::Store(_) => LogSeverity::Error,
            Self::FlowNotFound(_)
            | Self::EmptyFlow(_)
            | Self::FlowDisabled(_)
            | Self::InvalidFlow { .. }
            | Self::UnsupportedBizType(_)
            | Self::ConcurrentDecision(_) => LogSeverity::Warn,
            Self::Validation(_)
            | Self::DuplicateSubmission { .. }
            | Self::InstanceNotFound(_)
            | Self::InstanceNotPending { .. }
            | Self::Forbidden { .. } => LogSeverity::Info,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let kind = self.kind();
        let message = self.to_string();
        match self {
            Self::Validation(_)
            | Self::EmptyFlow(_)
            | Self::FlowDisabled(_)
            | Self::InvalidFlow { .. }
            | Self::UnsupportedBizType(_) => {
                InterfaceError::BadRequest { kind, message, correlation_id }
            }
            Self::FlowNotFound(_) | Self::InstanceNotFound(_) => {
                InterfaceError::NotFound { kind, message, correlation_id }
            }
            Self::Forbidden { .. } => InterfaceError::Forbidden { kind, message, correlation_id },
            Self::DuplicateSubmission { .. }
            | Self::InstanceNotPending { .. }
            | Self::ConcurrentDecision(_) => {
                InterfaceError::Conflict { kind, message, correlation_id }
            }
            Self::Store(_) => InterfaceError::ServiceUnavailable { kind, message, correlation_id },
            Self::StepOutOfRange { .. } => {
                InterfaceError::Internal { kind, message, correlation_id }
            }
        }
    }
}

impl From<StoreError> for ApprovalError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::PendingExists(document) => Self::DuplicateSubmission { document },
            StoreError::StaleInstance(id) => Self::ConcurrentDecision(id),
            StoreError::Decode(message) | StoreError::Backend(message) => Self::Store(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { kind: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { kind: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { kind: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { kind: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { kind: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { kind: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { kind, .. }
            | Self::NotFound { kind, .. }
            | Self::Forbidden { kind, .. }
            | Self::Conflict { kind, .. }
            | Self::ServiceUnavailable { kind, .. }
            | Self::Internal { kind, .. } => kind,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    /// Message safe to show to callers. Client-side faults keep the detailed
    /// text; server-side faults get a generic line.
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Forbidden { message, .. }
            | Self::Conflict { message, .. } => message.clone(),
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_owned()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::ports::StoreError;
    use crate::domain::approval::{ApprovalStatus, InstanceId};
    use crate::domain::document::{BizType, DocumentRef};
    use crate::errors::{ApprovalError, InterfaceError, LogSeverity};

    #[test]
    fn refusals_map_to_client_errors_with_correlation_id() {
        let interface = ApprovalError::Forbidden {
            user_id: "u-9".to_owned(),
            reason: "approver lacks role `lab_director`".to_owned(),
        }
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Forbidden { ref correlation_id, kind: "forbidden", .. }
                if correlation_id == "req-1"
        ));
        assert!(interface.user_message().contains("lab_director"));
    }

    #[test]
    fn terminal_instance_is_a_conflict_logged_at_info() {
        let error = ApprovalError::InstanceNotPending {
            id: InstanceId("i-1".to_owned()),
            status: ApprovalStatus::Rejected,
        };
        assert_eq!(error.severity(), LogSeverity::Info);
        assert_eq!(error.to_string(), "approval instance `i-1` is already rejected");
        assert!(matches!(error.into_interface("req-2"), InterfaceError::Conflict { .. }));
    }

    #[test]
    fn step_out_of_range_is_an_internal_error() {
        let error = ApprovalError::StepOutOfRange { id: InstanceId("i-2".to_owned()), step: 4 };
        assert_eq!(error.severity(), LogSeverity::Error);

        let interface = error.into_interface("req-3");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
        assert_eq!(interface.kind(), "step_out_of_range");
    }

    #[test]
    fn store_errors_translate_to_engine_kinds() {
        let document = DocumentRef::new(BizType::quotation(), "Q1");
        assert_eq!(
            ApprovalError::from(StoreError::PendingExists(document.clone())),
            ApprovalError::DuplicateSubmission { document }
        );
        assert_eq!(
            ApprovalError::from(StoreError::StaleInstance(InstanceId("i-3".to_owned()))).kind(),
            "concurrent_decision"
        );

        let unavailable =
            ApprovalError::from(StoreError::Backend("database is locked".to_owned()))
                .into_interface("req-4");
        assert!(matches!(unavailable, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(unavailable.correlation_id(), "req-4");
    }
}

pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use approvals::{
    ApprovalDetail, ApprovalEngine, ApprovalListItem, ApprovalService, ApproverResolver,
    CancelRequest, DecisionOutcome, DecisionRequest, DocumentHandlerRegistry,
    DocumentStatusHandler, Eligibility, GrantBasis, SubmitRequest, VisibilityFilter,
};
pub use audit::{AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::approval::{
    ApprovalInstance, ApprovalRecord, ApprovalStatus, DecisionAction, InstanceId, RecordAction,
    Resolution,
};
pub use domain::document::{BizType, DocumentRef};
pub use domain::flow::{ApprovalNode, ApproverType, FlowCode, FlowDefinition, FlowSnapshot};
pub use domain::user::{UserContext, UserId};
pub use errors::{ApprovalError, InterfaceError, LogSeverity};
pub use flows::{FlowLoader, RawFlowDefinition};

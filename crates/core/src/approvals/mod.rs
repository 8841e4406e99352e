pub mod engine;
pub mod handlers;
pub mod ports;
pub mod resolver;
pub mod service;
pub mod visibility;

pub use engine::{
    ApprovalEngine, CancelRequest, DecisionOutcome, DecisionRequest, SubmitRequest, Transition,
};
pub use handlers::{
    DocumentHandlerRegistry, DocumentStatusHandler, HandlerCall, HandlerError,
    InMemoryDocumentHandler,
};
pub use ports::{
    FlowDefinitionStore, FlowFilter, InstanceFilter, InstanceRepository, StoreError, UserDirectory,
};
pub use resolver::{ApproverResolver, Eligibility, EligibilityDenial, GrantBasis};
pub use service::{ApprovalDetail, ApprovalListItem, ApprovalService};
pub use visibility::{VisibilityBasis, VisibilityFilter, VisibilityReport};

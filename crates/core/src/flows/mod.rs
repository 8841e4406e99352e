pub mod loader;

pub use loader::{
    FlowConfigError, FlowLoader, RawApprovalNode, RawFlowDefinition, RawNodes,
    DEFAULT_MANAGER_ROLE_CODES,
};

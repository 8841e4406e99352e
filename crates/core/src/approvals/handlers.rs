use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::approval::Resolution;
use crate::domain::document::{BizType, DocumentRef};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("document handler for `{biz_type}` failed: {message}")]
pub struct HandlerError {
    pub biz_type: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(biz_type: &BizType, message: impl Into<String>) -> Self {
        Self { biz_type: biz_type.to_string(), message: message.into() }
    }
}

/// Capability each document type registers so approvals can update it without
/// the engine knowing how that document is stored.
#[async_trait]
pub trait DocumentStatusHandler: Send + Sync {
    async fn on_resolved(
        &self,
        document: &DocumentRef,
        resolution: Resolution,
    ) -> Result<(), HandlerError>;

    /// Called after submission and after every non-final approval.
    async fn on_progress(&self, _document: &DocumentRef, _step: u32) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Small display projection used by approval listings.
    async fn summary(&self, _document: &DocumentRef) -> Result<Option<Value>, HandlerError> {
        Ok(None)
    }
}

#[derive(Clone, Default)]
pub struct DocumentHandlerRegistry {
    handlers: HashMap<BizType, Arc<dyn DocumentStatusHandler>>,
}

impl DocumentHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, biz_type: BizType, handler: Arc<dyn DocumentStatusHandler>) {
        self.handlers.insert(biz_type, handler);
    }

    pub fn with_handler(
        mut self,
        biz_type: BizType,
        handler: Arc<dyn DocumentStatusHandler>,
    ) -> Self {
        self.register(biz_type, handler);
        self
    }

    pub fn get(&self, biz_type: &BizType) -> Option<Arc<dyn DocumentStatusHandler>> {
        self.handlers.get(biz_type).cloned()
    }

    pub fn supports(&self, biz_type: &BizType) -> bool {
        self.handlers.contains_key(biz_type)
    }

    pub fn biz_types(&self) -> Vec<BizType> {
        let mut types: Vec<BizType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerCall {
    Resolved { document: DocumentRef, resolution: Resolution },
    Progress { document: DocumentRef, step: u32 },
}

/// Records every callback; used by tests and local wiring.
#[derive(Clone, Default)]
pub struct InMemoryDocumentHandler {
    calls: Arc<Mutex<Vec<HandlerCall>>>,
    summaries: Arc<Mutex<HashMap<String, Value>>>,
    fail_with: Option<String>,
}

impl InMemoryDocumentHandler {
    pub fn failing(message: impl Into<String>) -> Self {
        Self { fail_with: Some(message.into()), ..Self::default() }
    }

    pub fn with_summary(self, biz_id: impl Into<String>, summary: Value) -> Self {
        match self.summaries.lock() {
            Ok(mut summaries) => summaries.insert(biz_id.into(), summary),
            Err(poisoned) => poisoned.into_inner().insert(biz_id.into(), summary),
        };
        self
    }

    pub fn calls(&self) -> Vec<HandlerCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn resolutions(&self) -> Vec<(DocumentRef, Resolution)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HandlerCall::Resolved { document, resolution } => Some((document, resolution)),
                HandlerCall::Progress { .. } => None,
            })
            .collect()
    }

    fn record(&self, document: &DocumentRef, call: HandlerCall) -> Result<(), HandlerError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
        match &self.fail_with {
            Some(message) => Err(HandlerError::new(&document.biz_type, message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStatusHandler for InMemoryDocumentHandler {
    async fn on_resolved(
        &self,
        document: &DocumentRef,
        resolution: Resolution,
    ) -> Result<(), HandlerError> {
        self.record(document, HandlerCall::Resolved { document: document.clone(), resolution })
    }

    async fn on_progress(&self, document: &DocumentRef, step: u32) -> Result<(), HandlerError> {
        self.record(document, HandlerCall::Progress { document: document.clone(), step })
    }

    async fn summary(&self, document: &DocumentRef) -> Result<Option<Value>, HandlerError> {
        let summaries = match self.summaries.lock() {
            Ok(summaries) => summaries,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(summaries.get(&document.biz_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{
        DocumentHandlerRegistry, DocumentStatusHandler, HandlerCall, InMemoryDocumentHandler,
    };
    use crate::domain::approval::Resolution;
    use crate::domain::document::{BizType, DocumentRef};

    #[tokio::test]
    async fn registry_dispatches_by_biz_type() {
        let quotations = InMemoryDocumentHandler::default();
        let registry = DocumentHandlerRegistry::new()
            .with_handler(BizType::quotation(), Arc::new(quotations.clone()));

        assert!(registry.supports(&BizType::quotation()));
        assert!(registry.get(&BizType::contract()).is_none());

        let document = DocumentRef::new(BizType::quotation(), "Q1");
        let handler = registry.get(&BizType::quotation()).expect("handler registered");
        handler.on_resolved(&document, Resolution::Approved).await.expect("callback");

        assert_eq!(
            quotations.calls(),
            vec![HandlerCall::Resolved { document, resolution: Resolution::Approved }]
        );
    }

    #[tokio::test]
    async fn failing_handler_still_records_the_call() {
        let handler = InMemoryDocumentHandler::failing("row locked");
        let document = DocumentRef::new(BizType::contract(), "C9");

        let error = handler.on_progress(&document, 2).await.expect_err("configured to fail");
        assert_eq!(error.biz_type, "contract");
        assert_eq!(handler.calls().len(), 1);
    }

    #[tokio::test]
    async fn summaries_are_keyed_by_document_id() {
        let handler = InMemoryDocumentHandler::default()
            .with_summary("Q1", json!({"quotationNo": "BJ-2024-001", "total": 1200}));
        let found = handler
            .summary(&DocumentRef::new(BizType::quotation(), "Q1"))
            .await
            .expect("summary");
        assert_eq!(found, Some(json!({"quotationNo": "BJ-2024-001", "total": 1200})));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::Row;
use tracing::debug;

use signoff_core::approvals::handlers::{DocumentStatusHandler, HandlerError};
use signoff_core::domain::approval::Resolution;
use signoff_core::domain::document::{BizType, DocumentRef};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

/// Approval-facing status of one business document.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatusRow {
    pub biz_type: BizType,
    pub biz_id: String,
    pub approval_status: String,
    pub current_step: Option<u32>,
    pub summary: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

/// Default document handler: mirrors approval progress into `document_status`
/// for one business type.
pub struct SqlDocumentStatusLedger {
    pool: DbPool,
    biz_type: BizType,
}

impl SqlDocumentStatusLedger {
    pub fn new(pool: DbPool, biz_type: BizType) -> Self {
        Self { pool, biz_type }
    }

    pub fn biz_type(&self) -> &BizType {
        &self.biz_type
    }

    pub async fn status_of(
        &self,
        biz_id: &str,
    ) -> Result<Option<DocumentStatusRow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT approval_status, current_step, summary_json, updated_at
             FROM document_status WHERE biz_type = ? AND biz_id = ?",
        )
        .bind(self.biz_type.as_str())
        .bind(biz_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
        let approval_status: String = row.try_get("approval_status").map_err(decode)?;
        let current_step: Option<i64> = row.try_get("current_step").map_err(decode)?;
        let summary_json: Option<String> = row.try_get("summary_json").map_err(decode)?;
        let updated_at: String = row.try_get("updated_at").map_err(decode)?;

        let summary = summary_json
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|e| RepositoryError::Decode(format!("summary_json of `{biz_id}`: {e}")))?;
        let current_step = current_step
            .map(|step| {
                u32::try_from(step).map_err(|_| {
                    RepositoryError::Decode(format!("current_step {step} out of range"))
                })
            })
            .transpose()?;

        Ok(Some(DocumentStatusRow {
            biz_type: self.biz_type.clone(),
            biz_id: biz_id.to_string(),
            approval_status,
            current_step,
            summary,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        }))
    }

    /// Stores the display projection shown next to approval list entries.
    pub async fn record_summary(
        &self,
        biz_id: &str,
        summary: &Value,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO document_status (biz_type, biz_id, approval_status, summary_json, updated_at)
             VALUES (?, ?, 'draft', ?, ?)
             ON CONFLICT(biz_type, biz_id) DO UPDATE SET
                 summary_json = excluded.summary_json,
                 updated_at = excluded.updated_at",
        )
        .bind(self.biz_type.as_str())
        .bind(biz_id)
        .bind(summary.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_status(
        &self,
        document: &DocumentRef,
        status: &str,
        step: Option<u32>,
    ) -> Result<(), HandlerError> {
        if document.biz_type != self.biz_type {
            return Err(HandlerError::new(
                &document.biz_type,
                format!("ledger only tracks `{}` documents", self.biz_type),
            ));
        }

        sqlx::query(
            "INSERT INTO document_status (biz_type, biz_id, approval_status, current_step, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(biz_type, biz_id) DO UPDATE SET
                 approval_status = excluded.approval_status,
                 current_step = excluded.current_step,
                 updated_at = excluded.updated_at",
        )
        .bind(self.biz_type.as_str())
        .bind(&document.biz_id)
        .bind(status)
        .bind(step.map(i64::from))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| HandlerError::new(&document.biz_type, e.to_string()))?;
        debug!(document = %document, status, "document status updated");
        Ok(())
    }
}

#[async_trait]
impl DocumentStatusHandler for SqlDocumentStatusLedger {
    async fn on_resolved(
        &self,
        document: &DocumentRef,
        resolution: Resolution,
    ) -> Result<(), HandlerError> {
        self.write_status(document, resolution.status().as_str(), None).await
    }

    async fn on_progress(&self, document: &DocumentRef, step: u32) -> Result<(), HandlerError> {
        self.write_status(document, "pending", Some(step)).await
    }

    async fn summary(&self, document: &DocumentRef) -> Result<Option<Value>, HandlerError> {
        let row = self
            .status_of(&document.biz_id)
            .await
            .map_err(|e| HandlerError::new(&document.biz_type, e.to_string()))?;

        Ok(row.map(|row| match row.summary {
            Some(summary) => summary,
            None => json!({
                "bizId": row.biz_id,
                "approvalStatus": row.approval_status,
            }),
        }))
    }
}

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

use signoff_core::approvals::ports::{InstanceFilter, InstanceRepository, StoreError};
use signoff_core::domain::approval::{
    ApprovalInstance, ApprovalRecord, ApprovalStatus, InstanceId, RecordAction, RecordId,
};
use signoff_core::domain::document::{BizType, DocumentRef};
use signoff_core::domain::flow::{ApprovalNode, FlowCode, FlowSnapshot};
use signoff_core::domain::user::UserId;

use super::{is_unique_violation, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlInstanceRepository {
    pool: DbPool,
}

impl SqlInstanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const INSTANCE_COLUMNS: &str = "id, biz_type, biz_id, flow_code, flow_version, flow_nodes_json,
     current_step, status, submitter_id, submitter_name, submitted_at, completed_at, updated_at";

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn to_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column} {value} out of range")))
}

fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalInstance, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let biz_type: String = decode(row.try_get("biz_type"))?;
    let biz_id: String = decode(row.try_get("biz_id"))?;
    let flow_code: String = decode(row.try_get("flow_code"))?;
    let flow_version: i64 = decode(row.try_get("flow_version"))?;
    let flow_nodes_json: String = decode(row.try_get("flow_nodes_json"))?;
    let current_step: i64 = decode(row.try_get("current_step"))?;
    let status: String = decode(row.try_get("status"))?;
    let submitter_id: String = decode(row.try_get("submitter_id"))?;
    let submitter_name: String = decode(row.try_get("submitter_name"))?;
    let submitted_at: String = decode(row.try_get("submitted_at"))?;
    let completed_at: Option<String> = decode(row.try_get("completed_at"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;

    let nodes: Vec<ApprovalNode> = serde_json::from_str(&flow_nodes_json)
        .map_err(|e| RepositoryError::Decode(format!("flow_nodes_json of `{id}`: {e}")))?;

    Ok(ApprovalInstance {
        document: DocumentRef::new(BizType::new(biz_type), biz_id),
        flow_code: FlowCode(flow_code),
        flow: FlowSnapshot { version: to_u32("flow_version", flow_version)?, nodes },
        current_step: to_u32("current_step", current_step)?,
        status: ApprovalStatus::from_str(&status).map_err(RepositoryError::Decode)?,
        submitter_id: UserId(submitter_id),
        submitter_name,
        submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
        completed_at: completed_at
            .as_deref()
            .map(|value| parse_timestamp("completed_at", value))
            .transpose()?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        id: InstanceId(id),
    })
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let instance_id: String = decode(row.try_get("instance_id"))?;
    let step: i64 = decode(row.try_get("step"))?;
    let action: String = decode(row.try_get("action"))?;
    let approver_id: String = decode(row.try_get("approver_id"))?;
    let approver_name: String = decode(row.try_get("approver_name"))?;
    let comment: Option<String> = decode(row.try_get("comment"))?;
    let acted_at: String = decode(row.try_get("acted_at"))?;

    Ok(ApprovalRecord {
        id: RecordId(id),
        instance_id: InstanceId(instance_id),
        step: to_u32("step", step)?,
        action: RecordAction::from_str(&action).map_err(RepositoryError::Decode)?,
        approver_id: UserId(approver_id),
        approver_name,
        comment,
        acted_at: parse_timestamp("acted_at", &acted_at)?,
    })
}

#[async_trait]
impl InstanceRepository for SqlInstanceRepository {
    async fn insert_pending(&self, instance: &ApprovalInstance) -> Result<(), StoreError> {
        let nodes_json = serde_json::to_string(&instance.flow.nodes)
            .map_err(|e| StoreError::Decode(format!("encode snapshot of `{}`: {e}", instance.id)))?;

        let result = sqlx::query(
            "INSERT INTO approval_instance (id, biz_type, biz_id, flow_code, flow_version,
                                            flow_nodes_json, current_step, status, submitter_id,
                                            submitter_name, submitted_at, completed_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id.0)
        .bind(instance.document.biz_type.as_str())
        .bind(&instance.document.biz_id)
        .bind(instance.flow_code.as_str())
        .bind(i64::from(instance.flow.version))
        .bind(&nodes_json)
        .bind(i64::from(instance.current_step))
        .bind(instance.status.as_str())
        .bind(instance.submitter_id.as_str())
        .bind(&instance.submitter_name)
        .bind(instance.submitted_at.to_rfc3339())
        .bind(instance.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => {
                debug!(document = %instance.document, "pending instance already exists");
                Err(StoreError::PendingExists(instance.document.clone()))
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn find_instance(&self, id: &InstanceId) -> Result<Option<ApprovalInstance>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_instance(r)?)),
            None => Ok(None),
        }
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<ApprovalInstance>, StoreError> {
        let status = filter.status.map(ApprovalStatus::as_str);
        let submitter = filter.submitter_id.as_ref().map(UserId::as_str);
        let biz_type = filter.biz_type.as_ref().map(BizType::as_str);

        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance
             WHERE (? IS NULL OR status = ?)
               AND (? IS NULL OR submitter_id = ?)
               AND (? IS NULL OR biz_type = ?)
             ORDER BY submitted_at DESC, id"
        ))
        .bind(status)
        .bind(status)
        .bind(submitter)
        .bind(submitter)
        .bind(biz_type)
        .bind(biz_type)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_instance).collect::<Result<Vec<_>, _>>()?)
    }

    async fn commit_transition(
        &self,
        instance: &ApprovalInstance,
        expected_step: u32,
        record: &ApprovalRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let updated = sqlx::query(
            "UPDATE approval_instance
             SET current_step = ?, status = ?, completed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending' AND current_step = ?",
        )
        .bind(i64::from(instance.current_step))
        .bind(instance.status.as_str())
        .bind(instance.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(instance.updated_at.to_rfc3339())
        .bind(&instance.id.0)
        .bind(i64::from(expected_step))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(RepositoryError::from)?;
            debug!(
                instance_id = %instance.id,
                expected_step,
                "transition lost to a concurrent write"
            );
            return Err(StoreError::StaleInstance(instance.id.clone()));
        }

        sqlx::query(
            "INSERT INTO approval_record (id, instance_id, seq, step, action, approver_id,
                                          approver_name, comment, acted_at)
             VALUES (?, ?,
                     (SELECT COALESCE(MAX(seq), 0) + 1 FROM approval_record WHERE instance_id = ?),
                     ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.instance_id.0)
        .bind(&record.instance_id.0)
        .bind(i64::from(record.step))
        .bind(record.action.as_str())
        .bind(record.approver_id.as_str())
        .bind(&record.approver_name)
        .bind(&record.comment)
        .bind(record.acted_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list_records(&self, id: &InstanceId) -> Result<Vec<ApprovalRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, instance_id, step, action, approver_id, approver_name, comment, acted_at
             FROM approval_record WHERE instance_id = ? ORDER BY seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?)
    }
}

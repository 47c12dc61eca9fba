use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use signoff_core::domain::approval::{
    aggregate_status, AggregateStatus, ApprovalRequest, EmployeeId, LeaveInfo, RequestId,
    RequestType, StepState, StepStatus,
};

use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "request_id, requester_id, title, content, final_status,
    request_type, leave_info, created_at, updated_at";

const STEP_COLUMNS: &str = "request_id, step_number, approver_id, status, decided_at";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(
        &self,
        filter: &str,
        bind: Option<u32>,
    ) -> Result<HashMap<RequestId, Vec<StepState>>, RepositoryError> {
        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM approval_step
             WHERE request_id IN ({filter})
             ORDER BY request_id ASC, step_number ASC"
        );
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut steps: HashMap<RequestId, Vec<StepState>> = HashMap::new();
        for row in &rows {
            let (request_id, step) = row_to_step(row)?;
            steps.entry(request_id).or_default().push(step);
        }
        Ok(steps)
    }

    fn assemble(
        rows: Vec<SqliteRow>,
        mut steps: HashMap<RequestId, Vec<StepState>>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        rows.iter()
            .map(|row| {
                let request_id = RequestId(decode(row, "request_id")?);
                let request_steps = steps.remove(&request_id).unwrap_or_default();
                row_to_request(row, request_steps)
            })
            .collect()
    }
}

fn decode<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn step_number_from(value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("step_number out of range: {value}")))
}

fn row_to_step(row: &SqliteRow) -> Result<(RequestId, StepState), RepositoryError> {
    let request_id = RequestId(decode(row, "request_id")?);
    let step_number = step_number_from(decode(row, "step_number")?)?;
    let approver_id = EmployeeId(decode(row, "approver_id")?);
    let status_str: String = decode(row, "status")?;
    let status = StepStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_str}`")))?;
    let decided_at_str: Option<String> = decode(row, "decided_at")?;
    let decided_at =
        decided_at_str.as_deref().map(|value| parse_timestamp("decided_at", value)).transpose()?;

    Ok((request_id, StepState { step_number, approver_id, status, decided_at }))
}

fn row_to_request(
    row: &SqliteRow,
    steps: Vec<StepState>,
) -> Result<ApprovalRequest, RepositoryError> {
    let request_id = RequestId(decode(row, "request_id")?);
    let requester_id = EmployeeId(decode(row, "requester_id")?);
    let title: String = decode(row, "title")?;
    let content: String = decode(row, "content")?;

    let status_str: String = decode(row, "final_status")?;
    let aggregate_status = AggregateStatus::parse(&status_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown aggregate status `{status_str}`"))
    })?;
    let type_str: String = decode(row, "request_type")?;
    let request_type = RequestType::parse(&type_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request type `{type_str}`")))?;

    let leave_info_json: Option<String> = decode(row, "leave_info")?;
    let leave_info = leave_info_json
        .as_deref()
        .map(serde_json::from_str::<LeaveInfo>)
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("leave_info: {e}")))?;

    let created_at_str: String = decode(row, "created_at")?;
    let updated_at_str: String = decode(row, "updated_at")?;

    if steps.is_empty() {
        return Err(RepositoryError::Decode(format!("request {request_id} has no steps")));
    }

    Ok(ApprovalRequest {
        request_id,
        requester_id,
        title,
        content,
        steps,
        aggregate_status,
        request_type,
        leave_info,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        let leave_info_json = request
            .leave_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Decode(format!("leave_info: {e}")))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_request (request_id, requester_id, title, content, final_status,
                                           request_type, leave_info, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request.request_id.0)
        .bind(request.requester_id.0)
        .bind(&request.title)
        .bind(&request.content)
        .bind(request.aggregate_status.as_str())
        .bind(request.request_type.as_str())
        .bind(&leave_info_json)
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for step in &request.steps {
            sqlx::query(
                "INSERT INTO approval_step (request_id, step_number, approver_id, status, decided_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(request.request_id.0)
            .bind(i64::from(step.step_number))
            .bind(step.approver_id.0)
            .bind(step.status.as_str())
            .bind(step.decided_at.map(|dt| dt.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: RequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE request_id = ?");
        let Some(row) = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let step_sql = format!(
            "SELECT {STEP_COLUMNS} FROM approval_step WHERE request_id = ? ORDER BY step_number ASC"
        );
        let step_rows = sqlx::query(&step_sql).bind(id.0).fetch_all(&self.pool).await?;
        let steps = step_rows
            .iter()
            .map(|row| row_to_step(row).map(|(_, step)| step))
            .collect::<Result<Vec<_>, _>>()?;

        row_to_request(&row, steps).map(Some)
    }

    async fn list(&self, limit: u32) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request ORDER BY request_id ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        let steps = self
            .load_steps(
                "SELECT request_id FROM approval_request ORDER BY request_id ASC LIMIT ?",
                Some(limit),
            )
            .await?;

        Self::assemble(rows, steps)
    }

    async fn list_open(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let open_filter = "SELECT request_id FROM approval_request
                           WHERE final_status IN ('pending', 'in_progress')";
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE final_status IN ('pending', 'in_progress')
             ORDER BY request_id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let steps = self.load_steps(open_filter, None).await?;

        Self::assemble(rows, steps)
    }

    async fn record_decision(
        &self,
        request: &ApprovalRequest,
        step_number: u32,
    ) -> Result<ApprovalRequest, RepositoryError> {
        let stale =
            || RepositoryError::StaleWrite { request_id: request.request_id, step: step_number };
        let step = request.step(step_number).ok_or_else(stale)?;

        let mut tx = self.pool.begin().await?;

        let step_update = sqlx::query(
            "UPDATE approval_step
             SET status = ?, decided_at = ?
             WHERE request_id = ? AND step_number = ? AND approver_id = ? AND status = 'pending'",
        )
        .bind(step.status.as_str())
        .bind(step.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(request.request_id.0)
        .bind(i64::from(step_number))
        .bind(step.approver_id.0)
        .execute(&mut *tx)
        .await?;
        if step_update.rows_affected() == 0 {
            return Err(stale());
        }

        // The caller's other steps may predate a concurrent decision; the
        // aggregate comes from the rows as they stand inside this transaction.
        let step_sql = format!(
            "SELECT {STEP_COLUMNS} FROM approval_step WHERE request_id = ? ORDER BY step_number ASC"
        );
        let step_rows =
            sqlx::query(&step_sql).bind(request.request_id.0).fetch_all(&mut *tx).await?;
        let steps = step_rows
            .iter()
            .map(|row| row_to_step(row).map(|(_, step)| step))
            .collect::<Result<Vec<_>, _>>()?;
        let aggregate = aggregate_status(&steps);

        let request_update = sqlx::query(
            "UPDATE approval_request
             SET final_status = ?, updated_at = ?
             WHERE request_id = ? AND final_status IN ('pending', 'in_progress')",
        )
        .bind(aggregate.as_str())
        .bind(request.updated_at.to_rfc3339())
        .bind(request.request_id.0)
        .execute(&mut *tx)
        .await?;
        if request_update.rows_affected() == 0 {
            // dropping `tx` rolls back the step update
            return Err(stale());
        }

        tx.commit().await?;
        Ok(ApprovalRequest { steps, aggregate_status: aggregate, ..request.clone() })
    }
}

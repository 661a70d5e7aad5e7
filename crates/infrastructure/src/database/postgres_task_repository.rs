use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

use render_core::{SchedulerError, SchedulerResult};
use render_domain::{CallbackParams, Task, TaskFilter, TaskRepository, TaskStatus};

/// Postgres任务仓储
///
/// 只服务历史查询和冷启动兜底，调度路径上的写入全部由调用方
/// 按尽力而为处理。
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> SchedulerResult<Task> {
        let status: String = row.try_get("status")?;
        let status: TaskStatus = status
            .parse()
            .map_err(SchedulerError::ValidationError)?;

        let callback: serde_json::Value = row.try_get("callback")?;
        let callback: CallbackParams = serde_json::from_value(callback)?;

        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            project_id: row.try_get("project_id")?,
            payload: row.try_get("payload")?,
            callback,
            status,
            priority: row.try_get("priority")?,
            progress: row.try_get("progress")?,
            error: row.try_get("error")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
            completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn upsert_task(&self, task: &Task) -> SchedulerResult<()> {
        // 持久化前先确认引用的项目存在
        if !self.project_exists(&task.project_id).await? {
            warn!(
                "任务[{}]引用的项目不存在: {}, 跳过持久化",
                task.id, task.project_id
            );
            return Err(SchedulerError::ProjectNotFound {
                id: task.project_id.clone(),
            });
        }

        let callback = serde_json::to_value(&task.callback)?;

        // startedAt/completedAt用COALESCE保持只写一次
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, task_type, project_id, payload, callback, status,
                priority, progress, error, created_at, updated_at,
                started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                payload = EXCLUDED.payload,
                status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                error = EXCLUDED.error,
                updated_at = EXCLUDED.updated_at,
                started_at = COALESCE(tasks.started_at, EXCLUDED.started_at),
                completed_at = COALESCE(tasks.completed_at, EXCLUDED.completed_at)
            "#,
        )
        .bind(&task.id)
        .bind(&task.task_type)
        .bind(&task.project_id)
        .bind(&task.payload)
        .bind(callback)
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(task.progress)
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        skip: i64,
        take: i64,
    ) -> SchedulerResult<(Vec<Task>, i64)> {
        let status = filter.status.map(|s| s.as_str().to_string());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE ($1::text IS NULL OR task_type = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(&filter.task_type)
        .bind(&status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM tasks
            WHERE ($1::text IS NULL OR task_type = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY priority ASC, created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&filter.task_type)
        .bind(&status)
        .bind(take.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await?;

        let tasks = rows
            .iter()
            .map(Self::map_row)
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok((tasks, total))
    }

    async fn project_exists(&self, project_id: &str) -> SchedulerResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM projects WHERE id = $1)")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

use async_trait::async_trait;

use render_core::SchedulerResult;

use crate::models::task::{Task, TaskFilter};

/// 任务持久化仓储接口
///
/// 调度路径上的写入是尽力而为的：失败只记日志，绝不阻塞调度。
/// 只有快路径存储未命中时才读这里。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 插入或按id更新任务
    async fn upsert_task(&self, task: &Task) -> SchedulerResult<()>;

    /// 按id读取任务
    async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>>;

    /// 分页查询任务列表，返回(本页, 总数)
    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        skip: i64,
        take: i64,
    ) -> SchedulerResult<(Vec<Task>, i64)>;

    /// 任务关联的项目是否存在
    async fn project_exists(&self, project_id: &str) -> SchedulerResult<bool>;
}

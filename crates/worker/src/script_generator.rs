use std::path::{Path, PathBuf};

use tracing::info;

use render_core::{RenderConfig, SchedulerError, SchedulerResult};

/// Blender渲染脚本模板
const BLENDER_TEMPLATE: &str = include_str!("../templates/blender_render.py");

/// 默认的blend场景文件，payload里没有指定时使用
const DEFAULT_BLEND_FILE: &str = "./assets/default.blend";

/// Python渲染脚本生成器
///
/// 纯数据变换：根据任务参数渲染模板，写到输出目录，没有其它状态。
pub struct ScriptGenerator {
    output_dir: PathBuf,
}

impl ScriptGenerator {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.output_dir),
        }
    }

    /// 任务渲染产物目录
    pub fn task_output_dir(&self, task_id: &str) -> PathBuf {
        self.output_dir.join(task_id)
    }

    /// 创建Python渲染脚本，返回脚本路径
    pub async fn create_blender_script(
        &self,
        task_id: &str,
        params: &serde_json::Value,
    ) -> SchedulerResult<PathBuf> {
        let blend_file = params
            .get("blendFile")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BLEND_FILE);

        let quality = params
            .pointer("/renderParams/quality")
            .and_then(|v| v.as_str())
            .unwrap_or("medium");
        let samples = match quality {
            "high" => 128,
            "low" => 32,
            _ => 64,
        };

        let (res_x, res_y) = (
            params
                .pointer("/renderParams/resolutionX")
                .and_then(|v| v.as_i64())
                .unwrap_or(640),
            params
                .pointer("/renderParams/resolutionY")
                .and_then(|v| v.as_i64())
                .unwrap_or(480),
        );

        let cameras = params
            .get("camera")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        let cameras_json = serde_json::to_string(&cameras)?;

        let task_output_dir = self.task_output_dir(task_id);
        let script = BLENDER_TEMPLATE
            .replace("{{TASK_ID}}", task_id)
            .replace("{{BLEND_FILE}}", blend_file)
            .replace("{{OUTPUT_DIR}}", &task_output_dir.display().to_string())
            .replace("{{SAMPLES}}", &samples.to_string())
            .replace("{{RES_X}}", &res_x.to_string())
            .replace("{{RES_Y}}", &res_y.to_string())
            .replace("{{CAMERAS_JSON}}", &cameras_json);

        self.ensure_dir(&self.output_dir).await?;
        self.ensure_dir(&task_output_dir).await?;

        let script_path = self.output_dir.join(format!("render_task_{task_id}.py"));
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|e| SchedulerError::ScriptGeneration(format!("写入脚本失败: {e}")))?;

        info!("Python脚本已生成: {}", script_path.display());
        Ok(script_path)
    }

    async fn ensure_dir(&self, dir: &Path) -> SchedulerResult<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SchedulerError::ScriptGeneration(format!("创建目录失败: {e}")))
    }
}

//! Skill invocation through the prompt path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use jobrun_claude_sdk::PromptRunner;
use jobrun_core::{EngineConfig, JobConfig, JobType, WorkerResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ai::{run_prompt, PromptSettings};
use crate::Worker;

/// Build the instruction that asks the model to use a skill.
///
/// String params are passed verbatim, any other JSON value is pretty-printed.
/// Null and blank-string params are left out.
pub fn build_skill_prompt(skill: &str, action: Option<&str>, params: Option<&Value>) -> String {
    let mut prompt = format!("Use the \"{}\" skill", skill);

    if let Some(action) = action {
        prompt.push_str(&format!(" to perform the \"{}\" action", action));
    }

    let params = match params {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()).filter(|t| !t.trim().is_empty()),
        Some(other) => Some(serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())),
    };
    if let Some(params) = params {
        prompt.push_str("\n\nParameters:\n");
        prompt.push_str(&params);
    }

    prompt
}

/// Invokes a named skill, optionally with an action and parameters.
#[derive(Clone)]
pub struct SkillWorker {
    runner: Arc<dyn PromptRunner>,
    settings: PromptSettings,
    skills_dir: Option<PathBuf>,
}

impl SkillWorker {
    pub fn new(config: &EngineConfig, runner: Arc<dyn PromptRunner>) -> Self {
        Self {
            runner,
            settings: PromptSettings::new(config),
            skills_dir: config.resolved_skills_dir(),
        }
    }

    async fn working_dir(&self) -> Option<PathBuf> {
        let dir = self.skills_dir.as_deref()?;
        if is_dir(dir).await {
            Some(dir.to_path_buf())
        } else {
            debug!(skills_dir = %dir.display(), "Skills directory missing, not using it as cwd");
            None
        }
    }
}

impl std::fmt::Debug for SkillWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillWorker")
            .field("settings", &self.settings)
            .field("skills_dir", &self.skills_dir)
            .finish_non_exhaustive()
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[async_trait]
impl Worker for SkillWorker {
    fn job_type(&self) -> JobType {
        JobType::Skill
    }

    async fn execute(&self, config: &JobConfig, cancel: CancellationToken) -> WorkerResult {
        let started = Instant::now();
        let Some(skill) = JobConfig::non_blank(&config.skill_name) else {
            return WorkerResult::failure("No skill name specified in job config", started.elapsed());
        };

        let prompt = build_skill_prompt(
            skill,
            JobConfig::non_blank(&config.action),
            config.params.as_ref(),
        );
        let cwd = self.working_dir().await;

        run_prompt(
            self.runner.as_ref(),
            &self.settings,
            prompt,
            config,
            cwd,
            cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::MockRunner;
    use serde_json::json;

    fn worker(runner: Arc<MockRunner>, skills_dir: PathBuf) -> SkillWorker {
        let config = EngineConfig {
            skills_dir: Some(skills_dir),
            ..EngineConfig::default()
        };
        SkillWorker::new(&config, runner)
    }

    #[test]
    fn test_prompt_skill_only() {
        assert_eq!(build_skill_prompt("pdf", None, None), r#"Use the "pdf" skill"#);
    }

    #[test]
    fn test_prompt_with_action_and_text_params() {
        let params = json!("pages 1-3 only");
        assert_eq!(
            build_skill_prompt("pdf", Some("extract"), Some(&params)),
            "Use the \"pdf\" skill to perform the \"extract\" action\n\nParameters:\npages 1-3 only"
        );
    }

    #[test]
    fn test_prompt_with_structured_params() {
        let params = json!({"pages": [1, 2]});
        let prompt = build_skill_prompt("pdf", None, Some(&params));
        assert_eq!(
            prompt,
            "Use the \"pdf\" skill\n\nParameters:\n{\n  \"pages\": [\n    1,\n    2\n  ]\n}"
        );
    }

    #[test]
    fn test_prompt_skips_empty_params() {
        assert_eq!(
            build_skill_prompt("pdf", None, Some(&Value::Null)),
            r#"Use the "pdf" skill"#
        );
        assert_eq!(
            build_skill_prompt("pdf", None, Some(&json!(""))),
            r#"Use the "pdf" skill"#
        );
    }

    #[tokio::test]
    async fn test_missing_skill_name() {
        let runner = Arc::new(MockRunner::replying("unused"));
        let started = Instant::now();
        let result = worker(runner.clone(), PathBuf::from("/nope"))
            .execute(&JobConfig::default(), CancellationToken::new())
            .await;
        assert_eq!(result.error(), Some("No skill name specified in job config"));
        assert!(result.duration_ms() <= started.elapsed().as_millis() as u64);
        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_existing_skills_dir_is_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::replying("done"));
        let result = worker(runner.clone(), dir.path().to_path_buf())
            .execute(
                &JobConfig::skill("pdf").with_action("extract"),
                CancellationToken::new(),
            )
            .await;

        assert!(result.is_success());
        assert_eq!(result.output(), Some("done"));
        let requests = runner.requests.lock().unwrap();
        assert_eq!(requests[0].cwd.as_deref(), Some(dir.path()));
        assert_eq!(
            requests[0].prompt,
            r#"Use the "pdf" skill to perform the "extract" action"#
        );
    }

    #[tokio::test]
    async fn test_missing_skills_dir_is_not_cwd() {
        let runner = Arc::new(MockRunner::replying("done"));
        worker(runner.clone(), PathBuf::from("/definitely/not/skills"))
            .execute(&JobConfig::skill("pdf"), CancellationToken::new())
            .await;
        assert_eq!(runner.requests.lock().unwrap()[0].cwd, None);
    }
}

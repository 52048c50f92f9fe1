//! Note enhancement through the LLM: rewrite, summarize, or suggest tags.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{with_timeout, BackendError, Generator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Enhance,
    Summarize,
    Tag,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Enhance => "enhance",
            Task::Summarize => "summarize",
            Task::Tag => "tag",
        }
    }

    /// The prompt sent to the model for this task.
    pub fn prompt(self, content: &str) -> String {
        match self {
            Task::Enhance => format!(
                "Please enhance this note by improving clarity and organization. \
                 Keep the author's voice and every fact; reply with the improved note only.\n\n{}",
                content
            ),
            Task::Summarize => format!(
                "Please summarize this note in a few sentences. Reply with the summary only.\n\n{}",
                content
            ),
            Task::Tag => format!(
                "Extract key tags from this note as a comma-separated list. \
                 Reply with the list only, no explanations.\n\n{}",
                content
            ),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = EnhanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enhance" => Ok(Task::Enhance),
            "summarize" | "summarise" => Ok(Task::Summarize),
            "tag" | "tags" => Ok(Task::Tag),
            _ => Err(EnhanceError::InvalidTask(s.to_string())),
        }
    }
}

/// Run `task` on `content`. Blank content is rejected before the model is called.
/// `tag` replies are normalized to `a, b, c`.
pub async fn enhance(
    generator: &dyn Generator,
    timeout: Duration,
    content: &str,
    task: Task,
) -> Result<String, EnhanceError> {
    if content.trim().is_empty() {
        return Err(EnhanceError::EmptyInput);
    }
    tracing::debug!("enhance: task={} content_len={}", task, content.len());
    let reply = with_timeout(timeout, generator.generate(&task.prompt(content))).await?;
    let reply = match task {
        Task::Tag => normalize_tags(&reply),
        Task::Enhance | Task::Summarize => reply.trim().to_string(),
    };
    if reply.is_empty() {
        return Err(EnhanceError::EmptyReply);
    }
    Ok(reply)
}

/// Turn a model's tag reply into a clean comma-separated list: one tag per
/// comma or line, markup stripped, case-insensitive duplicates dropped.
pub fn normalize_tags(reply: &str) -> String {
    let mut seen = HashSet::new();
    reply
        .split([',', '\n'])
        .map(|t| {
            t.trim()
                .trim_start_matches(['-', '*', '#', ' '])
                .trim_matches(['"', '\'', '`', '.'])
                .trim()
        })
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("content must not be empty")]
    EmptyInput,
    #[error("unknown task: {0} (expected enhance, summarize or tag)")]
    InvalidTask(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("the model returned an empty reply")]
    EmptyReply,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct Echo {
        reply: String,
        calls: AtomicUsize,
    }

    impl Echo {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for Echo {
        fn model(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }

        async fn list_models(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["echo".into()])
        }
    }

    #[tokio::test]
    async fn empty_input_never_reaches_the_model() {
        let llm = Echo::new("unused");
        let err = enhance(&llm, Duration::from_secs(1), "  \n", Task::Summarize)
            .await
            .unwrap_err();
        assert!(matches!(err, EnhanceError::EmptyInput));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tag_replies_are_normalized() {
        let llm = Echo::new("#Rust, async\n- Tokio\nrust, ");
        let out = enhance(&llm, Duration::from_secs(1), "note", Task::Tag)
            .await
            .unwrap();
        assert_eq!(out, "Rust, async, Tokio");
    }

    #[tokio::test]
    async fn blank_reply_is_an_error() {
        let llm = Echo::new("   ");
        let err = enhance(&llm, Duration::from_secs(1), "note", Task::Enhance)
            .await
            .unwrap_err();
        assert!(matches!(err, EnhanceError::EmptyReply));
    }

    #[test]
    fn parses_tasks() {
        assert_eq!("summarize".parse::<Task>().unwrap(), Task::Summarize);
        assert_eq!(" TAG ".parse::<Task>().unwrap(), Task::Tag);
        assert!(matches!(
            "translate".parse::<Task>(),
            Err(EnhanceError::InvalidTask(_))
        ));
    }

    #[test]
    fn prompts_differ_per_task() {
        let prompts: HashSet<String> = [Task::Enhance, Task::Summarize, Task::Tag]
            .into_iter()
            .map(|t| t.prompt("x"))
            .collect();
        assert_eq!(prompts.len(), 3);
    }
}

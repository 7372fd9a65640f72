//! Digest composer: renders a batch as one line per group

use async_trait::async_trait;
use herald_domain::text::truncate_chars;
use herald_domain::{Batch, ComposeError, Composer};

/// Options for the digest composer
#[derive(Debug, Clone)]
pub struct DigestConfig {
    /// Longest line kept per group, in characters
    pub max_line_chars: usize,
    /// Groups beyond this are summarized in a closing line
    pub max_groups: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            max_line_chars: 200,
            max_groups: 10,
        }
    }
}

/// Composer that lists each group's leading event, without any generation step
pub struct DigestComposer {
    config: DigestConfig,
}

impl DigestComposer {
    pub fn new(config: DigestConfig) -> Self {
        Self { config }
    }

    fn render(&self, batch: &Batch) -> Option<String> {
        if batch.groups.is_empty() {
            return None;
        }

        let mut lines = vec![format!(
            "{}: {} update{}",
            batch.category,
            batch.event_count(),
            if batch.event_count() == 1 { "" } else { "s" }
        )];

        for group in batch.groups.iter().take(self.config.max_groups) {
            let text = group.leader().text();
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                continue;
            }

            let mut line = format!("- {}", truncate_chars(&text, self.config.max_line_chars));
            if group.len() > 1 {
                line.push_str(&format!(" (+{} similar)", group.len() - 1));
            }
            lines.push(line);
        }

        let hidden = batch.groups.len().saturating_sub(self.config.max_groups);
        if hidden > 0 {
            lines.push(format!("…and {} more", hidden));
        }

        (lines.len() > 1).then(|| lines.join("\n"))
    }
}

impl Default for DigestComposer {
    fn default() -> Self {
        Self::new(DigestConfig::default())
    }
}

#[async_trait]
impl Composer for DigestComposer {
    async fn compose(&self, batch: &Batch) -> Result<Option<String>, ComposeError> {
        Ok(self.render(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_domain::{Event, Group};
    use time::OffsetDateTime;

    fn batch(groups: Vec<Vec<&str>>) -> Batch {
        let now = OffsetDateTime::now_utc();
        let groups = groups
            .into_iter()
            .map(|texts| Group {
                events: texts
                    .into_iter()
                    .map(|t| Event::from_text(now, t))
                    .collect(),
            })
            .collect();

        Batch {
            batch_id: "batch_news_cp".to_string(),
            checkpoint_id: "cp".to_string(),
            category: "news".to_string(),
            groups,
            similarity_score: 0.0,
            checkpointed: true,
        }
    }

    #[tokio::test]
    async fn test_digest_lists_group_leaders() {
        let composer = DigestComposer::default();
        let batch = batch(vec![
            vec!["Rates   rise\nagain", "Central bank hikes"],
            vec!["Storm warning"],
        ]);

        let text = composer.compose(&batch).await.unwrap().unwrap();

        assert_eq!(
            text,
            "news: 3 updates\n- Rates rise again (+1 similar)\n- Storm warning"
        );
    }

    #[tokio::test]
    async fn test_digest_caps_groups() {
        let composer = DigestComposer::new(DigestConfig {
            max_line_chars: 200,
            max_groups: 1,
        });
        let batch = batch(vec![vec!["one"], vec!["two"], vec!["three"]]);

        let text = composer.compose(&batch).await.unwrap().unwrap();

        assert_eq!(text, "news: 3 updates\n- one\n…and 2 more");
    }

    #[tokio::test]
    async fn test_empty_batch_is_skipped() {
        let composer = DigestComposer::default();
        assert_eq!(composer.compose(&batch(vec![])).await.unwrap(), None);
        assert_eq!(composer.compose(&batch(vec![vec!["  "]])).await.unwrap(), None);
    }
}

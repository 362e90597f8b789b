//! Natural-language questions over stored snapshots.
//!
//! The latest snapshot of each requested provider is serialized into the
//! prompt and forwarded to a [`LanguageModel`]. The answer text is returned
//! as-is.

pub mod openai;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::InsightError;
use crate::scan::{AggregateResult, ProviderKind};
use crate::store::Store;

pub use openai::OpenAiChat;

/// A hosted chat-completion model.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String, InsightError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Provider(ProviderKind),
    All,
}

impl QueryTarget {
    fn providers(&self) -> Vec<ProviderKind> {
        match self {
            QueryTarget::Provider(kind) => vec![*kind],
            QueryTarget::All => ProviderKind::ALL.to_vec(),
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            QueryTarget::Provider(ProviderKind::Aws) => {
                "You are an AWS cloud infrastructure expert. \
                 Analyze the provided AWS infrastructure data and answer the user's question. \
                 Focus only on AWS resources and provide clear, actionable insights."
            }
            QueryTarget::Provider(ProviderKind::Azure) => {
                "You are an Azure cloud infrastructure expert. \
                 Analyze the provided Azure infrastructure data and answer the user's question. \
                 Focus only on Azure resources and provide clear, actionable insights."
            }
            QueryTarget::All => {
                "You are an expert in both AWS and Azure cloud infrastructure. \
                 Analyze the provided infrastructure data and answer the user's question. \
                 Consider resources from both clouds and provide comprehensive insights."
            }
        }
    }

    fn data_heading(&self) -> String {
        match self {
            QueryTarget::Provider(kind) => format!("{} Infrastructure Data", kind.display_name()),
            QueryTarget::All => "Infrastructure Data".to_string(),
        }
    }

    fn missing_label(&self) -> &'static str {
        match self {
            QueryTarget::Provider(kind) => kind.display_name(),
            QueryTarget::All => "cloud",
        }
    }
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Provider(kind) => write!(f, "{kind}"),
            QueryTarget::All => f.write_str("all"),
        }
    }
}

impl FromStr for QueryTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(QueryTarget::All);
        }
        s.parse::<ProviderKind>()
            .map(QueryTarget::Provider)
            .map_err(|_| format!("unknown query target '{s}', expected 'aws', 'azure' or 'all'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clouds: Option<Vec<ProviderKind>>,
}

pub struct InsightService {
    model: Box<dyn LanguageModel>,
}

impl InsightService {
    pub fn new(model: Box<dyn LanguageModel>) -> Self {
        InsightService { model }
    }

    /// Answers `question` against the given snapshots. The text comes back
    /// unvalidated.
    pub fn answer(
        &self,
        question: &str,
        target: QueryTarget,
        contexts: &[&AggregateResult],
    ) -> Result<String, InsightError> {
        let data = match (target, contexts) {
            (QueryTarget::Provider(_), [single]) => serde_json::to_string_pretty(single)?,
            _ => {
                let mut by_provider = Map::new();
                for context in contexts {
                    by_provider.insert(context.provider.to_string(), serde_json::to_value(context)?);
                }
                serde_json::to_string_pretty(&Value::Object(by_provider))?
            }
        };

        let user = format!(
            "{}:\n{data}\n\nUser Question:\n{question}\n",
            target.data_heading()
        );

        self.model.complete(target.system_prompt(), &user)
    }

    /// Loads the latest snapshot(s) for `target` and answers `question`.
    pub fn ask(&self, store: &Store, question: &str, target: QueryTarget) -> Result<Answer, InsightError> {
        let question = validate_question(question)?;
        let snapshots = latest_snapshots(store, target)?;
        self.ask_with(question, target, &snapshots)
    }

    /// Answers `question` against snapshots already loaded by
    /// [`latest_snapshots`].
    pub fn ask_with(
        &self,
        question: &str,
        target: QueryTarget,
        snapshots: &[AggregateResult],
    ) -> Result<Answer, InsightError> {
        let question = validate_question(question)?;

        let contexts: Vec<&AggregateResult> = snapshots.iter().collect();
        info!(%target, snapshots = contexts.len(), "asking language model");
        let answer = self.answer(question, target, &contexts)?;

        let (cloud, clouds) = match target {
            QueryTarget::Provider(kind) => (Some(kind), None),
            QueryTarget::All => (None, Some(snapshots.iter().map(|s| s.provider).collect())),
        };

        Ok(Answer {
            question: question.to_string(),
            answer,
            cloud,
            clouds,
        })
    }
}

/// Trims `question`, rejecting blank input.
pub fn validate_question(question: &str) -> Result<&str, InsightError> {
    let question = question.trim();
    if question.is_empty() {
        Err(InsightError::EmptyQuestion)
    } else {
        Ok(question)
    }
}

/// Latest snapshot of every provider in `target`.
///
/// A single-provider target with no snapshot, or `all` with no snapshot
/// for any provider, is [`InsightError::NoSnapshot`].
pub fn latest_snapshots(store: &Store, target: QueryTarget) -> Result<Vec<AggregateResult>, InsightError> {
    let mut snapshots = Vec::new();
    for kind in target.providers() {
        if let Some(snapshot) = store.get_latest(kind)? {
            snapshots.push(snapshot.data);
        }
    }

    if snapshots.is_empty() {
        return Err(InsightError::NoSnapshot {
            target: target.missing_label().to_string(),
        });
    }

    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ServiceSet;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records the prompts it receives and answers with a fixed string.
    #[derive(Clone, Default)]
    struct Echo {
        prompts: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl LanguageModel for Echo {
        fn complete(&self, system: &str, user: &str) -> Result<String, InsightError> {
            self.prompts.lock().push((system.to_string(), user.to_string()));
            Ok("two instances".to_string())
        }
    }

    fn aggregate(provider: ProviderKind) -> AggregateResult {
        AggregateResult::new(provider, "acct", ServiceSet::from_tags(["x"]), ["things"])
    }

    #[test]
    fn no_snapshot_is_distinct_error() {
        let store = Store::open_in_memory().unwrap();
        let service = InsightService::new(Box::new(Echo::default()));

        let err = service
            .ask(&store, "how many?", QueryTarget::Provider(ProviderKind::Azure))
            .unwrap_err();
        assert!(matches!(err, InsightError::NoSnapshot { .. }));
        assert_eq!(
            err.to_string(),
            "No Azure infrastructure data found. Please scan your Azure resources first."
        );
    }

    #[test]
    fn empty_question_is_rejected_before_lookup() {
        let store = Store::open_in_memory().unwrap();
        let service = InsightService::new(Box::new(Echo::default()));
        let err = service.ask(&store, "   ", QueryTarget::All).unwrap_err();
        assert!(matches!(err, InsightError::EmptyQuestion));
    }

    #[test]
    fn provider_question_uses_provider_prompt() {
        let store = Store::open_in_memory().unwrap();
        store.put(ProviderKind::Aws, &aggregate(ProviderKind::Aws)).unwrap();

        let model = Echo::default();
        let service = InsightService::new(Box::new(model.clone()));
        let answer = service
            .ask(&store, "how many instances?", QueryTarget::Provider(ProviderKind::Aws))
            .unwrap();

        assert_eq!(answer.answer, "two instances");
        assert_eq!(answer.cloud, Some(ProviderKind::Aws));
        assert!(answer.clouds.is_none());

        let prompts = model.prompts.lock();
        assert!(prompts[0].0.starts_with("You are an AWS cloud infrastructure expert."));
        assert!(prompts[0].1.starts_with("AWS Infrastructure Data:"));
        assert!(prompts[0].1.contains("how many instances?"));
    }

    #[test]
    fn combined_question_lists_available_clouds() {
        let store = Store::open_in_memory().unwrap();
        store.put(ProviderKind::Azure, &aggregate(ProviderKind::Azure)).unwrap();

        let model = Echo::default();
        let service = InsightService::new(Box::new(model.clone()));
        let answer = service.ask(&store, "what runs where?", QueryTarget::All).unwrap();

        assert_eq!(answer.clouds, Some(vec![ProviderKind::Azure]));
        let json = serde_json::to_value(&answer).unwrap();
        assert!(json.get("cloud").is_none());
        assert_eq!(json["clouds"], serde_json::json!(["azure"]));

        let prompts = model.prompts.lock();
        assert!(prompts[0].0.contains("both AWS and Azure"));
        assert!(prompts[0].1.contains("\"azure\""));
    }

    #[test]
    fn target_parses() {
        assert_eq!("all".parse::<QueryTarget>(), Ok(QueryTarget::All));
        assert_eq!("AWS".parse::<QueryTarget>(), Ok(QueryTarget::Provider(ProviderKind::Aws)));
        assert!("gcp".parse::<QueryTarget>().is_err());
    }
}

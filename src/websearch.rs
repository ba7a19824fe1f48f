//! Live web search provider abstraction.
//!
//! Defines the [`SearchProvider`] trait and the [`DuckDuckGoSearch`]
//! implementation over the DuckDuckGo instant-answer JSON API. Results come
//! back in provider order with no similarity score; callers treat them as
//! lower-trust context than knowledge-base hits.
//!
//! Every transport, status, or decode failure maps to
//! [`Error::SearchUnavailable`] so the orchestrator can degrade to
//! knowledge-base-only context instead of failing the turn.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::WebSearchConfig;
use crate::error::{Error, Result};
use crate::models::WebSnippet;

/// Trait for live web search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Return up to `max_results` snippets for `query`, in provider order.
    /// Zero results is a valid outcome, not an error.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>>;
}

const DUCKDUCKGO_ENDPOINT: &str = "https://api.duckduckgo.com/";

/// Web search over the DuckDuckGo instant-answer API.
///
/// Maps the answer abstract plus the flattened related-topic list into
/// [`WebSnippet`]s. The endpoint needs no credentials.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::SearchUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: DUCKDUCKGO_ENDPOINT.to_string(),
        })
    }

    /// Point the provider at a different endpoint, e.g. a fixture server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| Error::SearchUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SearchUnavailable(format!(
                "DuckDuckGo returned {status}"
            )));
        }
        let answer: InstantAnswer = response
            .json()
            .await
            .map_err(|e| Error::SearchUnavailable(format!("response decode: {e}")))?;

        Ok(snippets_from_answer(answer, max_results))
    }
}

#[derive(Debug, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

/// Related topics arrive either as leaf entries or as named groups that
/// nest further entries under `Topics`.
#[derive(Debug, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
    #[serde(rename = "Topics", default)]
    topics: Vec<RelatedTopic>,
}

fn snippets_from_answer(answer: InstantAnswer, max_results: usize) -> Vec<WebSnippet> {
    let mut snippets = Vec::new();
    if !answer.abstract_text.is_empty() {
        snippets.push(WebSnippet {
            title: answer.heading.clone(),
            snippet: answer.abstract_text,
            url: answer.abstract_url,
        });
    }
    collect_topics(&answer.related_topics, &mut snippets, max_results);
    snippets.truncate(max_results);
    snippets
}

fn collect_topics(topics: &[RelatedTopic], out: &mut Vec<WebSnippet>, max_results: usize) {
    for topic in topics {
        if out.len() >= max_results {
            return;
        }
        if !topic.topics.is_empty() {
            collect_topics(&topic.topics, out, max_results);
            continue;
        }
        if topic.text.is_empty() {
            continue;
        }
        let (title, snippet) = split_topic_text(&topic.text);
        out.push(WebSnippet {
            title,
            snippet,
            url: topic.first_url.clone(),
        });
    }
}

/// Topic text reads `"Title - description"`; fall back to the whole text as
/// both when the separator is absent.
fn split_topic_text(text: &str) -> (String, String) {
    match text.split_once(" - ") {
        Some((title, rest)) => (title.trim().to_string(), rest.trim().to_string()),
        None => (text.trim().to_string(), text.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_answer() -> InstantAnswer {
        serde_json::from_value(serde_json::json!({
            "Heading": "Common cold",
            "AbstractText": "The common cold is a viral infection of the upper respiratory tract.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Common_cold",
            "RelatedTopics": [
                {
                    "Text": "Rhinovirus - The most frequent cause of the common cold.",
                    "FirstURL": "https://duckduckgo.com/Rhinovirus"
                },
                {
                    "Name": "Related",
                    "Topics": [
                        {
                            "Text": "Influenza - A more severe respiratory illness.",
                            "FirstURL": "https://duckduckgo.com/Influenza"
                        }
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_abstract_becomes_first_snippet() {
        let snippets = snippets_from_answer(sample_answer(), 5);
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets[0].title, "Common cold");
        assert!(snippets[0].snippet.contains("viral infection"));
        assert_eq!(
            snippets[0].url,
            "https://en.wikipedia.org/wiki/Common_cold"
        );
    }

    #[test]
    fn test_nested_topic_groups_are_flattened_in_order() {
        let snippets = snippets_from_answer(sample_answer(), 5);
        assert_eq!(snippets[1].title, "Rhinovirus");
        assert_eq!(snippets[1].snippet, "The most frequent cause of the common cold.");
        assert_eq!(snippets[2].title, "Influenza");
    }

    #[test]
    fn test_max_results_caps_output() {
        let snippets = snippets_from_answer(sample_answer(), 1);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].title, "Common cold");
    }

    #[test]
    fn test_empty_answer_yields_no_snippets() {
        let answer: InstantAnswer = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(snippets_from_answer(answer, 3).is_empty());
    }

    #[test]
    fn test_topic_without_separator_keeps_full_text() {
        let (title, snippet) = split_topic_text("Plain text topic");
        assert_eq!(title, "Plain text topic");
        assert_eq!(snippet, "Plain text topic");
    }
}

//! Bounded context assembly.
//!
//! Packs knowledge-base hits and web snippets into one prompt-ready block
//! under a character budget. Items are appended whole, in priority order;
//! when the next item would overflow the budget that source stops packing
//! and the lower-priority source gets whatever room is left. Nothing is ever
//! truncated mid-item.
//!
//! Knowledge-base entries are numbered `[Source N]` under a
//! `=== Knowledge Base Context ===` header; web entries are numbered
//! `[Result N]` under `=== Web Search Results ===`.

use crate::models::{Citation, RetrievalHit, SourceKind, WebSnippet};

const KB_HEADER: &str = "=== Knowledge Base Context ===";
const WEB_HEADER: &str = "=== Web Search Results ===";

/// Which source packs first when both are present. Knowledge-base context
/// carries higher trust and wins by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblyPolicy {
    #[default]
    KnowledgeFirst,
    WebFirst,
}

/// Prompt-ready context plus the provenance of everything included.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Assemble a bounded context block from both retrieval sources.
///
/// Both sources empty yields an empty (but valid) context; the prompt
/// builder states the absence explicitly rather than inventing support.
pub fn assemble(
    hits: &[RetrievalHit],
    snippets: &[WebSnippet],
    max_chars: usize,
    policy: AssemblyPolicy,
) -> AssembledContext {
    let mut packer = Packer::new(max_chars);
    match policy {
        AssemblyPolicy::KnowledgeFirst => {
            packer.push_block(KB_HEADER, kb_entries(hits));
            packer.push_block(WEB_HEADER, web_entries(snippets));
        }
        AssemblyPolicy::WebFirst => {
            packer.push_block(WEB_HEADER, web_entries(snippets));
            packer.push_block(KB_HEADER, kb_entries(hits));
        }
    }
    AssembledContext {
        text: packer.text,
        citations: packer.citations,
    }
}

fn kb_entries(hits: &[RetrievalHit]) -> Vec<(String, Citation)> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            (
                format!("[Source {}]\n{}", i + 1, hit.text),
                Citation {
                    label: hit.source_label.clone(),
                    kind: SourceKind::KnowledgeBase,
                },
            )
        })
        .collect()
}

fn web_entries(snippets: &[WebSnippet]) -> Vec<(String, Citation)> {
    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let label = if s.title.is_empty() {
                s.url.clone()
            } else {
                s.title.clone()
            };
            (
                format!(
                    "[Result {}]\nTitle: {}\nDescription: {}\nURL: {}",
                    i + 1,
                    s.title,
                    s.snippet,
                    s.url
                ),
                Citation {
                    label,
                    kind: SourceKind::Web,
                },
            )
        })
        .collect()
}

struct Packer {
    text: String,
    citations: Vec<Citation>,
    used: usize,
    budget: usize,
}

impl Packer {
    fn new(budget: usize) -> Self {
        Packer {
            text: String::new(),
            citations: Vec::new(),
            used: 0,
            budget,
        }
    }

    /// Append whole entries until one no longer fits, then stop this block.
    /// The header is charged to the first entry, so a source whose first
    /// entry cannot fit contributes nothing at all.
    fn push_block(&mut self, header: &str, entries: Vec<(String, Citation)>) {
        let mut block_started = false;
        for (entry, citation) in entries {
            let mut addition = String::new();
            if !block_started {
                if !self.text.is_empty() {
                    addition.push_str("\n\n");
                }
                addition.push_str(header);
                addition.push('\n');
            } else {
                addition.push_str("\n\n");
            }
            addition.push_str(&entry);

            let addition_chars = addition.chars().count();
            if self.used + addition_chars > self.budget {
                return;
            }
            self.text.push_str(&addition);
            self.used += addition_chars;
            self.citations.push(citation);
            block_started = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(label: &str, text: &str) -> RetrievalHit {
        RetrievalHit {
            chunk_id: format!("chunk-{label}"),
            source_label: label.to_string(),
            text: text.to_string(),
            score: 0.9,
        }
    }

    fn snippet(title: &str, body: &str) -> WebSnippet {
        WebSnippet {
            title: title.to_string(),
            snippet: body.to_string(),
            url: format!("https://example.org/{title}"),
        }
    }

    #[test]
    fn test_kb_packs_before_web() {
        let ctx = assemble(
            &[hit("colds.txt", "Colds cause coughing.")],
            &[snippet("Flu", "Influenza overview.")],
            10_000,
            AssemblyPolicy::KnowledgeFirst,
        );
        let kb_pos = ctx.text.find(KB_HEADER).unwrap();
        let web_pos = ctx.text.find(WEB_HEADER).unwrap();
        assert!(kb_pos < web_pos);
        assert!(ctx.text.contains("[Source 1]\nColds cause coughing."));
        assert!(ctx.text.contains("[Result 1]\nTitle: Flu"));
        assert_eq!(ctx.citations.len(), 2);
        assert_eq!(ctx.citations[0].kind, SourceKind::KnowledgeBase);
        assert_eq!(ctx.citations[1].kind, SourceKind::Web);
    }

    #[test]
    fn test_web_first_policy_reverses_block_order() {
        let ctx = assemble(
            &[hit("colds.txt", "Colds cause coughing.")],
            &[snippet("Flu", "Influenza overview.")],
            10_000,
            AssemblyPolicy::WebFirst,
        );
        assert!(ctx.text.find(WEB_HEADER).unwrap() < ctx.text.find(KB_HEADER).unwrap());
    }

    #[test]
    fn test_budget_drops_whole_items_never_truncates() {
        let hits = vec![
            hit("a.txt", "short entry"),
            hit("b.txt", &"x".repeat(500)),
        ];
        let snippets = vec![snippet("Tiny", "fits")];
        // Room for the first KB entry and the web block, not for the 500-char entry.
        let ctx = assemble(&hits, &snippets, 160, AssemblyPolicy::KnowledgeFirst);
        assert!(ctx.text.contains("short entry"));
        assert!(!ctx.text.contains("xxxx"));
        assert!(ctx.text.contains("[Result 1]"));
        assert_eq!(ctx.citations.len(), 2);
        assert!(ctx.text.chars().count() <= 160);
    }

    #[test]
    fn test_both_empty_is_explicitly_empty() {
        let ctx = assemble(&[], &[], 1000, AssemblyPolicy::KnowledgeFirst);
        assert!(ctx.is_empty());
        assert!(ctx.citations.is_empty());
    }

    #[test]
    fn test_web_only_block_has_no_kb_header() {
        let ctx = assemble(
            &[],
            &[snippet("Flu", "Influenza overview.")],
            10_000,
            AssemblyPolicy::KnowledgeFirst,
        );
        assert!(!ctx.text.contains(KB_HEADER));
        assert!(ctx.text.starts_with(WEB_HEADER));
    }

    #[test]
    fn test_entries_numbered_within_block() {
        let ctx = assemble(
            &[hit("a.txt", "one"), hit("b.txt", "two")],
            &[snippet("Flu", "three")],
            10_000,
            AssemblyPolicy::KnowledgeFirst,
        );
        assert!(ctx.text.contains("[Source 1]\none"));
        assert!(ctx.text.contains("[Source 2]\ntwo"));
        assert!(ctx.text.contains("[Result 1]"));
        let labels: Vec<&str> = ctx.citations.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["a.txt", "b.txt", "Flu"]);
    }

    #[test]
    fn test_zero_budget_packs_nothing() {
        let ctx = assemble(
            &[hit("a.txt", "one")],
            &[snippet("Flu", "two")],
            0,
            AssemblyPolicy::KnowledgeFirst,
        );
        assert!(ctx.is_empty());
    }
}

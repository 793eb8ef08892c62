//! Blind-review anonymizer: shuffles a set of model responses and strips
//! self-identifying language so a downstream judge cannot tell which engine
//! produced which answer.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// One engine's answer, as fed into the anonymizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub engine_id: String,
    pub content: String,
    #[serde(default)]
    pub token_count: usize,
}

/// Anonymized response handed to a judge. Carries token count only;
/// latency and cost are strong identifying side-channels and are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindedResponse {
    pub blind_id: String,
    pub sanitized_content: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingEntry {
    blind_id: String,
    engine_id: String,
    original_index: usize,
}

/// The only structure that can re-identify a blinded response. Held by the
/// orchestrating caller and never given to a judge; consulted only after a
/// ranking exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindMapping {
    entries: Vec<MappingEntry>,
}

impl BlindMapping {
    /// Recover the engine id behind a blind id.
    pub fn engine_of(&self, blind_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.blind_id == blind_id)
            .map(|entry| entry.engine_id.as_str())
    }

    /// Position of the response in the pre-shuffle input.
    pub fn original_index_of(&self, blind_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| entry.blind_id == blind_id)
            .map(|entry| entry.original_index)
    }

    pub fn blind_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.blind_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of one blinding pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindSession {
    pub session_id: String,
    pub responses: Vec<BlindedResponse>,
    pub mapping: BlindMapping,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlindError {
    #[error("cannot blind an empty response set")]
    Empty,
    #[error("cannot blind more than 26 responses (got {count})")]
    TooMany { count: usize },
}

// Each pattern is replaced by a neutral phrase so the content reads naturally
// without revealing its origin.
static STRIP_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(
                r"(?i)\b(?:ChatGPT|GPT-?4[o0-9.\-]*|GPT-?3(?:\.5)?|OpenAI|Claude(?:\s+\d[\w.]*)?|Anthropic|Gemini|Bard|Copilot|Perplexity|Llama|Meta AI|Mistral|DeepSeek|Grok)\b",
            )
            .expect("provider name pattern"),
            "[AI assistant]",
        ),
        (
            Regex::new(r"(?i)\bAs an AI(?: language)?(?: model| assistant)?,?\s*")
                .expect("as-an-ai pattern"),
            "Generally speaking, ",
        ),
        (
            Regex::new(r"(?i)\bI(?:'m| am) an AI(?: language model| assistant| model)?\b")
                .expect("i-am-an-ai pattern"),
            "This response",
        ),
        (
            Regex::new(
                r"(?i)\bmy (?:training|knowledge) (?:data\s+)?(?:has a\s+)?cut-?off(?:\s+date)?(?:\s+(?:is|of))?(?:\s+[A-Za-z]+\s+\d{4})?",
            )
            .expect("training cutoff pattern"),
            "generally available information",
        ),
    ]
});

/// Replace self-identifying language with neutral phrases.
fn sanitize(content: &str) -> String {
    let mut sanitized = content.to_string();
    for (pattern, replacement) in STRIP_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}

fn blind_id_for(position: usize) -> String {
    let letter = (b'A' + position as u8) as char;
    format!("Response {letter}")
}

/// Shuffle and anonymize a response set with the thread-local RNG.
pub fn blind_responses(responses: &[EngineResponse]) -> Result<BlindSession, BlindError> {
    blind_responses_with(responses, &mut rand::thread_rng())
}

/// Deterministic variant taking the RNG explicitly; the shuffle is an
/// unbiased Fisher–Yates permutation, removing position bias from any
/// downstream judge.
pub fn blind_responses_with<R: Rng>(
    responses: &[EngineResponse],
    rng: &mut R,
) -> Result<BlindSession, BlindError> {
    if responses.is_empty() {
        return Err(BlindError::Empty);
    }
    if responses.len() > 26 {
        return Err(BlindError::TooMany {
            count: responses.len(),
        });
    }

    let mut order: Vec<usize> = (0..responses.len()).collect();
    order.shuffle(rng);

    let mut blinded = Vec::with_capacity(responses.len());
    let mut entries = Vec::with_capacity(responses.len());
    for (position, &original_index) in order.iter().enumerate() {
        let source = &responses[original_index];
        let blind_id = blind_id_for(position);
        blinded.push(BlindedResponse {
            blind_id: blind_id.clone(),
            sanitized_content: sanitize(&source.content),
            token_count: source.token_count,
        });
        entries.push(MappingEntry {
            blind_id,
            engine_id: source.engine_id.clone(),
            original_index,
        });
    }

    let session_id = format!("blind-{:08x}", rng.gen::<u32>());
    debug!(session_id = %session_id, count = blinded.len(), "blinded response set");

    Ok(BlindSession {
        session_id,
        responses: blinded,
        mapping: BlindMapping { entries },
    })
}

/// Recover the engine id behind a blind id once a ranking exists.
pub fn unblind<'m>(mapping: &'m BlindMapping, blind_id: &str) -> Option<&'m str> {
    mapping.engine_of(blind_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn responses() -> Vec<EngineResponse> {
        ["gpt-4o-mini", "claude-sonnet", "gemini-flash-grounded", "mistral-small"]
            .into_iter()
            .enumerate()
            .map(|(i, engine)| EngineResponse {
                engine_id: engine.to_string(),
                content: format!("answer number {i}"),
                token_count: 100 + i,
            })
            .collect()
    }

    #[test]
    fn blinding_is_reversible_and_complete() {
        let input = responses();
        let session = blind_responses_with(&input, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(session.mapping.len(), input.len());
        assert_eq!(session.responses.len(), input.len());

        for blinded in &session.responses {
            let engine = unblind(&session.mapping, &blinded.blind_id).expect("mapping covers id");
            assert!(input.iter().any(|r| r.engine_id == engine));
        }
        // Every engine appears exactly once.
        let mut engines: Vec<_> = session
            .responses
            .iter()
            .map(|b| unblind(&session.mapping, &b.blind_id).unwrap().to_string())
            .collect();
        engines.sort();
        let mut expected: Vec<_> = input.iter().map(|r| r.engine_id.clone()).collect();
        expected.sort();
        assert_eq!(engines, expected);
    }

    #[test]
    fn blind_ids_are_sequential_letters() {
        let session = blind_responses_with(&responses(), &mut StdRng::seed_from_u64(1)).unwrap();
        let ids: Vec<_> = session.responses.iter().map(|b| b.blind_id.clone()).collect();
        assert_eq!(ids, vec!["Response A", "Response B", "Response C", "Response D"]);
    }

    #[test]
    fn shuffle_depends_on_rng_seed() {
        let input = responses();
        let a = blind_responses_with(&input, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = blind_responses_with(&input, &mut StdRng::seed_from_u64(2)).unwrap();
        let order_a: Vec<_> = a
            .responses
            .iter()
            .map(|r| a.mapping.original_index_of(&r.blind_id).unwrap())
            .collect();
        let order_b: Vec<_> = b
            .responses
            .iter()
            .map(|r| b.mapping.original_index_of(&r.blind_id).unwrap())
            .collect();
        // Orders for different seeds exist independently; both must be
        // complete permutations of the input.
        let mut sorted_a = order_a.clone();
        sorted_a.sort_unstable();
        assert_eq!(sorted_a, vec![0, 1, 2, 3]);
        let mut sorted_b = order_b;
        sorted_b.sort_unstable();
        assert_eq!(sorted_b, vec![0, 1, 2, 3]);
    }

    #[test]
    fn provider_names_are_stripped() {
        let input = vec![EngineResponse {
            engine_id: "e1".into(),
            content: "ChatGPT thinks Claude and Gemini are rivals.".into(),
            token_count: 10,
        }];
        let session = blind_responses_with(&input, &mut StdRng::seed_from_u64(3)).unwrap();
        let content = &session.responses[0].sanitized_content;
        assert!(!content.contains("ChatGPT"));
        assert!(!content.contains("Claude"));
        assert!(!content.contains("Gemini"));
        assert!(content.contains("[AI assistant]"));
    }

    #[test]
    fn disclaimers_are_neutralized() {
        let input = vec![EngineResponse {
            engine_id: "e1".into(),
            content: "As an AI language model, I cannot shop. I am an AI assistant after all.".into(),
            token_count: 10,
        }];
        let session = blind_responses_with(&input, &mut StdRng::seed_from_u64(3)).unwrap();
        let content = &session.responses[0].sanitized_content;
        assert!(content.starts_with("Generally speaking,"));
        assert!(content.contains("This response"));
        assert!(!content.to_lowercase().contains("i am an ai"));
    }

    #[test]
    fn training_cutoff_phrases_are_neutralized() {
        let input = vec![EngineResponse {
            engine_id: "e1".into(),
            content: "Based on my training cutoff of January 2025, prices may differ.".into(),
            token_count: 10,
        }];
        let session = blind_responses_with(&input, &mut StdRng::seed_from_u64(3)).unwrap();
        let content = &session.responses[0].sanitized_content;
        assert!(!content.to_lowercase().contains("training cutoff"));
    }

    proptest! {
        #[test]
        fn blinding_round_trips_for_any_response_set(
            count in 1usize..=26,
            seed in 0u64..500,
        ) {
            let input: Vec<EngineResponse> = (0..count)
                .map(|i| EngineResponse {
                    engine_id: format!("engine-{i}"),
                    content: format!("answer {i}"),
                    token_count: i,
                })
                .collect();
            let session =
                blind_responses_with(&input, &mut StdRng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(session.mapping.len(), input.len());

            let mut recovered: Vec<String> = session
                .responses
                .iter()
                .map(|b| unblind(&session.mapping, &b.blind_id).unwrap().to_string())
                .collect();
            recovered.sort();
            let mut expected: Vec<String> =
                input.iter().map(|r| r.engine_id.clone()).collect();
            expected.sort();
            prop_assert_eq!(recovered, expected);
        }
    }

    #[test]
    fn empty_and_oversized_sets_are_rejected() {
        assert_eq!(blind_responses(&[]).unwrap_err(), BlindError::Empty);
        let many: Vec<_> = (0..27)
            .map(|i| EngineResponse {
                engine_id: format!("e{i}"),
                content: String::new(),
                token_count: 0,
            })
            .collect();
        assert_eq!(
            blind_responses(&many).unwrap_err(),
            BlindError::TooMany { count: 27 }
        );
    }
}

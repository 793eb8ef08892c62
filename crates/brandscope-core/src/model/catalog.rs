//! Static model catalog and pre-flight cost estimation.

use super::{ModelDescriptor, PlatformType};

/// Average token assumptions used for pre-flight estimates: a shopping query
/// prompt runs about 500 tokens with instructions, a typical answer about 300.
const EST_PROMPT_TOKENS: f64 = 500.0;
const EST_COMPLETION_TOKENS: f64 = 300.0;

/// Process-wide constant table of supported model backends.
pub const MODEL_CATALOG: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: "gpt-4o-search",
        display_name: "GPT-4o Search",
        platform: PlatformType::Search,
        supports_grounding: true,
        price_in_per_mtok: 2.50,
        price_out_per_mtok: 10.00,
    },
    ModelDescriptor {
        id: "gpt-4o-mini",
        display_name: "GPT-4o mini",
        platform: PlatformType::Chat,
        supports_grounding: false,
        price_in_per_mtok: 0.15,
        price_out_per_mtok: 0.60,
    },
    ModelDescriptor {
        id: "claude-sonnet",
        display_name: "Claude Sonnet",
        platform: PlatformType::Chat,
        supports_grounding: false,
        price_in_per_mtok: 3.00,
        price_out_per_mtok: 15.00,
    },
    ModelDescriptor {
        id: "claude-haiku",
        display_name: "Claude Haiku",
        platform: PlatformType::Chat,
        supports_grounding: false,
        price_in_per_mtok: 0.80,
        price_out_per_mtok: 4.00,
    },
    ModelDescriptor {
        id: "gemini-flash-grounded",
        display_name: "Gemini Flash (grounded)",
        platform: PlatformType::Search,
        supports_grounding: true,
        price_in_per_mtok: 0.30,
        price_out_per_mtok: 2.50,
    },
    ModelDescriptor {
        id: "perplexity-sonar",
        display_name: "Perplexity Sonar",
        platform: PlatformType::Search,
        supports_grounding: true,
        price_in_per_mtok: 1.00,
        price_out_per_mtok: 1.00,
    },
    ModelDescriptor {
        id: "mistral-small",
        display_name: "Mistral Small",
        platform: PlatformType::Chat,
        supports_grounding: false,
        price_in_per_mtok: 0.20,
        price_out_per_mtok: 0.60,
    },
];

/// Look a catalog entry up by id.
pub fn descriptor(id: &str) -> Option<&'static ModelDescriptor> {
    MODEL_CATALOG.iter().find(|descriptor| descriptor.id == id)
}

/// Upper-bound dollar estimate for one call against one model.
pub fn estimate_call_cost(descriptor: &ModelDescriptor) -> f64 {
    EST_PROMPT_TOKENS / 1_000_000.0 * descriptor.price_in_per_mtok
        + EST_COMPLETION_TOKENS / 1_000_000.0 * descriptor.price_out_per_mtok
}

/// Upper-bound dollar estimate for `query_count` queries against each of the
/// given models. Pure arithmetic; used for pre-flight budget gating before
/// any call is made.
pub fn estimate_run_cost<'a>(
    models: impl IntoIterator<Item = &'a ModelDescriptor>,
    query_count: usize,
) -> f64 {
    let per_query: f64 = models.into_iter().map(estimate_call_cost).sum();
    per_query * query_count as f64
}

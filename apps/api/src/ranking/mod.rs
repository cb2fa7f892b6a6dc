// Attribute ranking: four oracle stages, deterministic merge, weighting and colors.
// Every stage call goes through `oracle::ask`, never straight to the HTTP client.

pub mod categorization;
pub mod extraction;
pub mod fallback;
pub mod handlers;
pub mod merge;
pub mod orchestrator;
pub mod prompts;
pub mod refinement;
pub mod relevance;
pub mod stage;
pub mod weighting;

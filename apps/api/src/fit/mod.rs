//! Fit scoring against a candidate narrative: lexical overlap, the hybrid
//! semantic/lexical recompute, and oracle summarization.

pub mod hybrid;
pub mod lexical;
pub mod prompts;
pub mod summary;

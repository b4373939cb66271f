//! Candidate screening: normalization, extraction, scoring, and the
//! concurrent ranking pipeline that ties them together.

pub mod document;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod pipeline;
pub mod prompts;
pub mod scoring;

//! Translation between the three wire protocols and the canonical chat model.
//!
//! Requests are normalized into [`crate::canonical`] types; responses are
//! re-synthesized from provider fragments, either incrementally ([`streaming`]) or
//! all at once ([`response`]). Nothing in here performs I/O.

pub mod anthropic_types;
pub mod errors;
pub mod gemini_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod tools;

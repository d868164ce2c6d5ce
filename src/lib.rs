//! Survey Coder - assigns category codes to free-text survey answers
//!
//! Given a question's raw answers and its codebook, the engine decides whether
//! the question is closed, semi-open or open, groups the text answers into
//! categories with the help of a chat-completion model, reconciles the
//! proposed codes with the codebook and finally maps every original answer to
//! one code.
//!
//! # Guarantees
//! - every unique text answer ends up in exactly one category
//! - codebook categories keep their codes; reserved non-response codes
//!   (55, 66, 77, 88, 98, 99) pass through untouched
//! - codes in the final codebook are unique
//! - one assignment per input answer, in input order

pub mod cache;
pub mod canon;
pub mod classify;
pub mod codebook;
pub mod codes;
pub mod config;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod question;
pub mod resolve;
pub mod service;
pub mod similarity;

pub use classify::{Assignment, MatchTier};
pub use codebook::{Codebook, RESERVED_CODES};
pub use config::{EngineConfig, Thresholds};
pub use error::{CoderError, ErrorKind, Result};
pub use pipeline::{CodingEngine, QuestionInput, QuestionOutcome, Statistics};
pub use question::{QuestionType, RawAnswer};
pub use resolve::CodedGroup;
pub use service::{CompletionRequest, CompletionService, OpenAiService};

//! The Query Classifier (§4.11) and the Response Generator & Parser
//! (§4.13) for the climate-document Query Orchestrator.
//!
//! Both are kept free of any dependency on `copilot-context` or
//! `copilot-conversation`: they take an LLM trait object supplied by the
//! composition root and hand back typed results, so the Retrieval
//! Orchestrator (`copilot-context::retrieval`) can drive them without a
//! circular crate dependency.

pub mod classifier;
pub mod error;
pub mod response;

pub use classifier::{
    Classification, ClassifierLlm, CorpusEntry, LlmClassificationResponse, NoLlmClassifier,
    QueryCategory, QueryClassifier, UtteranceCorpus,
};
pub use error::{NlpError, Result};
pub use response::{
    parse_response, EchoResponseLlm, ParsedResponse, ResponseGenerator, ResponseLlm, TitleExpectation,
};

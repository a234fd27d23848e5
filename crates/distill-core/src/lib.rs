//! # Distill Core
//!
//! The retrieval and distillation pipeline behind Distill: data models,
//! chunking, the dimension-gated vector store, context-enriching search,
//! concurrent learning extraction, and analogy synthesis.
//!
//! This crate contains no sqlx, reqwest, or CLI dependencies. Storage,
//! embedding, and language-model backends plug in through the [`store::Store`],
//! [`embedding::Embedder`], and [`llm::LanguageModel`] traits.
//!
//! ```text
//!  TextSpan ──▶ chunk ──▶ Embedder ──▶ VectorStore ◀── SearchEngine ◀── IsomorphismEngine
//!                                                          │                  │
//!  SourceUnit ──▶ ExtractionOrchestrator ──▶ Learning ─────┘           LanguageModel
//! ```

pub mod chunk;
pub mod embed;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod isomorphism;
pub mod llm;
pub mod models;
pub mod retry;
pub mod search;
pub mod store;
pub mod vector_store;

//! # Distill
//!
//! **Archive conversations, search them semantically, and distill them into
//! learnings.**
//!
//! This crate is the application around `distill-core`: it owns
//! configuration, the SQLite storage adapter, the HTTP embedding and
//! language-model providers, and the `distill` CLI.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌──────────────┐
//! │  import  │──▶│ spans+chunks │──▶│  embed   │──▶│ vector index │
//! │  (JSON)  │   │   (SQLite)   │   │ pending  │   │ search       │
//! └──────────┘   └──────┬───────┘   └──────────┘   └──────┬───────┘
//!                       │                                 │
//!                       ▼                                 ▼
//!                 ┌──────────┐                      ┌──────────┐
//!                 │ extract  │──▶ learnings ──────▶ │ explain  │
//!                 └──────────┘                      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`sqlite_store`] | `Store` implementation over SQLite |
//! | [`http`] | Shared HTTP client and retry policy |
//! | [`embedding`] | OpenAI, Ollama, and fastembed embedders |
//! | [`llm`] | OpenAI and Ollama language models |
//! | [`logging`] | Tracing subscriber setup |
//! | [`progress`] | Extraction progress on stderr |
//! | [`import`] | `distill import` |
//! | [`embed_cmd`] | `distill embed pending` / `rebuild` |
//! | [`search`] | `distill search` |
//! | [`extract`] | `distill extract` |
//! | [`explain`] | `distill explain` |
//! | [`learnings`] | `distill learnings` |
//! | [`stats`] | `distill stats` |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod explain;
pub mod extract;
pub mod http;
pub mod import;
pub mod learnings;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sqlite_store;
pub mod stats;

pub use distill_core::store;

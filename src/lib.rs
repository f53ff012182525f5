//! # NewsRAG
//!
//! Retrieval over syndicated news and the entities mentioned in it.
//!
//! Feeds are normalized into dated XML documents on disk, annotated by a
//! generation model with the named entities they mention, and embedded
//! into two vector indexes: one for document spans, one for entity
//! descriptions. Queries can reference entities by id (`c{n}`), which are
//! expanded to their descriptions before retrieval.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Feeds  │──▶│  Corpus  │──▶│ Annotator │──▶│ Entities │
//! │RSS/Atom│   │ XML docs │   │  (LLM)    │   │ txt files│
//! └────────┘   └────┬─────┘   └───────────┘   └────┬─────┘
//!                   ▼                              ▼
//!              ┌──────────┐                   ┌──────────┐
//!              │ news idx │                   │ wiki idx │
//!              └────┬─────┘                   └────┬─────┘
//!                   └─────────────┬────────────────┘
//!                                 ▼
//!                    search / extend / ask (toolkit)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`feed`] | Feed fetch and RSS/Atom parsing |
//! | [`corpus`] | Document files and idempotent ingestion |
//! | [`loader`] | Recursive corpus loading |
//! | [`chunk`] | Span splitting |
//! | [`annotate`] | Model-generated entity annotations |
//! | [`entities`] | Entity corpus on disk |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Generation provider abstraction |
//! | [`store`] | Vector stores |
//! | [`indexer`] | Index rebuilds |
//! | [`query`] | Entity-token filtering and expansion |
//! | [`retrieve`] | k-NN search rendered as HTML tables |
//! | [`chat`] | Grounded chat with bounded memory |
//! | [`toolkit`] | Composition root |
//! | [`progress`] | Reindex progress on stderr |
//! | [`error`] | Error and skip-reason types |

pub mod annotate;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod feed;
pub mod indexer;
pub mod llm;
pub mod loader;
pub mod models;
pub mod progress;
pub mod query;
pub mod retrieve;
pub mod store;
pub mod toolkit;

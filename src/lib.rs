//! # Course Harness
//!
//! Copies course files from a Canvas LMS into an S3 bucket, picks out each
//! course's syllabus and schedule, builds a dense retrieval index over all
//! of it, and answers questions about the courses from that index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │  Canvas  │──▶│ S3 bucket │──▶│ Classifier │──▶│ Selective │──▶│  Index   │
//! │   API    │   │  (store)  │   │   (LLM)    │   │  parser   │   │ + persist│
//! └──────────┘   └───────────┘   └────────────┘   └───────────┘   └────┬─────┘
//!                                                                      │
//!                                              ┌───────────────────────┤
//!                                              ▼                       ▼
//!                                         ┌──────────┐           ┌──────────┐
//!                                         │   CLI    │           │   HTTP   │
//!                                         │  (chat)  │           │ /answer  │
//!                                         └──────────┘           └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! course ingest                 # Canvas → S3
//! course classify               # show syllabus/schedule picks
//! course index                  # rebuild and persist the index
//! course chat                   # interactive question loop
//! course serve                  # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`models`] | Core data types |
//! | [`connector_canvas`] | Paginated Canvas API client |
//! | [`store`] | Object store trait, S3 and in-memory implementations |
//! | [`ingest`] | Canvas → object store copy |
//! | [`http`] | Retrying JSON POSTs to model services |
//! | [`llm`] | Chat model trait and OpenAI client |
//! | [`classify`] | Syllabus/schedule classification |
//! | [`extract`] | Plain text extraction |
//! | [`parse`] | Layout parser and selective routing |
//! | [`chunk`] | Passage splitting |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`index`] | Retrieval index build, save, open, search |
//! | [`persist`] | Index mirroring with a completion marker |
//! | [`pipeline`] | Rebuild and startup policy |
//! | [`query`] | Question answering |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod classify;
pub mod config;
pub mod connector_canvas;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod parse;
pub mod persist;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod store;

//! docfuse - multimodal document ingestion and hybrid retrieval fusion
//!
//! This crate provides:
//! - Layout-aware extraction of text, tables and images, with session
//!   tracking for every extraction and chunking run
//! - Modality-aware chunking, text and cross-modal embeddings, and
//!   perceptual-hash flagging of near-duplicate images
//! - A fusion engine running vector, keyword and full-text search
//!   concurrently and assembling a token-bounded context
//! - Candidate screening shared by retrieval and prior-art lists

pub mod backend;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod extract;
pub mod fusion;
pub mod index;
pub mod ingest;
pub mod meta;
pub mod models;
pub mod phash;
pub mod progress;
pub mod rerank;
pub mod screen;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};

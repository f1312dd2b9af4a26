#![doc = "zeek-rag-core: core logic library for zeek-rag."]

//! Turns the Zeek reStructuredText manual into Markdown shaped for a RAG knowledge base.
//! The binary crate adds the CLI, configuration loading and the HTTP upload client;
//! everything that works on files lives here.
//!
//! # Usage
//! Add this as a dependency for the conversion, flattening and pipeline code.

pub mod config;
pub mod contract;
pub mod convert;
pub mod download;
pub mod export;
pub mod extensions;
pub mod flatten;
pub mod markdown;
pub mod paths;
pub mod pipeline;
pub mod rst;
pub mod toctree;
pub mod upload;

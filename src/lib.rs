// SPDX-License-Identifier: MIT OR Apache-2.0

//! ctxgrep - Local-first context indexing and hybrid retrieval library
//!
//! Shared modules for the ctxgrep CLI tool.

pub mod cache;
pub mod changes;
pub mod chunker;
pub mod config;
pub mod docs;
pub mod embed;
pub mod errors;
pub mod evidence;
pub mod indexer;
pub mod lexical;
pub mod memory;
pub mod rank;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod symbols;
pub mod utils;
pub mod webimport;

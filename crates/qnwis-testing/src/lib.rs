// Allow unwrap in testing utilities - test code should panic on errors
#![allow(clippy::unwrap_used)]

//! # QNWIS Testing Utilities
//!
//! This crate provides testing utilities for QNWIS services, including:
//!
//! - **MockProvider**: rule-based scripted completion provider
//! - **MockRetriever**: fixed-snippet context retriever
//! - **MemoryEngine**: in-memory data engine with failure injection
//! - **fixtures**: the standard labour-market catalog, tables, and replies
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use qnwis_testing::prelude::*;
//!
//! let provider = Arc::new(MockProvider::new()
//!     .on("routing classifier", classifier_reply("simple")));
//! let (data, audit) = standard_data_client(standard_engine());
//! ```

mod memory_engine;
mod mock_provider;
mod mock_retriever;

pub mod fixtures;

pub use fixtures::{
    classifier_reply, fabricating_agent_reply, standard_catalog, standard_data_client,
    standard_engine, standard_engine_with_latency, verified_agent_reply,
};
pub use memory_engine::MemoryEngine;
pub use mock_provider::MockProvider;
pub use mock_retriever::MockRetriever;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::{
        classifier_reply, fabricating_agent_reply, standard_catalog, standard_data_client,
        standard_engine, standard_engine_with_latency, verified_agent_reply,
    };
    pub use crate::{MemoryEngine, MockProvider, MockRetriever};
}

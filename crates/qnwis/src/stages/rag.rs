//! Context retrieval.
//!
//! The retriever is opaque to the core; a null implementation completes
//! the stage with an empty payload. Retrieval errors degrade to a warning
//! rather than failing the run — context is enrichment, not ground truth.

use crate::error::Result;
use crate::stages::StageContext;
use crate::state::RunState;
use serde_json::{json, Value};

const TOP_K: usize = 5;

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    match ctx.retriever.retrieve(&state.task.question_text, TOP_K).await {
        Ok(snippets) => {
            let payload = json!({
                "snippets": snippets.len(),
                "sources": snippets.iter().map(|s| s.source.clone()).collect::<Vec<_>>(),
            });
            state.context = snippets;
            Ok(payload)
        }
        Err(e) => {
            state.warn(format!("context retrieval failed: {}", e.public_message()));
            Ok(json!({ "snippets": 0 }))
        }
    }
}

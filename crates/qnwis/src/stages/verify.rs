//! Aggregate claim verification.
//!
//! Verifies the run's working narrative (critique output when the debate
//! chain ran, agent narratives otherwise) against every prefetched result.
//! Non-strict failures degrade the briefing with a `verification_failed`
//! warning; strict mode makes them fatal.

use crate::error::{Error, Result};
use crate::stages::StageContext;
use crate::state::RunState;
use crate::verifier::Verifier;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let narrative = state.narrative_to_verify();
    let verifier = Verifier::new(ctx.config.verification.clone());
    let report = verifier.verify(&narrative, &state.prefetched);

    let payload = json!({
        "ok": report.ok,
        "claims_total": report.claims_total,
        "claims_matched": report.claims_matched,
        "issues": report.issues.len(),
    });

    if !report.ok {
        if ctx.config.verification.strict {
            let errors = report.error_count();
            state.verification = Some(report);
            return Err(Error::VerificationFailed(errors));
        }
        state.warn(format!("verification_failed: {}", report.summary()));
    }
    state.verification = Some(report);
    Ok(payload)
}

//! Specialist agents and the harness that runs them.
//!
//! An agent is a prompt charter plus the set of registered queries it may
//! draw on. The harness prefetches those facts, invokes the provider,
//! parses the reply into an [`AgentReport`], and holds the narrative to the
//! facts with the claim verifier — retrying once with the offending claims
//! enumerated before giving up. Agents never query data themselves.

use crate::config::VerificationConfig;
use crate::error::{Error, Result};
use crate::prompts::{self, names};
use crate::providers::CompletionProvider;
use crate::verifier::{VerificationReport, Verifier};
use qnwis_data::{DataClient, QueryResult, RequestContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Static description of a specialist agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Agent name (`economist`, `labour_analyst`, ...)
    pub name: String,
    /// Charter paragraph injected into the agent prompt
    pub charter: String,
    /// Registered queries the agent may use; prefetched before invocation
    pub selectable_query_ids: Vec<String>,
    /// Routing tags matched against intent tags at selection
    pub tags: Vec<String>,
}

/// One citation in an agent report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Query the citation refers to; always one observed by this run
    pub query_id: String,
    /// Free-text note
    #[serde(default)]
    pub note: String,
}

/// Parsed and verified output of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    /// Agent that produced the report
    pub agent_name: String,
    /// The narrative text
    pub narrative: String,
    /// Key findings
    #[serde(default)]
    pub findings: Vec<String>,
    /// Citations, restricted to observed query results
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Self-reported confidence in `[0, 1]`
    pub confidence: f64,
    /// Every query id whose result the agent was shown
    #[serde(default)]
    pub evidence_query_ids: Vec<String>,
    /// Warnings accumulated by the harness
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Verification outcome for the narrative
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

/// The shape agents are asked to reply in.
#[derive(Debug, Deserialize)]
struct RawAgentReply {
    narrative: String,
    #[serde(default)]
    findings: Vec<String>,
    #[serde(default)]
    citations: Vec<Citation>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Catalog of specialist agents.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    specs: Vec<AgentSpec>,
}

impl AgentCatalog {
    /// Build a catalog.
    #[must_use]
    pub fn new(specs: Vec<AgentSpec>) -> Self {
        Self { specs }
    }

    /// All agents.
    #[must_use]
    pub fn specs(&self) -> &[AgentSpec] {
        &self.specs
    }

    /// Look up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AgentSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Agents sharing at least one tag with the intent; the full roster
    /// when nothing matches, so a misconfigured intent still gets analysed.
    #[must_use]
    pub fn select(&self, intent_tags: &[String]) -> Vec<&AgentSpec> {
        let matched: Vec<&AgentSpec> = self
            .specs
            .iter()
            .filter(|spec| spec.tags.iter().any(|t| intent_tags.contains(t)))
            .collect();
        if matched.is_empty() {
            self.specs.iter().collect()
        } else {
            matched
        }
    }

    /// The specialist roster the service ships with.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            AgentSpec {
                name: "economist".to_string(),
                charter: "You analyse macroeconomic effects: growth, productivity, \
                          and labour-cost pressure."
                    .to_string(),
                selectable_query_ids: vec![
                    "unemployment_rate_latest".to_string(),
                    "employment_by_sector".to_string(),
                ],
                tags: vec!["labour".to_string(), "fiscal".to_string()],
            },
            AgentSpec {
                name: "labour_analyst".to_string(),
                charter: "You analyse workforce composition, nationalization targets, \
                          and sector employment shifts."
                    .to_string(),
                selectable_query_ids: vec![
                    "employment_by_sector".to_string(),
                    "qatarization_by_sector".to_string(),
                ],
                tags: vec!["labour".to_string(), "sector".to_string()],
            },
            AgentSpec {
                name: "fiscal_analyst".to_string(),
                charter: "You analyse budget impact, subsidy cost, and program \
                          funding envelopes."
                    .to_string(),
                selectable_query_ids: vec!["employment_by_sector".to_string()],
                tags: vec!["fiscal".to_string(), "strategy".to_string()],
            },
            AgentSpec {
                name: "gcc_benchmark_analyst".to_string(),
                charter: "You compare Qatar's indicators against GCC peers and flag \
                          divergence."
                    .to_string(),
                selectable_query_ids: vec!["gcc_benchmark_rates".to_string()],
                tags: vec!["benchmark".to_string(), "strategy".to_string()],
            },
        ])
    }
}

/// Executes one agent end to end.
pub struct AgentHarness {
    provider: Arc<dyn CompletionProvider>,
    data: Arc<DataClient>,
    verifier: Verifier,
    timeout: Duration,
    max_tokens: u32,
}

impl AgentHarness {
    /// Build a harness.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        data: Arc<DataClient>,
        verification: VerificationConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            data,
            verifier: Verifier::new(verification),
            timeout,
            max_tokens: 1024,
        }
    }

    /// Run one agent against the question and the run's facts.
    ///
    /// `base_facts` are the results prefetched for the intent; the harness
    /// adds the agent's own selectable queries on top (cache-hot when they
    /// overlap). Verification failures retry once, then degrade to warnings
    /// unless strict mode is on.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        spec: &AgentSpec,
        question: &str,
        params: &serde_json::Map<String, Value>,
        base_facts: &[QueryResult],
    ) -> Result<AgentReport> {
        let facts = self.resolve_facts(ctx, spec, params, base_facts).await;
        let evidence_query_ids: Vec<String> =
            facts.iter().map(|f| f.query_id.clone()).collect();

        let mut context = tera::Context::new();
        context.insert("agent_name", &spec.name);
        context.insert("agent_charter", &spec.charter);
        context.insert("question", question);
        context.insert("facts", &prompts::facts_block(&facts));
        let prompt = prompts::render(names::AGENT, &context)?;

        let mut warnings = Vec::new();
        let reply = self.complete(&spec.name, &prompt).await?;
        let mut report = self.parse_reply(spec, &reply, &mut warnings);
        let mut verification = self.verifier.verify(&report.narrative, &facts);

        let retry_on_error = self.verifier.config().require_citation_first
            || self.verifier.config().strict;
        if !verification.ok && retry_on_error {
            let mut retry_context = tera::Context::new();
            retry_context.insert("offending_claims", &verification.offending_claims());
            retry_context.insert("original_prompt", &prompt);
            let retry_prompt = prompts::render(names::AGENT_RETRY, &retry_context)?;

            match self.complete(&spec.name, &retry_prompt).await {
                Ok(retry_reply) => {
                    report = self.parse_reply(spec, &retry_reply, &mut warnings);
                    verification = self.verifier.verify(&report.narrative, &facts);
                }
                Err(e) => warnings.push(format!("retry failed: {}", e.public_message())),
            }
        }

        if !verification.ok {
            if self.verifier.config().strict {
                return Err(Error::VerificationFailed(verification.error_count()));
            }
            warnings.push(format!("verification_failed: {}", verification.summary()));
        }

        // Citation invariant: only observed query ids survive.
        let observed: HashSet<&str> =
            evidence_query_ids.iter().map(String::as_str).collect();
        report.citations.retain(|citation| {
            let keep = observed.contains(citation.query_id.as_str());
            if !keep {
                warnings.push(format!(
                    "dropped citation of unobserved query '{}'",
                    citation.query_id
                ));
            }
            keep
        });

        report.evidence_query_ids = evidence_query_ids;
        report.warnings = warnings;
        report.verification = Some(verification);
        Ok(report)
    }

    /// Prefetch the agent's selectable queries and merge with the run facts.
    async fn resolve_facts(
        &self,
        ctx: &RequestContext,
        spec: &AgentSpec,
        params: &serde_json::Map<String, Value>,
        base_facts: &[QueryResult],
    ) -> Vec<QueryResult> {
        let mut facts: Vec<QueryResult> = base_facts.to_vec();
        let mut have: HashSet<String> =
            facts.iter().map(|f| f.query_id.clone()).collect();

        for query_id in &spec.selectable_query_ids {
            if have.contains(query_id) {
                continue;
            }
            let Ok(def) = self.data.registry().get(query_id) else {
                tracing::warn!(agent = %spec.name, query_id, "selectable query not registered");
                continue;
            };
            let forwarded: serde_json::Map<String, Value> = params
                .iter()
                .filter(|(name, _)| def.parameter(name).is_some())
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            match self.data.execute(ctx, query_id, &forwarded).await {
                Ok(result) => {
                    have.insert(query_id.clone());
                    facts.push(result);
                }
                Err(e) => {
                    tracing::warn!(
                        agent = %spec.name,
                        query_id,
                        error = %e,
                        "agent prefetch failed; continuing with remaining facts"
                    );
                }
            }
        }
        facts
    }

    async fn complete(&self, agent: &str, prompt: &str) -> Result<String> {
        let call = self.provider.complete(prompt, self.max_tokens, None);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(completion)) => Ok(completion.text),
            Ok(Err(e)) => Err(Error::AgentFailure {
                agent: agent.to_string(),
                reason: e.public_message(),
            }),
            Err(_) => Err(Error::AgentFailure {
                agent: agent.to_string(),
                reason: format!("timeout after {}ms", self.timeout.as_millis()),
            }),
        }
    }

    fn parse_reply(
        &self,
        spec: &AgentSpec,
        reply: &str,
        warnings: &mut Vec<String>,
    ) -> AgentReport {
        match extract_json(reply).and_then(|v| serde_json::from_value::<RawAgentReply>(v).ok())
        {
            Some(raw) => AgentReport {
                agent_name: spec.name.clone(),
                narrative: raw.narrative,
                findings: raw.findings,
                citations: raw.citations,
                confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                evidence_query_ids: Vec::new(),
                warnings: Vec::new(),
                verification: None,
            },
            None => {
                warnings.push("reply was not valid JSON; treated as plain narrative".to_string());
                AgentReport {
                    agent_name: spec.name.clone(),
                    narrative: reply.trim().to_string(),
                    findings: Vec::new(),
                    citations: Vec::new(),
                    confidence: 0.5,
                    evidence_query_ids: Vec::new(),
                    warnings: Vec::new(),
                    verification: None,
                }
            }
        }
    }
}

/// Pull a JSON object out of a model reply, tolerating fenced code blocks
/// and surrounding prose.
#[must_use]
pub fn extract_json(text: &str) -> Option<Value> {
    let candidate = if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        after.split("```").next().unwrap_or(after)
    } else if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        after.split("```").next().unwrap_or(after)
    } else {
        text
    };
    let first = candidate.find('{')?;
    let last = candidate.rfind('}')?;
    if last <= first {
        return None;
    }
    serde_json::from_str(&candidate[first..=last]).ok()
}

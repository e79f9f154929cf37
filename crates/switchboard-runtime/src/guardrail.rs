//! Guardrails — validators that can refuse a run's input or output.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use switchboard_core::{AgentError, Result, RunContext};

/// Verdict of an input guardrail.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailVerdict {
    Pass,
    Refuse { reason: String, meta: Value },
}

impl GuardrailVerdict {
    pub fn refuse(reason: impl Into<String>, meta: Value) -> Self {
        Self::Refuse {
            reason: reason.into(),
            meta,
        }
    }
}

/// Verdict of an output guardrail. `Rewrite` replaces the output for the
/// remainder of the pipeline (and, if it survives, for the caller).
#[derive(Debug, Clone, PartialEq)]
pub enum OutputVerdict {
    Pass,
    Rewrite(String),
    Refuse { reason: String, meta: Value },
}

impl OutputVerdict {
    pub fn refuse(reason: impl Into<String>, meta: Value) -> Self {
        Self::Refuse {
            reason: reason.into(),
            meta,
        }
    }
}

/// Validates run input before each model call.
#[async_trait]
pub trait InputGuardrail<C = ()>: Send + Sync {
    fn name(&self) -> &str;

    async fn validate_input(&self, input: &str, context: &RunContext<C>) -> GuardrailVerdict;
}

/// Validates the final text output just before it is returned.
#[async_trait]
pub trait OutputGuardrail<C = ()>: Send + Sync {
    fn name(&self) -> &str;

    async fn validate_output(&self, output: &str, context: &RunContext<C>) -> OutputVerdict;
}

/// Run input guardrails in order; the first refusal aborts.
pub(crate) async fn check_input<C>(
    guardrails: &[Arc<dyn InputGuardrail<C>>],
    input: &str,
    context: &Arc<RunContext<C>>,
) -> Result<()>
where
    C: Send + Sync + 'static,
{
    for guardrail in guardrails {
        let name = guardrail.name().to_string();
        let verdict = {
            let guardrail = Arc::clone(guardrail);
            let context = Arc::clone(context);
            let input = input.to_string();
            tokio::spawn(async move { guardrail.validate_input(&input, &context).await }).await
        };
        match verdict {
            Ok(GuardrailVerdict::Pass) => {}
            Ok(GuardrailVerdict::Refuse { reason, meta }) => {
                warn!(guardrail = %name, %reason, "Input guardrail refused");
                return Err(AgentError::GuardrailTriggered {
                    guardrail: name,
                    reason,
                    meta,
                });
            }
            Err(join_err) => {
                // A panicking validator counts as that validator refusing.
                let reason = join_err.to_string();
                return Err(AgentError::GuardrailTriggered {
                    guardrail: name,
                    reason: reason.clone(),
                    meta: json!({ "exception": reason }),
                });
            }
        }
    }
    Ok(())
}

/// Run output guardrails as an ordered pipeline over `output`; rewrites feed
/// the next stage, the first refusal aborts.
pub(crate) async fn check_output<C>(
    guardrails: &[Arc<dyn OutputGuardrail<C>>],
    output: String,
    context: &Arc<RunContext<C>>,
) -> Result<String>
where
    C: Send + Sync + 'static,
{
    let mut current = output;
    for guardrail in guardrails {
        let name = guardrail.name().to_string();
        let verdict = {
            let guardrail = Arc::clone(guardrail);
            let context = Arc::clone(context);
            let output = current.clone();
            tokio::spawn(async move { guardrail.validate_output(&output, &context).await }).await
        };
        match verdict {
            Ok(OutputVerdict::Pass) => {}
            Ok(OutputVerdict::Rewrite(rewritten)) => current = rewritten,
            Ok(OutputVerdict::Refuse { reason, meta }) => {
                warn!(guardrail = %name, %reason, "Output guardrail refused");
                return Err(AgentError::OutputGuardrailTriggered {
                    guardrail: name,
                    reason,
                    meta,
                    output: current,
                });
            }
            Err(join_err) => {
                let reason = join_err.to_string();
                return Err(AgentError::OutputGuardrailTriggered {
                    guardrail: name,
                    reason: reason.clone(),
                    meta: json!({ "exception": reason }),
                    output: current,
                });
            }
        }
    }
    Ok(current)
}

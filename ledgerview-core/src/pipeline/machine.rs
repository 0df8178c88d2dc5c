//! Pipeline state machine

use super::detectors::{self, Finding};
use super::{
    CONFIDENCE_THRESHOLD, GateName, GateResult, GateVerdict, PipelineReport, PipelineVerdict,
};
use crate::compiler::SourceCompiler;
use crate::config::PipelineConfig;
use crate::oracle::{ConfidenceOracle, Extraction, OracleAdapter, OracleError, Strategy};
use crate::tools::{ErrorKind, EventSink, HandlerContext, LogLevel};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reasoning attempts before degrading to the pattern strategy
const MAX_EXTRACTION_ATTEMPTS: u32 = 2;

/// Time reasoning attempts leave unused so the pattern fallback still answers
/// before the invocation deadline
const FALLBACK_HEADROOM: Duration = Duration::from_millis(500);

/// Errors that abort a pipeline run without a verdict
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// The invocation was cancelled at a suspension point
    #[error("safety analysis cancelled during the {gate} gate")]
    Cancelled { gate: GateName },

    /// Extraction failed with no fallback left
    #[error("{gate} gate failed: {error}")]
    Oracle { gate: GateName, error: OracleError },
}

impl PipelineError {
    /// Error kind for the terminal failure event
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
            PipelineError::Oracle { error, .. } => error.kind(),
        }
    }

    /// Gate the run was in when it stopped
    pub fn gate(&self) -> GateName {
        match self {
            PipelineError::Cancelled { gate } | PipelineError::Oracle { gate, .. } => *gate,
        }
    }

    fn oracle(gate: GateName, error: OracleError) -> Self {
        match error {
            OracleError::Cancelled => PipelineError::Cancelled { gate },
            error => PipelineError::Oracle { gate, error },
        }
    }
}

enum State {
    Compile,
    Pattern,
    AuthExtraction {
        warnings: Vec<Finding>,
    },
    Decision {
        warnings: Vec<Finding>,
        extraction: Extraction,
    },
    Done {
        verdict: PipelineVerdict,
        gate: GateName,
        summary: String,
    },
}

/// Bookkeeping for one run
#[derive(Default)]
struct Run {
    gates: Vec<GateResult>,
    degraded: bool,
}

/// Safety gate pipeline
pub struct SafetyPipeline {
    compiler: Arc<dyn SourceCompiler>,
    oracle: Arc<OracleAdapter>,
    config: PipelineConfig,
}

impl std::fmt::Debug for SafetyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyPipeline")
            .field("oracle", &self.oracle)
            .field("config", &self.config)
            .finish()
    }
}

impl SafetyPipeline {
    /// Create a pipeline over a compiler and an oracle adapter
    pub fn new(
        compiler: Arc<dyn SourceCompiler>,
        oracle: Arc<OracleAdapter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            compiler,
            oracle,
            config,
        }
    }

    /// The oracle adapter
    pub fn oracle(&self) -> &Arc<OracleAdapter> {
        &self.oracle
    }

    /// Run every gate over one source
    ///
    /// Progress and per-gate log events go to `events`. Degraded operation and
    /// compile rejections are recorded on `ctx` for metering.
    pub async fn run(
        &self,
        source: &str,
        ctx: &HandlerContext,
        events: &EventSink,
    ) -> Result<PipelineReport, PipelineError> {
        let mut run = Run::default();
        let mut state = State::Compile;

        loop {
            state = match state {
                State::Compile => self.compile_gate(source, ctx, events, &mut run).await?,
                State::Pattern => self.pattern_gate(source, ctx, events, &mut run).await,
                State::AuthExtraction { warnings } => {
                    self.auth_extraction_gate(source, warnings, ctx, events, &mut run)
                        .await?
                }
                State::Decision {
                    warnings,
                    extraction,
                } => {
                    self.decision_gate(warnings, extraction, ctx, events, &mut run)
                        .await
                }
                State::Done {
                    verdict,
                    gate,
                    summary,
                } => {
                    tracing::info!(
                        tool = %ctx.tool_id(),
                        invocation_id = %ctx.invocation_id(),
                        gate = %gate,
                        verdict = verdict.label(),
                        degraded = run.degraded,
                        "Safety analysis finished"
                    );
                    return Ok(PipelineReport {
                        verdict,
                        gate,
                        summary,
                        gates: run.gates,
                        degraded: run.degraded,
                    });
                }
            };
        }
    }

    async fn compile_gate(
        &self,
        source: &str,
        ctx: &HandlerContext,
        events: &EventSink,
        run: &mut Run,
    ) -> Result<State, PipelineError> {
        let started = enter(GateName::Compile, ctx, events).await;

        let result = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => {
                return Err(PipelineError::Cancelled { gate: GateName::Compile });
            }
            result = self.compiler.compile(source) => result,
        };

        if result.ok {
            finish(run, events, GateName::Compile, GateVerdict::Pass, "pass", result.diagnostics, started).await;
            return Ok(State::Pattern);
        }

        ctx.mark_unsuccessful(ErrorKind::CompileError.as_str());
        let summary = format!(
            "Compile gate rejected the source: {}",
            result.diagnostics.join("; ")
        );
        finish(
            run,
            events,
            GateName::Compile,
            GateVerdict::Fail,
            "fail",
            result.diagnostics.clone(),
            started,
        )
        .await;

        Ok(State::Done {
            verdict: PipelineVerdict::Rejected {
                gate: GateName::Compile,
                diagnostics: result.diagnostics,
            },
            gate: GateName::Compile,
            summary,
        })
    }

    async fn pattern_gate(
        &self,
        source: &str,
        ctx: &HandlerContext,
        events: &EventSink,
        run: &mut Run,
    ) -> State {
        let started = enter(GateName::Pattern, ctx, events).await;

        let findings = detectors::detect(source);
        let verdict = if findings.is_empty() {
            GateVerdict::Pass
        } else {
            GateVerdict::Fail
        };
        let messages = findings.iter().map(|f| f.message.clone()).collect();

        finish(run, events, GateName::Pattern, verdict, verdict.as_str(), messages, started).await;
        State::AuthExtraction { warnings: findings }
    }

    async fn auth_extraction_gate(
        &self,
        source: &str,
        warnings: Vec<Finding>,
        ctx: &HandlerContext,
        events: &EventSink,
        run: &mut Run,
    ) -> Result<State, PipelineError> {
        let gate = GateName::AuthExtraction;
        let started = enter(gate, ctx, events).await;
        let mut messages = Vec::new();

        let oracle = self.oracle.select(ctx.cancellation()).await;
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled { gate });
        }

        let extraction = match self.extract_with_retry(&oracle, source, ctx, &mut messages).await {
            Ok(extraction) => extraction,
            Err(OracleError::Cancelled) => return Err(PipelineError::Cancelled { gate }),
            Err(error) => {
                tracing::warn!(
                    invocation_id = %ctx.invocation_id(),
                    gate = %GateName::AuthExtraction,
                    strategy = %oracle.strategy(),
                    "Extraction failed, degrading to pattern strategy: {}",
                    error
                );
                let note = format!(
                    "{} strategy failed ({}); degraded to pattern strategy",
                    oracle.strategy(),
                    error
                );
                events.log(LogLevel::Warn, note.clone()).await;
                messages.push(note);

                self.oracle
                    .extract(&self.oracle.fallback(), source, ctx.cancellation())
                    .await
                    .map_err(|e| PipelineError::oracle(gate, e))?
            }
        };

        let score = extraction.score;
        if score.strategy == Strategy::Pattern {
            run.degraded = true;
            ctx.mark_degraded();
        }

        let class = match score.strategy {
            Strategy::Pattern if score.meets(CONFIDENCE_THRESHOLD) => "simple",
            Strategy::Pattern => "complex",
            Strategy::Reasoning => "reasoning",
        };
        let verdict = if score.meets(CONFIDENCE_THRESHOLD) {
            GateVerdict::Pass
        } else {
            GateVerdict::Inconclusive
        };
        messages.extend(extraction.rationale.iter().cloned());

        finish(
            run,
            events,
            GateName::AuthExtraction,
            verdict,
            &format!("{}/{}", class, score.value),
            messages,
            started,
        )
        .await;

        Ok(State::Decision {
            warnings,
            extraction,
        })
    }

    /// One attempt plus one retry after a bounded backoff
    ///
    /// Every attempt is bounded by the time left before the deadline, less
    /// [`FALLBACK_HEADROOM`]. A retry is only made when its backoff and a full
    /// attempt still fit in that budget.
    async fn extract_with_retry(
        &self,
        oracle: &ConfidenceOracle,
        source: &str,
        ctx: &HandlerContext,
        messages: &mut Vec<String>,
    ) -> Result<Extraction, OracleError> {
        let budget = || ctx.remaining().saturating_sub(FALLBACK_HEADROOM);
        let mut attempt = 0;
        loop {
            let limit = budget();
            match self
                .oracle
                .extract_within(oracle, source, ctx.cancellation(), limit)
                .await
            {
                Ok(extraction) => return Ok(extraction),
                Err(error) if error.is_retryable() && attempt + 1 < MAX_EXTRACTION_ATTEMPTS => {
                    let delay = self.backoff_delay(attempt);
                    if delay + oracle.attempt_timeout() > budget() {
                        tracing::debug!(
                            invocation_id = %ctx.invocation_id(),
                            gate = %GateName::AuthExtraction,
                            remaining_ms = ctx.remaining().as_millis() as u64,
                            "No time left for another extraction attempt"
                        );
                        return Err(error);
                    }

                    tracing::warn!(
                        invocation_id = %ctx.invocation_id(),
                        gate = %GateName::AuthExtraction,
                        strategy = %oracle.strategy(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Extraction attempt failed, retrying: {}",
                        error
                    );
                    messages.push(format!("attempt {} failed: {}", attempt + 1, error));

                    tokio::select! {
                        biased;
                        _ = ctx.cancellation().cancelled() => return Err(OracleError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Exponential backoff for a 0-indexed retry
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .retry_initial_delay
            .mul_f64(self.config.backoff_multiplier.powi(attempt as i32))
    }

    async fn decision_gate(
        &self,
        warnings: Vec<Finding>,
        extraction: Extraction,
        ctx: &HandlerContext,
        events: &EventSink,
        run: &mut Run,
    ) -> State {
        let started = enter(GateName::Decision, ctx, events).await;
        let score = extraction.score;

        if score.meets(CONFIDENCE_THRESHOLD) {
            let mut summary = format!(
                "Decision gate accepted the source: confidence {} from the {} strategy meets the {} threshold",
                score.value, score.strategy, CONFIDENCE_THRESHOLD
            );
            if !warnings.is_empty() {
                summary.push_str(&format!(
                    "; {} advisory pattern warning(s) attached",
                    warnings.len()
                ));
            }
            finish(
                run,
                events,
                GateName::Decision,
                GateVerdict::Pass,
                "Accepted",
                vec![summary.clone()],
                started,
            )
            .await;

            return State::Done {
                verdict: PipelineVerdict::Accepted {
                    model: extraction.model,
                    confidence: score,
                    warnings,
                },
                gate: GateName::Decision,
                summary,
            };
        }

        let instruction = match score.strategy {
            Strategy::Pattern => "Automated confidence is insufficient: seek an alternate review path, such as human review or re-running with the reasoning strategy enabled",
            Strategy::Reasoning => "Automated confidence is insufficient: seek an alternate review path, such as human review",
        }
        .to_string();
        let summary = format!(
            "AuthExtraction gate could not establish sufficient confidence: the {} strategy scored {}, below the {} threshold ({}). {}",
            score.strategy,
            score.value,
            CONFIDENCE_THRESHOLD,
            extraction.rationale.join("; "),
            instruction
        );
        finish(
            run,
            events,
            GateName::Decision,
            GateVerdict::Inconclusive,
            "Delegated",
            vec![summary.clone()],
            started,
        )
        .await;

        State::Done {
            verdict: PipelineVerdict::Delegated {
                confidence: score,
                instruction,
                reasons: extraction.rationale,
                warnings,
            },
            gate: GateName::AuthExtraction,
            summary,
        }
    }
}

/// Announce a gate and start its clock
async fn enter(gate: GateName, ctx: &HandlerContext, events: &EventSink) -> Instant {
    ctx.enter_stage(format!("the {} gate", gate));
    events
        .progress(gate.step(), GateName::ALL.len() as u32, format!("{} gate", gate))
        .await;
    Instant::now()
}

/// Record a gate result and report it to the caller
async fn finish(
    run: &mut Run,
    events: &EventSink,
    gate: GateName,
    verdict: GateVerdict,
    outcome: &str,
    messages: Vec<String>,
    started: Instant,
) {
    let result = GateResult {
        gate,
        verdict,
        outcome: outcome.to_string(),
        messages,
        elapsed: started.elapsed(),
    };

    tracing::debug!(
        gate = %gate,
        verdict = verdict.as_str(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "Gate finished"
    );

    let level = match verdict {
        GateVerdict::Pass => LogLevel::Info,
        GateVerdict::Fail | GateVerdict::Inconclusive => LogLevel::Warn,
    };
    let mut line = result.label();
    for message in &result.messages {
        line.push_str("\n  ");
        line.push_str(message);
    }
    events.log(level, line).await;

    run.gates.push(result);
}

//! Pipeline Orchestrator
//!
//! Drives one question through the stage machine:
//!
//! ```text
//! Intent -> Clarify ------------------------------------------> Capture
//!        -> Compile -> ExecuteMetrics -> Narrate -------------> Capture
//!                   |                 -> SqlFallback -> Narrate -> Capture
//!                   -> SqlFallback | Narrate
//! ```
//!
//! Each stage is a single transition method that mutates the turn state and
//! names the next stage. Only intent failures and deadline expiry escape as
//! errors; everything downstream degrades toward the advisor narrative.

use crate::catalog::registry::{LensDef, RegistryProvider};
use crate::catalog::schema::SchemaProvider;
use crate::compiler::plan_compiler::{compile_plan, CompileOptions};
use crate::config::{LlmConfig, PipelineConfig};
use crate::error::Result;
use crate::eval::sink::EvalSink;
use crate::execution::executor::{QueryRunner, TenantScope};
use crate::intent::resolver::resolve_intent;
use crate::intent::types::IntentContext;
use crate::llm::adapter::LlmAdapter;
use crate::narrative::empty::build_empty_result_narrative;
use crate::narrative::generator::{generate_advisor_narrative, generate_narrative, NarrativeOptions};
use crate::observability::metrics::PipelineMetrics;
use crate::pipeline::deadline::Deadline;
use crate::pipeline::output::{ExecutionMode, PipelineOutput};
use crate::pipeline::state::{Stage, TurnState};
use crate::privacy::pii::PiiMasker;
use crate::sql_mode::generator::SqlGenerationSettings;
use crate::sql_mode::retry::{retry_sql_generation, SqlFallbackSettings};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Model overrides per stage; `None` uses the adapter default
#[derive(Debug, Clone, Default)]
pub struct ModelSelection {
    pub intent: Option<String>,
    pub sql: Option<String>,
    pub narrative: Option<String>,
}

impl ModelSelection {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            intent: Some(config.intent_model.clone()),
            sql: Some(config.sql_model.clone()),
            narrative: Some(config.narrative_model.clone()),
        }
    }
}

/// Collaborators injected into the pipeline
#[derive(Clone)]
pub struct PipelineDeps {
    pub adapter: Arc<dyn LlmAdapter>,
    pub registry: Arc<dyn RegistryProvider>,
    /// Without a schema provider SQL mode is disabled
    pub schema: Option<Arc<dyn SchemaProvider>>,
    pub runner: Arc<QueryRunner>,
    pub eval_sink: Option<Arc<dyn EvalSink>>,
    pub masker: Option<Arc<dyn PiiMasker>>,
    pub metrics: Arc<PipelineMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub skip_narrative: bool,
    /// Budget for the whole invocation
    pub deadline: Option<Duration>,
    /// Registry domain to scope the catalog to
    pub domain: Option<String>,
}

pub struct Pipeline {
    deps: PipelineDeps,
    config: PipelineConfig,
    models: ModelSelection,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        Self {
            deps,
            config,
            models: ModelSelection::default(),
        }
    }

    pub fn with_models(mut self, models: ModelSelection) -> Self {
        self.models = models;
        self
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.deps.metrics
    }

    fn sql_mode_available(&self) -> bool {
        self.config.sql_mode_enabled && self.deps.schema.is_some()
    }

    /// Answer one question.
    ///
    /// Returns an error only when intent resolution fails or the deadline
    /// expires; in both cases an eval record is still attempted first.
    pub async fn run(
        &self,
        question: &str,
        context: IntentContext,
        options: RunOptions,
    ) -> Result<PipelineOutput> {
        self.deps.metrics.record_invocation();
        info!(
            tenant_id = %context.tenant_id,
            session_id = %context.session_id,
            question_len = question.len(),
            "Pipeline invocation started"
        );

        let mut state = TurnState::new(question, context);
        let driven = match options.deadline {
            Some(budget) => Deadline::after(budget).run(self.drive(&mut state, &options)).await,
            None => self.drive(&mut state, &options).await,
        };

        if let Err(e) = &driven {
            self.deps.metrics.record_error(e.class());
            warn!(error = %e, stages = ?state.trace, "Pipeline invocation failed");
        }

        let turn_id = self
            .capture(&state, driven.as_ref().err().map(|e| e.to_string()))
            .await;

        driven?;
        let total_ms = state.started.elapsed().as_millis() as u64;
        self.deps.metrics.record_stage_latency("total", total_ms);
        info!(
            mode = state.mode.map(|m| m.as_str()).unwrap_or("none"),
            clarification = state.is_clarification(),
            tokens_input = state.tokens_input,
            tokens_output = state.tokens_output,
            total_ms,
            "Pipeline invocation finished"
        );
        Ok(state.into_output(turn_id))
    }

    async fn drive(&self, state: &mut TurnState, options: &RunOptions) -> Result<()> {
        let mut stage = Stage::Intent;
        loop {
            if matches!(stage, Stage::Capture | Stage::Done) {
                return Ok(());
            }
            state.trace.push(stage);
            let started = Instant::now();

            let next = match stage {
                Stage::Intent => self.resolve(state, options).await?,
                Stage::Clarify => self.clarify(state),
                Stage::Compile => self.compile(state),
                Stage::ExecuteMetrics => self.execute_metrics(state).await,
                Stage::SqlFallback => self.sql_fallback(state).await,
                Stage::Narrate => self.narrate(state, options).await,
                Stage::Capture | Stage::Done => Stage::Done,
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            state.stage_timings_ms.insert(stage.as_str().to_string(), elapsed_ms);
            self.deps.metrics.record_stage_latency(stage.as_str(), elapsed_ms);
            debug!(from = stage.as_str(), to = next.as_str(), elapsed_ms, "Stage transition");
            stage = next;
        }
    }

    async fn resolve(&self, state: &mut TurnState, options: &RunOptions) -> Result<Stage> {
        let registry = &self.deps.registry;
        let lens_slug = state.context.lens.clone();
        let (catalog, lens) = tokio::join!(registry.build_catalog(options.domain.as_deref()), async {
            match lens_slug.as_deref() {
                Some(slug) => registry.get_lens(slug).await,
                None => Ok(None),
            }
        });
        let catalog = catalog?;
        state.lens = lens.unwrap_or_else(|e| {
            warn!(error = %e, "Lens lookup failed; continuing without a lens");
            None
        });

        let resolved = resolve_intent(
            &state.question,
            &state.context,
            &catalog,
            state.lens.as_ref(),
            self.deps.adapter.as_ref(),
            self.models.intent.as_deref(),
        )
        .await?;

        state.add_tokens(resolved.tokens_input, resolved.tokens_output);
        let clarify = resolved.is_clarification;
        info!(
            confidence = resolved.confidence,
            clarification = clarify,
            provider = %resolved.provider,
            "Intent resolved"
        );
        state.catalog = Some(catalog);
        state.resolved = Some(resolved);

        Ok(if clarify { Stage::Clarify } else { Stage::Compile })
    }

    fn clarify(&self, _state: &mut TurnState) -> Stage {
        self.deps.metrics.record_clarification();
        Stage::Capture
    }

    fn compile(&self, state: &mut TurnState) -> Stage {
        let plan = state.resolved.as_ref().and_then(|r| r.plan.as_ref());
        let (plan, catalog) = match (plan, state.catalog.as_ref()) {
            (Some(plan), Some(catalog)) => (plan, catalog),
            _ => return Stage::Narrate,
        };

        let options = CompileOptions::new(state.context.tenant_id.clone(), self.config.max_rows);
        match compile_plan(plan, catalog, &options) {
            Ok(compiled) => {
                for metric in &compiled.metric_defs {
                    self.deps.metrics.record_metric_usage(&metric.slug);
                }
                state.warnings.extend(compiled.warnings.iter().cloned());
                state.compiled = Some(compiled);
                Stage::ExecuteMetrics
            }
            Err(e) => {
                warn!(error = %e, "Plan compilation failed");
                self.deps.metrics.record_error(e.class());
                state.compilation_errors.push(e.to_string());
                if self.sql_mode_available() {
                    Stage::SqlFallback
                } else {
                    Stage::Narrate
                }
            }
        }
    }

    async fn execute_metrics(&self, state: &mut TurnState) -> Stage {
        let compiled = match state.compiled.as_ref() {
            Some(compiled) => compiled,
            None => return Stage::Narrate,
        };
        let scope = tenant_scope(&state.context);

        match self.deps.runner.execute_compiled_query(compiled, &scope).await {
            Ok(result) => {
                let empty = result.row_count == 0;
                info!(row_count = result.row_count, truncated = result.truncated, "Metrics query executed");
                state.data = Some(result);
                state.mode = Some(ExecutionMode::Metrics);
                if empty && self.config.fallback_on_empty && self.sql_mode_available() {
                    Stage::SqlFallback
                } else {
                    Stage::Narrate
                }
            }
            Err(e) => {
                warn!(error = %e, "Metrics query failed");
                self.deps.metrics.record_error(e.class());
                state.warnings.push(format!("Metrics query failed: {}", e));
                if self.sql_mode_available() {
                    Stage::SqlFallback
                } else {
                    Stage::Narrate
                }
            }
        }
    }

    async fn sql_fallback(&self, state: &mut TurnState) -> Stage {
        let provider = match self.deps.schema.as_ref() {
            Some(provider) => provider,
            None => return Stage::Narrate,
        };
        self.deps.metrics.record_sql_fallback();

        let schema = match provider.build_schema_catalog().await {
            Ok(schema) => schema,
            Err(e) => {
                warn!(error = %e, "Schema catalog unavailable; skipping SQL mode");
                state.fallback_errors.push(format!("Schema catalog unavailable: {}", e));
                return Stage::Narrate;
            }
        };

        let settings = SqlFallbackSettings {
            max_retries: self.config.sql_max_retries,
            generation: SqlGenerationSettings {
                model: self.models.sql.clone(),
                token_budget: self.config.prompt_token_budget,
                max_rows: self.config.max_rows,
            },
        };
        let scope = tenant_scope(&state.context);
        let outcome = retry_sql_generation(
            &state.question,
            &schema,
            &state.context,
            self.deps.adapter.as_ref(),
            &self.deps.runner,
            &scope,
            &settings,
        )
        .await;
        state.add_tokens(outcome.tokens_input, outcome.tokens_output);
        state.fallback_errors.extend(outcome.errors());

        match outcome.rows() {
            Some(result) => {
                info!(
                    row_count = result.row_count,
                    attempts = outcome.attempts.len(),
                    "SQL mode produced data"
                );
                state.data = Some(result.clone());
                state.mode = Some(ExecutionMode::Sql);
                state.fallback_sql = outcome.sql.clone();
            }
            None => {
                info!(attempts = outcome.attempts.len(), "SQL mode produced no rows");
                if outcome.result.is_some() {
                    state.fallback_errors.push("SQL mode returned no rows".to_string());
                }
            }
        }
        Stage::Narrate
    }

    async fn narrate(&self, state: &mut TurnState, options: &RunOptions) -> Stage {
        if options.skip_narrative {
            return Stage::Capture;
        }

        let narrative_options = NarrativeOptions {
            model: self.models.narrative.clone(),
            max_rows: self.config.narrative_max_rows,
            token_budget: self.config.prompt_token_budget,
            lens: state.lens.clone(),
            masker: if self.config.mask_pii {
                self.deps.masker.clone()
            } else {
                None
            },
            notes: state.warnings.clone(),
        };
        let plan = state.resolved.as_ref().and_then(|r| r.plan.as_ref());
        let adapter = self.deps.adapter.as_ref();
        let mut issues: Vec<String> = state
            .compilation_errors
            .iter()
            .chain(state.fallback_errors.iter())
            .cloned()
            .collect();

        let narrative = match state.data.as_ref() {
            Some(data) if data.row_count > 0 => {
                match generate_narrative(data, plan, &state.question, &state.context, adapter, &narrative_options).await {
                    Ok(narrative) => narrative,
                    Err(e) => {
                        warn!(error = %e, "Narrative generation failed; using the fallback template");
                        issues.push(format!("Narrative generation failed: {}", e));
                        build_empty_result_narrative(&state.question, plan, &issues)
                    }
                }
            }
            Some(_) => build_empty_result_narrative(&state.question, plan, &state.fallback_errors),
            None => {
                match generate_advisor_narrative(
                    &state.question,
                    plan,
                    &issues,
                    &state.context,
                    adapter,
                    &narrative_options,
                )
                .await
                {
                    Ok(narrative) => narrative,
                    Err(e) => {
                        warn!(error = %e, "Advisor narrative failed; using the fallback template");
                        issues.push(format!("Narrative generation failed: {}", e));
                        build_empty_result_narrative(&state.question, plan, &issues)
                    }
                }
            }
        };

        state.add_tokens(narrative.tokens_input, narrative.tokens_output);
        state.narrative = Some(narrative);
        Stage::Capture
    }

    /// Best-effort eval capture bounded by its own timeout
    async fn capture(&self, state: &TurnState, error: Option<String>) -> Option<String> {
        if let Some(mode) = state.mode {
            self.deps.metrics.record_mode(mode.as_str());
        }
        let sink = self.deps.eval_sink.as_ref()?;
        let record = state.to_turn_record(error);

        match tokio::time::timeout(self.config.eval_timeout(), sink.record_turn(&record)).await {
            Ok(Ok(turn_id)) => Some(turn_id),
            Ok(Err(e)) => {
                warn!(error = %e, "Eval capture failed");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.config.eval_timeout_ms, "Eval capture timed out");
                None
            }
        }
    }
}

fn tenant_scope(context: &IntentContext) -> TenantScope {
    TenantScope {
        tenant_id: context.tenant_id.clone(),
        user_id: context.user_id.clone(),
        role: context.role.clone(),
    }
}

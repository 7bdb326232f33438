//! The interrogation engine.
//!
//! Every step resolves its own table, so a remote connection is never shared
//! between steps. Steps run through an order-preserving buffered stream:
//! with `max_concurrency = 1` this is plain sequential evaluation, with more
//! it overlaps independent steps while results still come back in plan
//! order.

use super::{Agent, InterrogationReport, StepResult, ValidationStep};
use crate::log_step;
use crate::predicate::Predicate;
use crate::prelude::*;
use crate::sources::{resolve, ResolvedTable, RowCounts};
use crate::telemetry::{utils, TermSpan};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, instrument, warn, Instrument};

#[instrument(skip_all, fields(
    agent.name = %agent.name(),
    agent.steps = agent.steps().len(),
    agent.max_concurrency = agent.config().max_concurrency
))]
pub(crate) async fn run(agent: &Agent) -> InterrogationReport {
    info!(
        agent.name = %agent.name(),
        agent.steps = agent.steps().len(),
        "Starting interrogation"
    );
    let start = Instant::now();
    let mut run_span = match agent.telemetry() {
        Some(telemetry) => telemetry.start_interrogation_span(agent.name(), agent.steps().len()),
        None => TermSpan::noop(),
    };

    let results: Vec<StepResult> = stream::iter(agent.steps().iter().cloned())
        .map(|step| {
            let span = info_span!(
                "step",
                step.index = step.index(),
                step.assertion = %step.assertion_type()
            );
            evaluate_step(agent, step).instrument(span)
        })
        .buffered(agent.config().max_concurrency.max(1))
        .collect()
        .await;

    let report = InterrogationReport::new(
        agent.name(),
        results,
        start.elapsed().as_millis() as u64,
    );

    run_span.set_i64("interrogation.errored", report.errored().len() as i64);
    run_span.set_str("interrogation.max_severity", report.max_severity().as_str());
    info!(
        agent.name = %agent.name(),
        result.all_passed = report.all_passed(),
        result.max_severity = %report.max_severity().as_str(),
        result.errored = report.errored().len(),
        duration_ms = report.duration_ms,
        "Interrogation completed"
    );
    report
}

async fn evaluate_step(agent: &Agent, step: Arc<ValidationStep>) -> StepResult {
    if !step.is_active() {
        log_step!(agent.config().log, step.index = step.index(), "Skipping inactive step");
        return StepResult::inactive(&step);
    }

    let start = Instant::now();
    let mut span = match agent.telemetry() {
        Some(telemetry) => telemetry.start_step_span(step.index(), step.assertion_type().as_str()),
        None => TermSpan::noop(),
    };

    let result = match count_rows(agent, &step).await {
        Ok(counts) => {
            let severity = step
                .thresholds()
                .copied()
                .unwrap_or_default()
                .evaluate(counts.n_evaluated, counts.n_failed);
            log_step!(
                agent.config().log,
                step.index = step.index(),
                result.n_evaluated = counts.n_evaluated,
                result.n_failed = counts.n_failed,
                result.severity = severity.as_str(),
                "Step evaluated"
            );
            StepResult::evaluated(&step, counts, severity, start.elapsed().as_millis() as u64)
        }
        Err(e) => {
            span.record_error(&e);
            warn!(
                step.index = step.index(),
                step.assertion = %step.assertion_type(),
                data_source.type = step.data_source().source_type(),
                error.kind = e.kind().as_str(),
                error = %e,
                "Step could not be evaluated"
            );
            StepResult::errored(&step, &e, start.elapsed().as_millis() as u64)
        }
    };

    utils::record_step_result(&mut span, &result);
    result
}

/// Resolves the step's table, counts, and releases the table on every path.
async fn count_rows(agent: &Agent, step: &ValidationStep) -> Result<RowCounts> {
    let source = step.data_source();
    let mut table = {
        let _span = match agent.telemetry() {
            Some(telemetry) => telemetry.start_datasource_span(source.source_type(), &source.label()),
            None => TermSpan::noop(),
        };
        resolve(source, agent.registry(), agent.config(), agent.connector()).await?
    };

    let outcome = evaluate_on(&mut table, step.predicate(), agent).await;
    let label = table.label().to_string();
    if let Err(e) = table.release().await {
        warn!(data_source.label = %label, error = %e, "Failed to release resolved table");
    }
    outcome
}

async fn evaluate_on(
    table: &mut ResolvedTable,
    predicate: &Predicate,
    agent: &Agent,
) -> Result<RowCounts> {
    table.check_predicate(predicate)?;
    table.apply_precondition(predicate)?;
    table.count(predicate, agent.config()).await
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;

use pipecheck_core::pipeline::Pipeline;
use pipecheck_core::report::{Report, Reporter, Severity};
use pipecheck_core::scenario::{Scenario, ScenarioEvent};

use crate::output::{print_json, print_table};
use crate::reporting::PrintReporter;
use crate::sim::SimPipeline;

#[derive(Serialize)]
struct ActionResult {
    seq: u64,
    action: String,
    name: Option<String>,
    state: String,
    duration_ms: Option<u128>,
}

#[derive(Serialize)]
struct RunSummary {
    scenario: Option<String>,
    finished: bool,
    simulated_secs: f64,
    actions: Vec<ActionResult>,
    issues: Vec<Report>,
}

pub fn run(
    path: &Path,
    media_duration: f64,
    sinks: usize,
    max_run_time: f64,
    json: bool,
) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;

    let pipeline = SimPipeline::new(media_duration, sinks);
    let reporter = Arc::new(PrintReporter::new());
    let mut scenario = Scenario::from_source(
        pipeline.clone() as Arc<dyn Pipeline>,
        reporter.clone() as Arc<dyn Reporter>,
        &source,
    )
    .with_context(|| format!("loading scenario {}", path.display()))?;

    let events = scenario
        .take_events()
        .context("scenario event stream already taken")?;
    let handle = scenario.handle();
    scenario.attach()?;

    let step =
        Duration::from_millis(scenario.config().action_execution_interval.max(1)).as_secs_f64();
    let mut simulated = 0.0_f64;
    let mut finished = false;
    let mut actions = Vec::new();

    while !finished {
        for message in pipeline.drain() {
            handle.post_message(message);
        }
        scenario.tick();
        while let Ok(event) = events.try_recv() {
            match event {
                ScenarioEvent::ActionDone { action, duration } => {
                    actions.push(ActionResult {
                        seq: action.seq,
                        action: action.type_name,
                        name: action.name,
                        state: format!("{:?}", action.state).to_lowercase(),
                        duration_ms: duration.map(|d| d.as_millis()),
                    });
                }
                ScenarioEvent::Done => finished = true,
            }
        }
        if finished {
            break;
        }
        if simulated >= max_run_time {
            break;
        }
        pipeline.advance(step);
        simulated += step;
        // Wait actions with a duration elapse on the wall clock; give
        // them real time to do so instead of spinning.
        std::thread::sleep(Duration::from_millis(1));
    }

    if !finished {
        scenario.teardown();
        bail!("scenario still running after {max_run_time}s of simulated time");
    }

    let issues = reporter.reports();
    let summary = RunSummary {
        scenario: scenario.config().name.clone(),
        finished,
        simulated_secs: simulated,
        actions,
        issues,
    };

    if json {
        print_json(&summary)?;
    } else {
        print_table(
            &["SEQ", "ACTION", "NAME", "STATE"],
            summary
                .actions
                .iter()
                .map(|a| {
                    vec![
                        a.seq.to_string(),
                        a.action.clone(),
                        a.name.clone().unwrap_or_default(),
                        a.state.clone(),
                    ]
                })
                .collect(),
        );
        if summary.issues.is_empty() {
            println!("\nscenario finished, no issues");
        } else {
            println!("\n{} issue(s):", summary.issues.len());
            for issue in &summary.issues {
                println!("  [{:?}] {}: {}", issue.severity, issue.issue, issue.message);
            }
        }
    }

    if reporter.worst_severity() == Some(Severity::Critical) {
        bail!("scenario failed");
    }
    Ok(())
}

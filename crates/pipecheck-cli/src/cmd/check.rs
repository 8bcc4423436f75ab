use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use pipecheck_core::action::ActionSnapshot;
use pipecheck_core::config::ScenarioConfig;
use pipecheck_core::pipeline::Pipeline;
use pipecheck_core::report::{CollectingReporter, Reporter};
use pipecheck_core::scenario::Scenario;

use crate::output::{print_json, print_table};
use crate::sim::SimPipeline;

#[derive(Serialize)]
struct CheckSummary {
    config: ScenarioConfig,
    actions: Vec<ActionSnapshot>,
}

/// Load the scenario against a throwaway simulated pipeline. Every
/// structural fault surfaces here, without executing anything.
pub fn run(path: &Path, json: bool) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;

    let pipeline = SimPipeline::new(60.0, 1);
    let reporter = Arc::new(CollectingReporter::new());
    let scenario = Scenario::from_source(
        pipeline as Arc<dyn Pipeline>,
        reporter as Arc<dyn Reporter>,
        &source,
    )
    .with_context(|| format!("loading scenario {}", path.display()))?;

    let summary = CheckSummary {
        config: scenario.config().clone(),
        actions: scenario.pending_actions(),
    };

    if json {
        print_json(&summary)?;
    } else {
        if let Some(name) = &summary.config.name {
            println!("scenario: {name}");
        }
        if let Some(text) = &summary.config.summary {
            println!("{text}");
        }
        print_table(
            &["SEQ", "ACTION", "NAME", "OPTIONAL"],
            summary
                .actions
                .iter()
                .map(|a| {
                    vec![
                        a.seq.to_string(),
                        a.type_name.clone(),
                        a.name.clone().unwrap_or_default(),
                        if a.optional { "yes" } else { "" }.to_string(),
                    ]
                })
                .collect(),
        );
        println!("\n{} action(s), scenario is valid", summary.actions.len());
    }
    Ok(())
}

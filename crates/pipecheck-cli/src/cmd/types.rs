use anyhow::bail;
use serde_json::json;

use pipecheck_core::registry;

use crate::output::{print_json, print_table};

pub fn run(name: Option<&str>, json: bool) -> anyhow::Result<()> {
    registry::init()?;
    match name {
        Some(name) => describe(name, json),
        None => list(json),
    }
}

fn list(json: bool) -> anyhow::Result<()> {
    let mut types = registry::list()?;
    types.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        let entries: Vec<_> = types
            .iter()
            .map(|ty| {
                json!({
                    "name": ty.name,
                    "implementer": ty.implementer_namespace,
                    "description": ty.description,
                })
            })
            .collect();
        print_json(&entries)?;
    } else {
        print_table(
            &["NAME", "IMPLEMENTER", "DESCRIPTION"],
            types
                .iter()
                .map(|ty| {
                    vec![
                        ty.name.clone(),
                        ty.implementer_namespace.clone(),
                        ty.description.clone(),
                    ]
                })
                .collect(),
        );
    }
    Ok(())
}

fn describe(name: &str, json: bool) -> anyhow::Result<()> {
    let Some(ty) = registry::lookup(name)? else {
        bail!("no action type named '{name}'");
    };

    if json {
        let parameters: Vec<_> = ty
            .parameters
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "description": p.description,
                    "mandatory": p.mandatory,
                    "is_time": p.is_time,
                })
            })
            .collect();
        print_json(&json!({
            "name": ty.name,
            "implementer": ty.implementer_namespace,
            "description": ty.description,
            "parameters": parameters,
            "overrides": ty.overridden.as_ref().map(|o| o.implementer_namespace.clone()),
        }))?;
    } else {
        println!("{} ({})", ty.name, ty.implementer_namespace);
        println!("  {}", ty.description);
        if let Some(overridden) = &ty.overridden {
            println!(
                "  overrides the '{}' implementation",
                overridden.implementer_namespace
            );
        }
        if !ty.parameters.is_empty() {
            println!("\nparameters:");
            for p in &ty.parameters {
                let mut notes = Vec::new();
                if p.mandatory {
                    notes.push("mandatory");
                }
                if p.is_time {
                    notes.push("time");
                }
                let notes = if notes.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", notes.join(", "))
                };
                println!("  {}{notes}: {}", p.name, p.description);
            }
        }
    }
    Ok(())
}

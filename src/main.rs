// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::{bail, Context, Result};
use std::env;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gridpub::backends::StepCatalog;
use gridpub::config::load_config;
use gridpub::engine::{Engine, EngineReport, NodeOutcome};
use gridpub::observability::init_tracing;
use gridpub::workflow::{resolve, Workflow};

const USAGE: &str = "Usage: gridpub <run|resolve|steps> <config.yaml>";

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("{}", USAGE);
        eprintln!("Example: gridpub run configs/file-publish.yaml");
        return ExitCode::FAILURE;
    }

    let result = match args[1].as_str() {
        "run" => run(&args[2]).await,
        "resolve" => resolve_only(&args[2]).await,
        "steps" => list_steps(&args[2]).await,
        other => Err(anyhow::anyhow!("unknown command '{}'\n{}", other, USAGE)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn build(config_file: &str) -> Result<(gridpub::config::Config, StepCatalog, Workflow)> {
    let config = load_config(config_file)?;
    let catalog = StepCatalog::from_config(&config)
        .await
        .context("building step catalog")?;
    let workflow = resolve(&config.workflow.name, &config.workflow.nodes, catalog.registry())?;
    Ok((config, catalog, workflow))
}

async fn run(config_file: &str) -> Result<()> {
    let (config, catalog, workflow) = build(config_file).await?;
    let engine = Engine::new(workflow, catalog.steps(), config.engine.clone())?;

    // The CLI feeds no documents of its own; root steps start with input closed.
    let (_, input) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let report = engine.run(input, cancel).await?;
    print_report(&report);
    Ok(())
}

async fn resolve_only(config_file: &str) -> Result<()> {
    let (_, _, workflow) = build(config_file).await?;
    if workflow.is_empty() {
        bail!("workflow '{}' has no nodes", workflow.name);
    }

    println!("📋 Workflow: {} ({} nodes)", workflow.name, workflow.len());
    for node in workflow.nodes() {
        let origin = if node.inferred { " (inferred)" } else { "" };
        println!("  {} [{}]{}", node.id, node.step(), origin);
        for (doc_type, consumers) in &node.outputs {
            let targets = if consumers.is_empty() {
                "(no consumers)".to_string()
            } else {
                consumers.join(", ")
            };
            println!("     {} → {}", doc_type, targets);
        }
    }
    Ok(())
}

async fn list_steps(config_file: &str) -> Result<()> {
    let config = load_config(config_file)?;
    let catalog = StepCatalog::from_config(&config).await?;

    println!("🔧 {} step(s)", catalog.registry().len());
    for contract in catalog.registry().iter() {
        let origin = catalog.registry().origin_of(&contract.name).unwrap_or("?");
        println!("  {} ({}, time_out {}s)", contract.name, origin, contract.time_out);
        if !contract.description.is_empty() {
            println!("     {}", contract.description);
        }
        let requires: Vec<&str> = contract.required_types.iter().map(String::as_str).collect();
        let produces: Vec<&str> = contract.produced_types.iter().map(String::as_str).collect();
        println!("     requires: [{}]", requires.join(", "));
        println!("     produces: [{}]", produces.join(", "));
    }
    Ok(())
}

fn print_report(report: &EngineReport) {
    println!("\n📊 Workflow '{}' finished in {:?}", report.workflow, report.duration);
    println!(
        "   completed {}, timed out {}, failed {}",
        report.count(NodeOutcome::Completed),
        report.count(NodeOutcome::TimedOut),
        report.count(NodeOutcome::Failed)
    );
    for node in &report.nodes {
        let mark = if node.is_success() { "✅" } else { "❌" };
        print!(
            "  {} {} [{}] in={} out={} {:?}",
            mark, node.node_id, node.step, node.inputs, node.outputs, node.duration
        );
        match &node.cause {
            Some(cause) => println!(" ({})", cause),
            None => println!(),
        }
    }
}

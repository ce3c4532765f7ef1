// Agify command - estimate ages for a batch of names concurrently

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parallel::{Controller, ControllerConfig};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::client::{AgifyClient, Estimate};
use crate::output::{print_table_header, print_table_row, OutputFormat};

/// Outcome of a batch of lookups
#[derive(Debug, Default, Serialize)]
pub struct AgifyReport {
    pub estimates: Vec<Estimate>,
    pub failures: Vec<String>,
}

/// Run every lookup through a controller and collect the outcomes.
///
/// Estimates are sorted by age, then by name; names without an age sort last.
pub async fn lookup_all(
    client: Arc<AgifyClient>,
    names: Vec<String>,
    config: ControllerConfig,
) -> Result<AgifyReport> {
    let controller = Controller::with_config(
        move |name: String| {
            let client = Arc::clone(&client);
            async move { client.lookup(&name).await }
        },
        config,
    )
    .context("Failed to start lookup controller")?;

    let report = Arc::new(Mutex::new(AgifyReport::default()));

    let sink = Arc::clone(&report);
    controller.on_result(move |estimate| sink.lock().estimates.push(estimate));
    let sink = Arc::clone(&report);
    controller.on_error(move |err| sink.lock().failures.push(err.to_string()));

    info!(names = names.len(), concurrency = controller.config().concurrency, "Looking up names");
    for name in names {
        controller.call(name).await;
    }
    controller.wait().await;

    let mut report = std::mem::take(&mut *report.lock());
    report.estimates.sort_by(|a, b| {
        let age = |e: &Estimate| e.age.unwrap_or(u32::MAX);
        age(a).cmp(&age(b)).then_with(|| a.name.cmp(&b.name))
    });
    report.failures.sort();
    Ok(report)
}

pub async fn run(
    client: AgifyClient,
    output: OutputFormat,
    quiet: bool,
    names: Vec<String>,
    config: ControllerConfig,
) -> Result<()> {
    if names.is_empty() {
        bail!("No names given");
    }
    let total = names.len();

    let report = lookup_all(Arc::new(client), names, config).await?;

    if output.is_text() {
        if !report.estimates.is_empty() {
            if !quiet {
                print_table_header(&[("NAME", 20), ("AGE", 5), ("SAMPLES", 10)]);
            }
            for estimate in &report.estimates {
                let age = estimate
                    .age
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string());
                print_table_row(&[
                    (&estimate.name, 20),
                    (&age, 5),
                    (&estimate.count.to_string(), 10),
                ]);
            }
        }
        for failure in &report.failures {
            eprintln!("error: {}", failure);
        }
    } else {
        output.print_value(&report)?;
    }

    if !report.failures.is_empty() {
        bail!("{} of {} lookups failed", report.failures.len(), total);
    }
    Ok(())
}

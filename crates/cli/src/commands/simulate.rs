// Simulate command - synthetic load through a controller

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parallel::{Controller, ControllerConfig};
use serde::Serialize;
use thiserror::Error;

use crate::output::{print_field, OutputFormat};

/// Failure injected by the synthetic operation
#[derive(Debug, Error)]
#[error("simulated failure for input {0}")]
pub struct SimulatedFailure(pub u64);

/// Parameters of a simulated run
#[derive(Debug, Clone, Copy)]
pub struct SimulateParams {
    pub inputs: u64,
    pub delay: Duration,
    /// Every Nth input fails; 0 disables failures
    pub fail_every: u64,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub inputs: u64,
    pub concurrency: usize,
    pub results: u64,
    pub errors: u64,
    pub peak_concurrency: usize,
    pub elapsed_ms: u128,
}

pub async fn simulate(params: SimulateParams, config: ControllerConfig) -> Result<SimulationReport> {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let concurrency = config.concurrency;

    let operation = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        move |n: u64| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(params.delay).await;
                active.fetch_sub(1, Ordering::SeqCst);

                if params.fail_every > 0 && (n + 1) % params.fail_every == 0 {
                    Err(SimulatedFailure(n))
                } else {
                    Ok(n)
                }
            }
        }
    };

    let controller = Controller::with_config(operation, config)
        .context("Failed to start simulation controller")?;
    controller.on_error(|err| tracing::debug!("{}", err));

    let started = Instant::now();
    for n in 0..params.inputs {
        controller.call(n).await;
    }
    controller.wait().await;
    let elapsed = started.elapsed();

    let stats = controller.stats();
    Ok(SimulationReport {
        inputs: params.inputs,
        concurrency,
        results: stats.results,
        errors: stats.errors,
        peak_concurrency: peak.load(Ordering::SeqCst),
        elapsed_ms: elapsed.as_millis(),
    })
}

pub async fn run(
    output: OutputFormat,
    params: SimulateParams,
    config: ControllerConfig,
) -> Result<()> {
    let report = simulate(params, config).await?;

    if output.is_text() {
        print_field("Inputs", &report.inputs.to_string());
        print_field("Concurrency", &report.concurrency.to_string());
        print_field("Results", &report.results.to_string());
        print_field("Errors", &report.errors.to_string());
        print_field("Peak concurrency", &report.peak_concurrency.to_string());
        print_field("Elapsed", &format!("{} ms", report.elapsed_ms));
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulation_counts_and_bounds() {
        let params = SimulateParams {
            inputs: 30,
            delay: Duration::from_millis(1),
            fail_every: 5,
        };
        let report = simulate(params, ControllerConfig::new(4)).await.unwrap();

        assert_eq!(report.results, 24);
        assert_eq!(report.errors, 6);
        assert!(report.peak_concurrency <= 4);
        assert!(report.peak_concurrency >= 1);
    }

    #[tokio::test]
    async fn test_simulation_without_failures() {
        let params = SimulateParams {
            inputs: 10,
            delay: Duration::ZERO,
            fail_every: 0,
        };
        let report = simulate(params, ControllerConfig::new(2)).await.unwrap();
        assert_eq!(report.results, 10);
        assert_eq!(report.errors, 0);
    }
}

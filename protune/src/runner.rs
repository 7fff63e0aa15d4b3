use crate::{
    asset::Asset,
    pipeline::{Pipeline, Processed},
    transport::{LicenseTransport, StatusError},
};
use anyhow::{Result, anyhow};
use log::{error, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;

/// Outcome of one asset after all its attempts.
#[derive(Debug)]
pub struct AssetReport {
    pub name: String,
    pub attempts: u8,
    pub result: Result<Processed>,
}

impl AssetReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Process every asset, at most `max_concurrency` at a time.
///
/// Failures stay with their asset: siblings keep running and every asset gets
/// a report, in the order the assets were given.
pub async fn run_assets<T: LicenseTransport>(
    pipeline: Arc<Pipeline<T>>,
    assets: Vec<Asset>,
) -> Vec<AssetReport> {
    let max_concurrency = pipeline.config().max_concurrency.max(1);
    let names = assets.iter().map(|x| x.name.clone()).collect::<Vec<_>>();
    let mut reports = names.iter().map(|_| None).collect::<Vec<Option<AssetReport>>>();
    let mut set = JoinSet::new();

    for (index, asset) in assets.into_iter().enumerate() {
        while set.len() >= max_concurrency {
            collect(set.join_next().await, &mut reports);
        }

        let pipeline = pipeline.clone();
        set.spawn(async move { (index, process_with_retry(&pipeline, asset).await) });
    }

    while let Some(res) = set.join_next().await {
        collect(Some(res), &mut reports);
    }

    let reports = reports
        .into_iter()
        .zip(names)
        .map(|(report, name)| {
            report.unwrap_or_else(|| AssetReport {
                name,
                attempts: 0,
                result: Err(anyhow!("processing task did not finish")),
            })
        })
        .collect::<Vec<_>>();

    let failed = reports.iter().filter(|x| !x.is_ok()).count();
    info!(
        "Processed {} asset(s), {} failed",
        reports.len(),
        failed
    );
    reports
}

fn collect(
    res: Option<Result<(usize, AssetReport), tokio::task::JoinError>>,
    reports: &mut [Option<AssetReport>],
) {
    match res {
        Some(Ok((index, report))) => reports[index] = Some(report),
        Some(Err(e)) => error!("processing task failed: {}", e),
        None => (),
    }
}

/// Run the pipeline for `asset`, retrying failures that may go away with an
/// exponentially growing delay.
pub async fn process_with_retry<T: LicenseTransport>(
    pipeline: &Pipeline<T>,
    asset: Asset,
) -> AssetReport {
    let config = pipeline.config();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = pipeline.process(&asset).await;

        match result {
            Err(e) if attempts <= config.max_retries && attempts < u8::MAX && is_retryable(&e) => {
                let delay = config
                    .retry_backoff_ms
                    .saturating_mul(1 << (attempts - 1).min(16));
                warn!(
                    "{} failed (attempt {} of {}), retrying in {} ms: {:#}",
                    asset.name,
                    attempts,
                    config.max_retries as u32 + 1,
                    delay,
                    e
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            result => {
                if let Err(e) = &result {
                    error!("{} failed: {:#}", asset.name, e);
                }

                return AssetReport {
                    name: asset.name,
                    attempts,
                    result,
                };
            }
        }
    }
}

/// Whether repeating the whole pipeline could succeed.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<protune_license::Error>() {
            e.is_retryable()
        } else if let Some(e) = cause.downcast_ref::<StatusError>() {
            e.is_transient()
        } else if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            e.is_timeout() || e.is_connect() || e.is_request()
        } else if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            )
        } else {
            false
        }
    })
}

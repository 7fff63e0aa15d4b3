mod common;

use common::{KEY, KID, LicenseService, SAMPLE_DURATION, container, device, samples};
use protune::{Asset, Config, Pipeline, Source, run_assets};
use std::{sync::Arc, time::Duration};

fn config() -> Config {
    Config {
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

fn asset(name: &str, data: Vec<u8>) -> Asset {
    Asset::new(name, Source::Bytes(data.into()))
}

#[tokio::test]
async fn license_exchange_decrypts_asset() {
    let plain = samples(6, 40);
    let service = LicenseService::default();
    let pipeline = Pipeline::new(config(), service.clone()).device(device());

    let processed = pipeline
        .process(&asset("protected", container(&plain, true)))
        .await
        .unwrap();

    assert_eq!(service.calls(), 1);
    assert_eq!(processed.samples, 6);
    assert_eq!(processed.duration, 6 * SAMPLE_DURATION as u64);
    assert!(!processed.signature_mismatch);
    assert!(!processed.truncated);
    assert_eq!(processed.keys.len(), 1);
    assert_eq!(processed.keys[0].kid, KID.to_vec());
    assert_eq!(processed.keys[0].key, KEY.to_vec());
    assert!(processed.data.ends_with(&plain.concat()));
    assert!(processed.data.windows(4).any(|x| x == b"mp4a"));
    assert!(!processed.data.windows(4).any(|x| x == b"enca"));
}

#[tokio::test]
async fn clear_asset_skips_license() {
    let plain = samples(3, 25);
    let service = LicenseService::default();
    let pipeline = Pipeline::new(config(), service.clone()).device(device());

    let processed = pipeline
        .process(&asset("clear", container(&plain, false)))
        .await
        .unwrap();

    assert_eq!(service.calls(), 0);
    assert!(processed.keys.is_empty());
    assert!(processed.data.ends_with(&plain.concat()));
}

#[tokio::test]
async fn out_of_band_key_needs_no_device() {
    let plain = samples(4, 32);
    let service = LicenseService::default();
    let pipeline = Pipeline::new(config(), service.clone());

    let processed = pipeline
        .process(&asset("keyed", container(&plain, true)).key(1, hex::encode(KEY)))
        .await
        .unwrap();

    assert_eq!(service.calls(), 0);
    assert!(processed.data.ends_with(&plain.concat()));
}

#[tokio::test]
async fn protected_asset_without_device_or_keys_fails() {
    let pipeline = Pipeline::new(config(), LicenseService::default());

    let error = pipeline
        .process(&asset("locked", container(&samples(2, 16), true)))
        .await
        .unwrap_err();

    assert!(error.to_string().contains("no device or keys"));
}

#[tokio::test]
async fn transient_license_failures_are_retried() {
    let plain = samples(2, 16);
    let service = LicenseService::failing(2);
    let pipeline = Arc::new(Pipeline::new(config(), service.clone()).device(device()));

    let reports = run_assets(pipeline, vec![asset("flaky", container(&plain, true))]).await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].attempts, 3);
    assert_eq!(service.calls(), 3);
    assert!(reports[0].result.as_ref().unwrap().data.ends_with(&plain.concat()));
}

#[tokio::test]
async fn retries_stop_at_the_configured_limit() {
    let service = LicenseService::failing(10);
    let config = Config {
        max_retries: 1,
        ..config()
    };
    let pipeline = Arc::new(Pipeline::new(config, service.clone()).device(device()));

    let reports = run_assets(
        pipeline,
        vec![asset("down", container(&samples(2, 16), true))],
    )
    .await;

    assert_eq!(reports[0].attempts, 2);
    assert_eq!(service.calls(), 2);
    assert!(!reports[0].is_ok());
}

#[tokio::test]
async fn failures_stay_with_their_asset() {
    let plain = samples(2, 16);
    let pipeline = Arc::new(Pipeline::new(config(), LicenseService::default()).device(device()));

    let reports = run_assets(
        pipeline,
        vec![
            asset("first", container(&plain, true)),
            Asset::new("missing", Source::File("/nonexistent/protune/input.m4a".into())),
            asset("last", container(&plain, false)),
        ],
    )
    .await;

    let names = reports.iter().map(|x| x.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["first", "missing", "last"]);
    assert!(reports[0].is_ok());
    assert!(!reports[1].is_ok());
    assert_eq!(reports[1].attempts, 1);
    assert!(reports[2].is_ok());
}

#[tokio::test]
async fn concurrency_is_capped() {
    let service = LicenseService::slow(Duration::from_millis(20));
    let config = Config {
        max_concurrency: 2,
        ..config()
    };
    let pipeline = Arc::new(Pipeline::new(config, service.clone()).device(device()));
    let assets = (0..5)
        .map(|i| asset(&format!("asset-{}", i), container(&samples(2, 16), true)))
        .collect();

    let reports = run_assets(pipeline, assets).await;

    assert!(reports.iter().all(|x| x.is_ok()));
    assert_eq!(service.calls(), 5);
    assert!(service.max_in_flight() <= 2);
}

#[tokio::test]
async fn output_is_written_to_directory() {
    let directory = tempfile::tempdir().unwrap();
    let config = Config {
        output_directory: Some(directory.path().join("out")),
        ..config()
    };
    let pipeline = Pipeline::new(config, LicenseService::default()).device(device());

    let processed = pipeline
        .process(&asset("song", container(&samples(3, 20), true)))
        .await
        .unwrap();

    let path = directory.path().join("out").join("song.m4a");
    assert_eq!(processed.output.as_deref(), Some(path.as_path()));
    assert_eq!(std::fs::read(&path).unwrap(), processed.data);
}

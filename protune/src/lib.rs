//! Turns protected fragmented audio streams into playable, non-fragmented mp4
//! files.
//!
//! Every [`Asset`] goes through sample extraction, one license exchange over a
//! [`LicenseTransport`], decryption and reassembly. [`run_assets`] processes many
//! assets concurrently and retries the ones that fail for transient reasons.
//!
//! ```no_run
//! use protune::{Asset, Config, HttpTransport, Pipeline, Source, run_assets};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     protune::logger::init(log::LevelFilter::Info)?;
//!
//!     let config = Config::from_file("protune.json")?;
//!     let transport = HttpTransport::new("https://license.example/widevine".parse()?);
//!     let pipeline = Arc::new(Pipeline::from_config(config, transport)?);
//!     let assets = vec![Asset::new("track-01", Source::File("track-01.mp4".into()))];
//!
//!     for report in run_assets(pipeline, assets).await {
//!         if let Err(e) = report.result {
//!             eprintln!("{}: {:#}", report.name, e);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod logger;

mod asset;
mod config;
mod pipeline;
mod runner;
mod transport;

pub use asset::{Asset, Source};
pub use config::{Config, License, SchemeOverride, Strictness, UnmappedKey};
pub use pipeline::{Pipeline, Processed};
pub use runner::{AssetReport, is_retryable, process_with_retry, run_assets};
pub use transport::{HttpTransport, LicenseTransport, StatusError};

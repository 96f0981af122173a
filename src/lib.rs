//! # Market Ingest
//!
//! A streaming ingestion pipeline for electricity market time series.
//!
//! Market Ingest resolves a human-readable category query into provider
//! module ids, downloads the matching CSV export as a stream, transcodes it
//! chunk by chunk into a Parquet file with UTC interval timestamps, uploads
//! the file to object storage and appends it to a warehouse table.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────────┐   ┌────────────┐
//! │ Category  │──▶│  Payload  │──▶│   Provider   │──▶│   Schema   │
//! │ Resolver  │   │  Builder  │   │ CSV stream   │   │ Inference  │
//! └───────────┘   └───────────┘   └──────────────┘   └─────┬──────┘
//!                                                          ▼
//! ┌───────────┐   ┌───────────┐   ┌──────────────┐   ┌────────────┐
//! │ Warehouse │◀──│  Object   │◀──│    Staged    │◀──│  Chunked   │
//! │  Loader   │   │   Store   │   │   Parquet    │   │ Transcoder │
//! └───────────┘   └───────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GCP_ACCESS_TOKEN=$(gcloud auth print-access-token)
//! mingest resolve --main Stromerzeugung --sub "Realisierte Erzeugung"
//! mingest run --start 01.01.2024 --end 31.01.2024 \
//!     --main Stromerzeugung --sub "Realisierte Erzeugung"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML run configuration, JSON settings and category tree |
//! | [`models`] | Core data types |
//! | [`resolver`] | Category query → module ids |
//! | [`payload`] | Provider request body |
//! | [`window`] | Request windows and artifact names |
//! | [`provider`] | Streamed download from the provider |
//! | [`schema`] | Header-driven schema inference |
//! | [`sanitize`] | Warehouse-safe column names |
//! | [`normalize`] | Local civil time → UTC |
//! | [`transcode`] | Chunked CSV → Arrow transcoding |
//! | [`staging`] | Temporary Parquet artifact |
//! | [`object_store`] | Bucket handling and upload |
//! | [`warehouse`] | Dataset handling and load jobs |
//! | [`gcp`] | Credentials shared by the cloud clients |
//! | [`progress`] | Progress reporting on stderr |
//! | [`ingest`] | End-to-end pipeline |
//! | [`error`] | Error type |

pub mod config;
pub mod error;
pub mod gcp;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod object_store;
pub mod payload;
pub mod progress;
pub mod provider;
pub mod resolver;
pub mod sanitize;
pub mod schema;
pub mod staging;
pub mod transcode;
pub mod warehouse;
pub mod window;

pub use error::{Error, Result};

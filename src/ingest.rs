//! Ingestion pipeline orchestration.
//!
//! Coordinates one run end to end: resolve → build payload → stream the
//! provider response through schema inference and the chunked transcoder into
//! a staged Parquet file → upload → warehouse load.
//!
//! The run is sequential. The staged artifact is owned by [`run_ingest`] and
//! removed when it returns, whatever the outcome. The blocking download and
//! transcoding pass runs on tokio's blocking pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, Settings};
use crate::error::{Error, Result};
use crate::models::{CategoryTree, LoadOutcome, ModuleId, RequestPayload};
use crate::normalize::TimeNormalizer;
use crate::object_store::{upload_artifact, ObjectStore};
use crate::payload;
use crate::progress::{ProgressReporter, TranscodeEvent};
use crate::provider::ProviderClient;
use crate::resolver::{CategoryQuery, CategoryResolver};
use crate::schema;
use crate::staging::{ParquetChunkSink, StagedArtifact};
use crate::transcode::{ChunkedTranscoder, TranscodeReport};
use crate::warehouse::{table_name, Warehouse, WarehouseLoader};
use crate::window::TimeWindow;

/// Everything a run needs from its caller. Service clients are passed in as
/// capabilities; the pipeline never constructs them.
pub struct IngestContext<'a> {
    pub config: &'a Config,
    pub settings: &'a Settings,
    pub categories: &'a CategoryTree,
    pub object_store: &'a dyn ObjectStore,
    /// `None` skips the warehouse step.
    pub warehouse: Option<&'a dyn Warehouse>,
    pub progress: Arc<dyn ProgressReporter>,
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub module_ids: Vec<ModuleId>,
    pub artifact_name: String,
    pub table: String,
    pub transcode: TranscodeReport,
    /// `gs://` URI of the uploaded artifact, if anything was uploaded.
    pub uri: Option<String>,
    pub load: Option<LoadOutcome>,
}

/// Module ids for a category pair in the settings' region.
pub fn resolve_modules(
    ctx: &IngestContext<'_>,
    main: &str,
    sub: &str,
) -> Result<Vec<ModuleId>> {
    let region = ctx.settings.region()?;
    let resolver = CategoryResolver::new(ctx.config.resolver.clone());
    Ok(resolver.resolve(ctx.categories, &CategoryQuery { main, sub, region }))
}

pub async fn run_ingest(
    ctx: &IngestContext<'_>,
    main: &str,
    sub: &str,
    window: &TimeWindow,
) -> Result<IngestReport> {
    let module_ids = resolve_modules(ctx, main, sub)?;
    let mut report = IngestReport {
        module_ids,
        artifact_name: window.artifact_name(main, sub),
        table: table_name(main, sub),
        ..Default::default()
    };

    if report.module_ids.is_empty() {
        warn!(main, sub, "no modules matched the category query; nothing to request");
        return Ok(report);
    }
    info!(
        main,
        sub,
        modules = report.module_ids.len(),
        start = %window.start,
        end = %window.end,
        "resolved category"
    );

    let payload = payload::build(
        &ctx.settings.payload_template,
        &report.module_ids,
        window.start_ms()?,
        window.end_ms()?,
    )?;

    let artifact = StagedArtifact::create(ctx.config.staging.dir.as_deref())?;
    let job = StageJob {
        api_url: ctx.settings.api_url.clone(),
        timeout: ctx.config.provider.timeout(),
        payload,
        path: artifact.path().to_path_buf(),
        normalizer: TimeNormalizer::new(
            ctx.config.staging.timezone()?,
            ctx.config.staging.interval(),
        ),
        chunk_rows: ctx.config.staging.chunk_size,
        label: format!("{}/{}", main, sub),
        progress: ctx.progress.clone(),
    };
    report.transcode = tokio::task::spawn_blocking(move || job.run())
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("staging task failed: {}", e))))??;

    if report.transcode.rows == 0 {
        warn!(
            artifact = %report.artifact_name,
            "no rows for this window; skipping upload and load"
        );
        return Ok(report);
    }

    let uri = upload_artifact(
        ctx.object_store,
        &ctx.config.object_store.location,
        artifact.path(),
        &report.artifact_name,
    )
    .await?;
    report.uri = Some(uri.clone());

    if let Some(warehouse) = ctx.warehouse {
        let loader = WarehouseLoader::new(
            warehouse,
            ctx.config.warehouse.location.clone(),
            ctx.config.warehouse.poll_interval(),
        );
        let outcome = loader
            .load(&uri, &ctx.config.warehouse.dataset, &report.table)
            .await?;
        report.load = Some(outcome);
    }

    Ok(report)
}

/// The blocking half of a run: download, infer, transcode, finish the file.
///
/// The blocking HTTP client is built and dropped inside this job, off the
/// async runtime.
struct StageJob {
    api_url: String,
    timeout: Option<Duration>,
    payload: RequestPayload,
    path: PathBuf,
    normalizer: TimeNormalizer,
    chunk_rows: usize,
    label: String,
    progress: Arc<dyn ProgressReporter>,
}

impl StageJob {
    fn run(self) -> Result<TranscodeReport> {
        self.progress.report(TranscodeEvent::Requesting {
            target: self.label.clone(),
        });
        let client = ProviderClient::new(self.api_url, self.timeout)?;
        let mut body = client.open(&self.payload)?;
        let schema = schema::infer(&mut body)?;

        let requested = self.payload.form().module_ids.len();
        if schema.measurement_count() != requested {
            warn!(
                label = %self.label,
                requested,
                columns = schema.measurement_count(),
                "measurement column count differs from requested module count"
            );
        }

        let mut sink = ParquetChunkSink::new(&self.path)?;
        let mut transcoder = ChunkedTranscoder::new(
            self.chunk_rows,
            self.normalizer,
            self.progress.as_ref(),
            self.label.clone(),
        );
        let report = transcoder.transcode(body, &schema, &mut sink)?;
        sink.finish()?;

        if report.invalidated_timestamps > 0 {
            warn!(
                label = %self.label,
                rows = report.invalidated_timestamps,
                "interval starts set to null after failed daylight-saving inference"
            );
        }
        Ok(report)
    }
}

use crate::bundle;
use crate::catalog::{Catalog, QueryDef};
use crate::encode::encoder_for;
use crate::error::{ExportError, Result};
use crate::resolver::QueryResolver;
use crate::storage::BlobStore;
use crate::warehouse::{Warehouse, WarehouseConnection};
use metrics::{counter, histogram};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A completed artifact paired with the query that produced it. The local
/// file lives in the run's scratch directory and is eligible for cleanup once
/// persisted and, if applicable, folded into the bundle.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub query: QueryDef,
    pub file_name: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryFailure {
    pub query: String,
    pub error: String,
}

/// Outcome of one pipeline run: per-query successes and failures, plus the
/// bundle's storage URL when a full run produced one.
#[derive(Debug)]
pub struct RunReport {
    pub results: Vec<ExportResult>,
    pub failures: Vec<QueryFailure>,
    pub bundle_url: Option<String>,
    pub bundle_error: Option<String>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty() && self.bundle_error.is_none()
    }
}

pub struct ExportPipeline {
    catalog: Catalog,
    warehouse: Arc<dyn Warehouse>,
    resolver: Arc<QueryResolver>,
    store: Arc<dyn BlobStore>,
    bundle_name: String,
}

impl ExportPipeline {
    pub fn new(
        catalog: Catalog,
        warehouse: Arc<dyn Warehouse>,
        resolver: Arc<QueryResolver>,
        store: Arc<dyn BlobStore>,
        bundle_name: &str,
    ) -> Self {
        Self {
            catalog,
            warehouse,
            resolver,
            store,
            bundle_name: bundle_name.to_string(),
        }
    }

    /// Runs the export for the selected query names, or the whole catalog
    /// when no selection is given. Entries run with at most `concurrency`
    /// exports in flight; each failure is isolated to its own entry. The
    /// bundle is only assembled on unscoped runs.
    #[instrument(skip(self, cancel), fields(scoped = selected.is_some()))]
    pub async fn run(
        &self,
        selected: Option<&[String]>,
        concurrency: usize,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let queries = self.catalog.select(selected);
        if queries.is_empty() {
            warn!("No catalog entries matched the requested selection");
            return Ok(RunReport {
                results: Vec::new(),
                failures: Vec::new(),
                bundle_url: None,
                bundle_error: None,
            });
        }

        counter!("dataship_export_runs_total").increment(1);
        let run_started = std::time::Instant::now();

        let scratch = std::env::temp_dir().join(format!("dataship-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&scratch).await?;

        // One logical connection per run, shared across tasks
        let connection: Arc<dyn WarehouseConnection> = Arc::from(self.warehouse.open().await?);
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        let mut handles = Vec::with_capacity(queries.len());
        for query in queries {
            let semaphore = semaphore.clone();
            let connection = connection.clone();
            let resolver = self.resolver.clone();
            let store = self.store.clone();
            let scratch = scratch.clone();
            let mut cancel = cancel.clone();
            let name = query.name.clone();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => {
                        permit.expect("export semaphore closed")
                    }
                    _ = cancelled(&mut cancel) => {
                        return Err(ExportError::Cancelled { query: name });
                    }
                };
                tokio::select! {
                    result = export_one(&query, &*connection, &resolver, &*store, &scratch) => result,
                    _ = cancelled(&mut cancel) => Err(ExportError::Cancelled { query: name }),
                }
            });
            handles.push(handle);
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    let query = e.query_name().unwrap_or("unknown").to_string();
                    error!("Export of {} failed: {}", query, e);
                    counter!("dataship_export_errors_total", "query" => query.clone())
                        .increment(1);
                    failures.push(QueryFailure {
                        query,
                        error: e.to_string(),
                    });
                }
                Err(e) => failures.push(QueryFailure {
                    query: "unknown".to_string(),
                    error: format!("export task panicked: {e}"),
                }),
            }
        }

        // Explicit selections never bundle; callers re-running a failed
        // subset must not clobber the shared archive with a partial one
        let (bundle_url, bundle_error) = if selected.is_none() && !results.is_empty() {
            match bundle::build_bundle(&results, &scratch, &*self.store, &self.bundle_name).await
            {
                Ok(url) => (Some(url), None),
                Err(e) => {
                    error!("Bundle build failed: {}", e);
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, None)
        };

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!("Failed to clean scratch directory {}: {}", scratch.display(), e);
        }

        histogram!("dataship_export_run_duration_seconds")
            .record(run_started.elapsed().as_secs_f64());
        info!(
            "Run finished: {} exported, {} failed",
            results.len(),
            failures.len()
        );

        Ok(RunReport {
            results,
            failures,
            bundle_url,
            bundle_error,
        })
    }
}

/// Resolves once the cancellation signal has been raised.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            // Sender dropped without cancelling; never resolve
            std::future::pending::<()>().await;
        }
    }
}

/// Resolve, execute, encode, and persist a single catalog entry.
#[instrument(skip_all, fields(query = %query.name))]
async fn export_one(
    query: &QueryDef,
    connection: &dyn WarehouseConnection,
    resolver: &QueryResolver,
    store: &dyn BlobStore,
    scratch: &std::path::Path,
) -> Result<ExportResult> {
    let started = std::time::Instant::now();
    let query_text = resolver.resolve(query).await?;
    info!("Saving result {}: {}", query.name, query_text);

    let mut cursor = connection
        .execute(&query_text, &query.parameters)
        .await
        .map_err(|e| ExportError::Execution {
            query: query.name.clone(),
            message: e.to_string(),
        })?;

    let file_name = query.file_name();
    let local_path = scratch.join(&file_name);
    let mut encoder = encoder_for(query, &local_path)?;
    let columns = cursor.columns().to_vec();
    encoder.write_header(&columns)?;
    loop {
        let Some(row) = cursor.next_row().await.map_err(|e| ExportError::Execution {
            query: query.name.clone(),
            message: e.to_string(),
        })?
        else {
            break;
        };
        encoder.write_row(&columns, &row)?;
    }
    encoder.finish()?;

    store
        .save(&file_name, &local_path)
        .await
        .map_err(|e| ExportError::Persist {
            name: query.name.clone(),
            message: e.to_string(),
        })?;
    info!(
        "Result - saved {} to {}",
        file_name,
        store.url_for(&file_name)
    );
    counter!("dataship_exports_total", "query" => query.name.clone()).increment(1);
    histogram!("dataship_export_duration_seconds", "query" => query.name.clone())
        .record(started.elapsed().as_secs_f64());

    Ok(ExportResult {
        query: query.clone(),
        file_name,
        local_path,
    })
}

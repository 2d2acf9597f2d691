use crate::error::{ExportError, Result};
use crate::pipeline::ExportResult;
use crate::storage::BlobStore;
use chrono::Utc;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;
use zip::write::FileOptions;
use zip::ZipWriter;

fn bundle_error(e: impl ToString) -> ExportError {
    ExportError::Bundle(e.to_string())
}

/// Assembles the shared archive from the run's results: a manifest entry
/// listing every exported query, plus one entry per bundle-flagged artifact.
/// Artifacts are gunzipped before being added so the archive's own
/// compression is the only layer. Any unreadable input fails the whole
/// bundle; the per-query artifacts already persisted stay valid.
pub async fn build_bundle(
    results: &[ExportResult],
    scratch: &Path,
    store: &dyn BlobStore,
    bundle_name: &str,
) -> Result<String> {
    let started = std::time::Instant::now();
    let zip_path = scratch.join(bundle_name);
    let file = File::create(&zip_path).map_err(bundle_error)?;
    let mut archive = ZipWriter::new(file);
    let options: FileOptions = FileOptions::default();

    archive
        .start_file("readme.txt", options)
        .map_err(bundle_error)?;
    archive
        .write_all(manifest_text(results).as_bytes())
        .map_err(bundle_error)?;

    for result in results.iter().filter(|r| r.query.in_bundle) {
        let entry_name = result
            .file_name
            .strip_suffix(".gz")
            .unwrap_or(&result.file_name);
        archive.start_file(entry_name, options).map_err(bundle_error)?;
        let compressed = File::open(&result.local_path).map_err(bundle_error)?;
        let mut decoder = GzDecoder::new(compressed);
        std::io::copy(&mut decoder, &mut archive).map_err(bundle_error)?;
    }

    archive.finish().map_err(bundle_error)?;

    store.save(bundle_name, &zip_path).await?;
    let url = store.url_for(bundle_name);
    info!(
        "Result - saved bundle {} to {} in {:?}",
        bundle_name,
        url,
        started.elapsed()
    );
    Ok(url)
}

fn manifest_text(results: &[ExportResult]) -> String {
    let entries = results
        .iter()
        .map(|r| {
            format!(
                "*{}*\n  {}",
                r.query.name,
                r.query.description.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Shared data generated {}\n\n{}\n",
        Utc::now().format("%Y-%m-%d"),
        entries
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::QueryDef;

    #[test]
    fn manifest_lists_every_result_with_description() {
        let results = vec![
            ExportResult {
                query: QueryDef::from_table("alpha").description("first"),
                file_name: "alpha.csv.gz".to_string(),
                local_path: "/tmp/alpha.csv.gz".into(),
            },
            ExportResult {
                query: QueryDef::from_table("beta"),
                file_name: "beta.jsonl.gz".to_string(),
                local_path: "/tmp/beta.jsonl.gz".into(),
            },
        ];
        let manifest = manifest_text(&results);
        assert!(manifest.contains("*alpha*\n  first"));
        assert!(manifest.contains("*beta*"));
    }
}

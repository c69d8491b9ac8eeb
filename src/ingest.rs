//! Ingestion: copy course files from Canvas into the object store.
//!
//! Walks courses → modules → module items, keeps only courses on the
//! configured allow-list and only `File` items, and uploads each file
//! under `{course}/{module}/{file}`. Uploads overwrite by key, so running
//! ingestion twice leaves one object per file with the latest content.
//!
//! Failures are contained: a broken file is recorded and skipped, a
//! course whose modules or items cannot be listed is recorded and
//! skipped, and the run moves on. Nothing is retried.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::connector_canvas::CanvasClient;
use crate::models::{stored_file_key, ModuleItem, Skipped};
use crate::store::ObjectStore;

/// Outcome of one ingestion run.
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    /// Enrolled courses that were traversed.
    pub courses: Vec<String>,
    /// Object keys written, in upload order.
    pub uploaded: Vec<String>,
    /// Courses and files that were skipped, with reasons.
    pub skipped: Vec<Skipped>,
}

impl IngestReport {
    pub fn print(&self) {
        println!("ingest");
        println!("  courses: {}", self.courses.len());
        println!("  uploaded files: {}", self.uploaded.len());
        println!("  skipped: {}", self.skipped.len());
        for s in &self.skipped {
            println!("    {}: {}", s.item, s.reason);
        }
        println!("ok");
    }
}

/// Ingest every file of every enrolled course.
///
/// # Errors
///
/// Only a failure to list courses at all is fatal; everything below that
/// is recorded in the report's `skipped` list.
pub async fn ingest_courses(
    canvas: &CanvasClient,
    store: &dyn ObjectStore,
    enrolled: &[String],
) -> Result<IngestReport> {
    let allow: HashSet<&str> = enrolled.iter().map(String::as_str).collect();
    let courses = canvas
        .list_courses()
        .await
        .context("Failed to list courses")?;

    let mut report = IngestReport::default();

    for course in courses {
        let Some(name) = course.name.as_deref() else {
            continue;
        };
        if !allow.contains(name) {
            continue;
        }

        info!(course = name, id = course.id, "ingesting course");
        report.courses.push(name.to_string());

        if let Err(e) = ingest_course(canvas, store, course.id, name, &mut report).await {
            warn!(course = name, error = %e, "skipping course");
            report.skipped.push(Skipped::new(name, format!("{:#}", e)));
        }
    }

    for missing in enrolled.iter().filter(|c| !report.courses.contains(c)) {
        warn!(course = %missing, "enrolled course not returned by the API");
    }

    info!(
        uploaded = report.uploaded.len(),
        skipped = report.skipped.len(),
        "ingestion finished"
    );
    Ok(report)
}

async fn ingest_course(
    canvas: &CanvasClient,
    store: &dyn ObjectStore,
    course_id: u64,
    course_name: &str,
    report: &mut IngestReport,
) -> Result<()> {
    let modules = canvas.list_modules(course_id).await?;

    for module in modules {
        let items = canvas.list_module_items(&module.items_url).await?;

        for item in items {
            let ModuleItem::File { title, url } = item else {
                continue;
            };
            let key = stored_file_key(course_name, &module.name, &title);

            match upload_file(canvas, store, &key, &url).await {
                Ok(size) => {
                    info!(%key, size, "stored file");
                    report.uploaded.push(key);
                }
                Err(e) => {
                    warn!(%key, error = %e, "skipping file");
                    report.skipped.push(Skipped::new(key, format!("{:#}", e)));
                }
            }
        }
    }

    Ok(())
}

async fn upload_file(
    canvas: &CanvasClient,
    store: &dyn ObjectStore,
    key: &str,
    file_url: &str,
) -> Result<usize> {
    let bytes = canvas.download_file(file_url).await?;
    let size = bytes.len();
    store.put_object(key, bytes).await?;
    Ok(size)
}

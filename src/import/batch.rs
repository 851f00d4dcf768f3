use colored::Colorize;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    config::{DatabaseConfig, ImportConfig},
    error::{FasError, Result},
    intake::ApplicantIntake,
    schemes::SchemeManager,
    storage::{ApplicantDraft, Database, SchemeDraft},
};

/// Seed document accepted by `fas import`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub applicants: Vec<ApplicantDraft>,
    #[serde(default)]
    pub schemes: Vec<SchemeDraft>,
}

impl SeedDocument {
    pub fn len(&self) -> usize {
        self.applicants.len() + self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_items(self) -> Vec<ImportItem> {
        self.applicants
            .into_iter()
            .map(ImportItem::Applicant)
            .chain(self.schemes.into_iter().map(ImportItem::Scheme))
            .collect()
    }
}

#[derive(Debug, Clone)]
enum ImportItem {
    Applicant(ApplicantDraft),
    Scheme(SchemeDraft),
}

impl ImportItem {
    fn label(&self) -> String {
        match self {
            ImportItem::Applicant(draft) => format!("applicant '{}'", draft.name.trim()),
            ImportItem::Scheme(draft) => format!("scheme '{}'", draft.name.trim()),
        }
    }

    /// Store the item on a fresh connection and return the new id.
    fn store(self, path: &str, busy_timeout: Duration) -> Result<String> {
        let mut db = Database::open(path, busy_timeout)?;
        match self {
            ImportItem::Applicant(draft) => ApplicantIntake::new(&mut db)
                .create_applicant(&draft)
                .map(|applicant| applicant.id),
            ImportItem::Scheme(draft) => SchemeManager::new(&mut db)
                .create_scheme(&draft)
                .map(|scheme| scheme.id),
        }
    }
}

/// Loads seed documents with a bounded pool of blocking workers.
pub struct BatchImporter {
    db_path: String,
    busy_timeout: Duration,
    workers: usize,
    batch_size: usize,
    show_progress: bool,
}

impl BatchImporter {
    pub fn new(database: &DatabaseConfig, import: &ImportConfig) -> Self {
        Self {
            db_path: database.path.clone(),
            busy_timeout: database.busy_timeout(),
            workers: import.workers.max(1),
            batch_size: import.batch_size.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Import every item of the seed. A failed item is logged and counted
    /// without stopping the rest.
    pub async fn import(&self, seed: SeedDocument) -> Result<ImportSummary> {
        let mut summary = ImportSummary {
            total: seed.len(),
            ..Default::default()
        };
        if seed.is_empty() {
            info!("Nothing to import");
            return Ok(summary);
        }

        // Create the schema and switch to WAL once, before workers race to.
        Database::open(&self.db_path, self.busy_timeout)?;

        let items = seed.into_items();
        let batches = (items.len() + self.batch_size - 1) / self.batch_size;
        info!(
            "Importing {} items in {} batches of up to {} with {} workers",
            items.len(),
            batches,
            self.batch_size,
            self.workers
        );

        let progress = self.progress_bar(items.len() as u64);

        for (batch_num, chunk) in items.chunks(self.batch_size).enumerate() {
            progress.set_message(format!("batch {}/{}", batch_num + 1, batches));

            let outcomes: Vec<(String, Result<String>)> = stream::iter(chunk.to_vec())
                .map(|item| {
                    let path = self.db_path.clone();
                    let busy_timeout = self.busy_timeout;
                    async move {
                        let label = item.label();
                        let result = tokio::task::spawn_blocking(move || item.store(&path, busy_timeout))
                            .await
                            .unwrap_or_else(|e| {
                                Err(FasError::Other(anyhow::anyhow!("import worker failed: {}", e)))
                            });
                        (label, result)
                    }
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

            for (label, result) in outcomes {
                progress.inc(1);
                match &result {
                    Ok(_) => summary.successful += 1,
                    Err(e) => {
                        summary.failed += 1;
                        warn!("Failed to import {}: {}", label, e);
                    }
                }
                summary.results.push((label, result));
            }
        }

        progress.finish_and_clear();
        info!(
            "Import complete: {} stored, {} failed",
            summary.successful, summary.failed
        );
        Ok(summary)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}

/// Result of one import run. `results` holds the new id or the error per item.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<(String, Result<String>)>,
}

impl ImportSummary {
    pub fn print_summary(&self) {
        println!("\n{}", "=== Import Summary ===".cyan().bold());
        println!("Total Items:  {}", self.total);
        println!("Stored:       {}", self.successful.to_string().green());
        println!("Failed:       {}", self.failed.to_string().red());

        for (label, result) in &self.results {
            if let Err(e) = result {
                println!("  {} {}: {}", "✗".red(), label, e);
            }
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.successful as f64 / self.total as f64) * 100.0
        }
    }
}

// LLP Analyzer - Main Entry Point
// Copyright (C) 2024 - llp-analyzer contributors
// Licensed under AGPL v3

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};

use llp_analyzer::analyzer::EventAnalyzer;
use llp_analyzer::classifier::BoostedForest;
use llp_analyzer::config::{Config, LogFormat};
use llp_analyzer::error::AnalyzerError;
use llp_analyzer::event::Event;
use llp_analyzer::input::EventReader;
use llp_analyzer::output::{CsvOutput, EventRecord, JsonLinesOutput, OutputHandler};

/// Run bookkeeping, written to summary.json in the work directory
#[derive(Debug, Default, Serialize)]
struct RunSummary {
    started: String,
    finished: String,
    input: String,
    events_read: usize,
    events_analyzed: usize,
    skipped_no_primary_vertex: usize,
    malformed_lines: usize,
    /// Events with a valid vertex in hemisphere 1 and 2
    valid_hemi_vertices: [usize; 2],
}

impl RunSummary {
    fn record(&mut self, record: &EventRecord) {
        self.events_analyzed += 1;
        for (h, status) in record.tree_Hemi_Vtx_status.iter().enumerate().take(2) {
            if *status == 0 {
                self.valid_hemi_vertices[h] += 1;
            }
        }
    }

    /// Events that went through the analyzer, whether kept or skipped
    fn processed(&self) -> usize {
        self.events_analyzed + self.skipped_no_primary_vertex
    }

    /// True once per `interval` processed events
    fn status_due(&self, interval: usize) -> bool {
        interval > 0 && self.processed() > 0 && self.processed() % interval == 0
    }

    fn write(&self, dir: &Path) {
        let tmp = dir.join("summary.json.tmp");
        let path = dir.join("summary.json");
        let text = match serde_json::to_string_pretty(self) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize run summary: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&tmp, text) {
            error!("Failed to write {}: {}", tmp.display(), e);
        } else if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            error!("Failed to rename {} -> {}: {}", tmp.display(), path.display(), e);
        } else {
            info!("Run summary written to {}", path.display());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose, config.log_format);
    config.validate()?;

    let started: DateTime<Utc> = Utc::now();
    info!("Starting LLP analyzer");

    // A broken model invalidates every score: abort before reading any event
    let forest = BoostedForest::load(&config.weight_file)?;
    let analyzer = Arc::new(
        EventAnalyzer::new(Arc::new(forest))
            .with_bdt_cut(config.bdt_cut)
            .with_b_field(config.b_field),
    );
    info!(
        bdt_cut = config.bdt_cut,
        b_field = config.b_field,
        workers = config.workers,
        "Analyzer initialized"
    );

    // Setup outputs
    let mut outputs: Vec<Box<dyn OutputHandler>> = Vec::new();
    for path in &config.output_json {
        info!("Writing JSON records to {}", path.display());
        outputs.push(Box::new(JsonLinesOutput::create(path)?));
    }
    for path in &config.write_csv {
        info!("Writing CSV vertex summary to {}", path.display());
        outputs.push(Box::new(CsvOutput::create(path)?));
    }
    if outputs.is_empty() {
        warn!("No outputs specified! Use --output-json FILE or --write-csv FILE");
    }

    let mut summary = RunSummary {
        started: started.to_rfc3339(),
        input: config.input.display().to_string(),
        ..Default::default()
    };

    let reader = EventReader::open(&config.input)?;
    let mut batch: Vec<Event> = Vec::with_capacity(config.workers);
    for item in reader {
        match item {
            Ok(event) => {
                summary.events_read += 1;
                batch.push(event);
                if batch.len() >= config.workers {
                    let events = std::mem::take(&mut batch);
                    process_batch(&analyzer, events, &mut outputs, &mut summary, config.status_interval).await?;
                }
            }
            Err(e @ AnalyzerError::Json { .. }) => {
                warn!("Skipping {}", e);
                summary.malformed_lines += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    if !batch.is_empty() {
        process_batch(&analyzer, batch, &mut outputs, &mut summary, config.status_interval).await?;
    }

    for output in outputs.iter_mut() {
        output.finish()?;
    }

    let finished = Utc::now();
    summary.finished = finished.to_rfc3339();
    info!(
        events_read = summary.events_read,
        analyzed = summary.events_analyzed,
        skipped = summary.skipped_no_primary_vertex,
        malformed = summary.malformed_lines,
        seconds = (finished - started).num_milliseconds() as f64 / 1000.0,
        "Run finished"
    );
    if let Some(dir) = &config.work_dir {
        summary.write(dir);
    }

    Ok(())
}

/// Analyzes a batch of events in parallel and writes the records in input order
async fn process_batch(
    analyzer: &Arc<EventAnalyzer>,
    events: Vec<Event>,
    outputs: &mut [Box<dyn OutputHandler>],
    summary: &mut RunSummary,
    status_interval: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let handles: Vec<_> = events
        .into_iter()
        .map(|event| {
            let analyzer = Arc::clone(analyzer);
            tokio::task::spawn_blocking(move || analyzer.analyze(&event))
        })
        .collect();

    for handle in handles {
        match handle.await? {
            Ok(record) => {
                for output in outputs.iter_mut() {
                    output.handle_record(&record)?;
                }
                summary.record(&record);
            }
            Err(e @ AnalyzerError::NoPrimaryVertex { .. }) => {
                warn!("Skipping event: {}", e);
                summary.skipped_no_primary_vertex += 1;
            }
            Err(e) => return Err(e.into()),
        }

        if summary.status_due(status_interval) {
            info!(
                "Status: ({} events processed) ({} analyzed {} skipped) ({} / {} valid hemisphere vertices)",
                summary.processed(),
                summary.events_analyzed,
                summary.skipped_no_primary_vertex,
                summary.valid_hemi_vertices[0],
                summary.valid_hemi_vertices[1]
            );
        }
    }
    Ok(())
}

/// Initialize logging subsystem on stderr; verbose runs also show the emitting module
fn init_logging(verbose: bool, format: LogFormat) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(verbose);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    if verbose {
        info!("Verbose logging enabled (DEBUG level)");
    }
}

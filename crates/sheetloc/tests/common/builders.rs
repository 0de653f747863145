//! Builders for test rows, sheets and configs.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sheetloc::config::SessionSettings;
use sheetloc::model::SheetRow;
use sheetloc::{MemorySheet, PipelineConfig, RunRequest};

pub const SHEET: &str = "Sheet1";

/// A sheet row with the key, the Korean source and empty target cells.
pub fn row(key: &str, korean: &str) -> SheetRow {
    SheetRow::new()
        .with("Key", key)
        .with("Korean(ko)", korean)
        .with("English(en)", "")
        .with("Japanese(ja)", "")
}

/// Builder for an in-memory worksheet.
pub struct SheetBuilder {
    rows: Vec<SheetRow>,
}

impl SheetBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn row(mut self, key: &str, korean: &str) -> Self {
        self.rows.push(row(key, korean));
        self
    }

    /// Adds a row whose English cell is already filled.
    pub fn translated_row(mut self, key: &str, korean: &str, english: &str) -> Self {
        let mut r = row(key, korean);
        r.set("English(en)", english);
        self.rows.push(r);
        self
    }

    pub fn blank_row(mut self) -> Self {
        self.rows.push(row("", ""));
        self
    }

    pub fn rows(&self) -> Vec<SheetRow> {
        self.rows.clone()
    }

    pub fn build(self) -> Arc<MemorySheet> {
        Arc::new(MemorySheet::new().with_sheet(SHEET, self.rows))
    }
}

impl Default for SheetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Default pipeline settings without the progress drip delay.
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        drip_delay: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn session_settings(max_sessions: usize) -> SessionSettings {
    SessionSettings {
        max_sessions,
        worker_count: 2,
        ..SessionSettings::default()
    }
}

pub fn request(languages: &[&str]) -> RunRequest {
    RunRequest::new(SHEET, languages)
}

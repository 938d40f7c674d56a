use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::download::{FetchOutcome, RecentDownload, WarningPointsDownload};
use crate::retention::RetentionReport;
use crate::sync::SyncReport;
use crate::upload::{UploadItemResult, UploadResult};

pub struct JsonOutput;

#[derive(Debug, Serialize)]
struct LayerUpload<'a> {
    layer: &'a str,
    result: &'a Value,
}

impl JsonOutput {
    pub fn print_upload(result: &UploadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_upload_item(item: Option<&UploadItemResult>) -> io::Result<()> {
        Self::print_json(&item)
    }

    pub fn print_fetch(outcome: &FetchOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_recent(download: Option<&RecentDownload>) -> io::Result<()> {
        Self::print_json(&download)
    }

    pub fn print_warning_points(download: Option<&WarningPointsDownload>) -> io::Result<()> {
        Self::print_json(&download)
    }

    pub fn print_sync(report: &SyncReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_purge(report: &RetentionReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_layers(layers: &[String]) -> io::Result<()> {
        Self::print_json(&layers)
    }

    pub fn print_layer_upload(upload: Option<&(String, Value)>) -> io::Result<()> {
        let upload = upload.map(|(layer, result)| LayerUpload { layer, result });
        Self::print_json(&upload)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Batch processing of photo files and folders
///
/// This is the caller side of the optimizer: it finds the photos, fans
/// out one task per file, writes whatever comes back, and tallies the
/// before/after sizes.
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::optimize::dimensions::Dimensions;
use crate::optimize::processor::ProcessingResult;
use crate::optimize::source::mime_type_for_extension;
use crate::optimize::{process, ProcessingOptions, ProcessingStatus, SourceImage};

/// Only errors that make the whole run impossible; per-file trouble ends
/// up in the report instead
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("No supported photos found in the given inputs")]
    NoInputs,
}

impl BatchError {
    fn io(path: &Path, source: io::Error) -> Self {
        BatchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where and whether results are written
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub out_dir: PathBuf,
    /// Process and report, but write nothing
    pub dry_run: bool,
    /// Photos read and processed at the same time
    pub jobs: usize,
}

impl BatchSettings {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            dry_run: false,
            jobs: default_jobs(),
        }
    }
}

/// One job per available core
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Outcome of one input in a batch
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    PassThrough,
    Optimized,
    Fallback,
    /// The file could not be read, nothing was written for it
    Unreadable,
}

impl From<ProcessingStatus> for EntryStatus {
    fn from(status: ProcessingStatus) -> Self {
        match status {
            ProcessingStatus::PassThrough => EntryStatus::PassThrough,
            ProcessingStatus::Optimized => EntryStatus::Optimized,
            ProcessingStatus::Fallback => EntryStatus::Fallback,
        }
    }
}

/// One processed input
#[derive(Serialize, Debug, Clone)]
pub struct BatchEntry {
    pub input: PathBuf,
    /// Where the result was written (`None` on a dry run or unreadable input)
    pub output: Option<PathBuf>,
    pub output_name: String,
    pub mime_type: String,
    pub status: EntryStatus,
    pub original_size: u64,
    pub processed_size: u64,
    pub compression_ratio: f64,
    pub dimensions: Option<Dimensions>,
    pub error: Option<String>,
}

impl BatchEntry {
    fn unreadable(input: PathBuf, reason: String) -> Self {
        Self {
            input,
            output: None,
            output_name: String::new(),
            mime_type: String::new(),
            status: EntryStatus::Unreadable,
            original_size: 0,
            processed_size: 0,
            compression_ratio: 1.0,
            dimensions: None,
            error: Some(reason),
        }
    }
}

/// Everything a batch run produced, in input order
#[derive(Serialize, Debug, Clone, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub total_original_bytes: u64,
    pub total_processed_bytes: u64,
    pub optimized: usize,
    pub passed_through: usize,
    pub fell_back: usize,
    pub unreadable: usize,
}

impl BatchReport {
    fn push(&mut self, entry: BatchEntry) {
        self.total_original_bytes += entry.original_size;
        self.total_processed_bytes += entry.processed_size;
        match entry.status {
            EntryStatus::Optimized => self.optimized += 1,
            EntryStatus::PassThrough => self.passed_through += 1,
            EntryStatus::Fallback => self.fell_back += 1,
            EntryStatus::Unreadable => self.unreadable += 1,
        }
        self.entries.push(entry);
    }

    /// Total processed bytes over total original bytes
    pub fn overall_ratio(&self) -> f64 {
        if self.total_original_bytes == 0 {
            1.0
        } else {
            self.total_processed_bytes as f64 / self.total_original_bytes as f64
        }
    }
}

/// Expand the given paths into a sorted, de-duplicated list of photo files
///
/// Files are taken as given. Directories are walked recursively and only
/// files with a supported photo extension are kept.
pub fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>, BatchError> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let candidate = entry.path();
                if candidate.is_file() && is_supported_photo(candidate) {
                    files.push(candidate.to_path_buf());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(BatchError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            ));
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn is_supported_photo(path: &Path) -> bool {
    path.extension()
        .map(|ext| mime_type_for_extension(&ext.to_string_lossy()).is_some())
        .unwrap_or(false)
}

/// Reserve `name` in the output folder, adding `_1`, `_2`... before the
/// extension when another photo of this batch already took it
///
/// Names are compared case-insensitively so `IMG.jpg` and `img.JPG` do not
/// clobber each other on case-insensitive filesystems.
fn claim_output_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_lowercase()) {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut suffix = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, suffix, extension);
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Read and process one file; a read failure comes back as its message
async fn read_and_process(
    path: &Path,
    options: ProcessingOptions,
) -> Result<ProcessingResult, String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
    let source = SourceImage::from_path_bytes(path, bytes);
    Ok(process(source, options).await)
}

/// Process every input concurrently and write the results
///
/// Each file gets its own task, with at most `settings.jobs` of them
/// reading or processing at once. Results are awaited in input order so the
/// report lines up with `inputs` no matter which task finishes first. A
/// file that cannot be read is reported and skipped; only a failure to
/// create or write into the output folder stops the run.
pub async fn run_batch(
    inputs: Vec<PathBuf>,
    options: ProcessingOptions,
    settings: &BatchSettings,
) -> Result<BatchReport, BatchError> {
    if inputs.is_empty() {
        return Err(BatchError::NoInputs);
    }

    if !settings.dry_run {
        tokio::fs::create_dir_all(&settings.out_dir)
            .await
            .map_err(|e| BatchError::io(&settings.out_dir, e))?;
    }

    let jobs = settings.jobs.max(1);
    info!("🔍 Processing {} photos, {} at a time", inputs.len(), jobs);

    let limiter = Arc::new(Semaphore::new(jobs));
    let handles: Vec<_> = inputs
        .into_iter()
        .map(|path| {
            let limiter = Arc::clone(&limiter);
            let task_path = path.clone();
            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so acquiring only waits
                let _permit = limiter.acquire_owned().await.ok();
                read_and_process(&task_path, options).await
            });
            (path, handle)
        })
        .collect();

    let mut report = BatchReport::default();
    let mut taken = HashSet::new();

    for (input, handle) in handles {
        let outcome = handle
            .await
            .unwrap_or_else(|e| Err(format!("worker task failed: {}", e)));

        let result = match outcome {
            Ok(result) => result,
            Err(reason) => {
                warn!("⚠️  Could not read {}: {}", input.display(), reason);
                report.push(BatchEntry::unreadable(input, reason));
                continue;
            }
        };

        let output_name = claim_output_name(result.file.name(), &mut taken);
        let output = if settings.dry_run {
            None
        } else {
            let out_path = settings.out_dir.join(&output_name);
            tokio::fs::write(&out_path, result.file.bytes())
                .await
                .map_err(|e| BatchError::io(&out_path, e))?;
            Some(out_path)
        };

        if result.status == ProcessingStatus::Fallback {
            warn!(
                "⚠️  {} kept as-is: {}",
                input.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        report.push(BatchEntry {
            input,
            output,
            output_name,
            mime_type: result.file.mime_type().to_string(),
            status: result.status.into(),
            original_size: result.original_size,
            processed_size: result.processed_size,
            compression_ratio: result.compression_ratio,
            dimensions: result.dimensions,
            error: result.error,
        });
    }

    info!(
        "📊 Batch done: {} optimized, {} passed through, {} kept after errors, {} unreadable",
        report.optimized, report.passed_through, report.fell_back, report.unreadable
    );

    Ok(report)
}

/// Write the report as pretty JSON
pub fn write_report(report: &BatchReport, path: &Path) -> Result<(), BatchError> {
    let file = std::fs::File::create(path).map_err(|e| BatchError::io(path, e))?;
    serde_json::to_writer_pretty(io::BufWriter::new(file), report)?;
    Ok(())
}

/// Print the per-file table and totals to stdout
pub fn print_summary(report: &BatchReport) {
    for entry in &report.entries {
        let label = match entry.status {
            EntryStatus::Optimized => "optimized",
            EntryStatus::PassThrough => "kept",
            EntryStatus::Fallback => "fallback",
            EntryStatus::Unreadable => "unreadable",
        };
        println!(
            "{:<10} {:>10} -> {:>10} ({:>5.1}%)  {} -> {}",
            label,
            format_bytes(entry.original_size),
            format_bytes(entry.processed_size),
            entry.compression_ratio * 100.0,
            entry.input.display(),
            entry.output_name
        );
    }

    println!(
        "Total: {} -> {} ({:.1}%) across {} photos",
        format_bytes(report.total_original_bytes),
        format_bytes(report.total_processed_bytes),
        report.overall_ratio() * 100.0,
        report.entries.len()
    );
}

/// Human-readable byte count (binary units)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::fs;
    use std::io::Cursor;

    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        let img = RgbImage::from_fn(width, height, |x, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let grain = (state % 32) as u8;
            image::Rgb([(x % 200) as u8 + grain, 90 + grain, 160 + grain])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_collect_inputs_walks_folders() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ceremony");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("b.JPG"), b"x").unwrap();
        fs::write(nested.join("a.png"), b"x").unwrap();
        fs::write(nested.join("notes.txt"), b"x").unwrap();

        let files = collect_inputs(&[dir.path().to_path_buf(), nested.join("a.png")]).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.ends_with("b.JPG")));
        assert!(files.iter().any(|f| f.ends_with("ceremony/a.png")));
    }

    #[test]
    fn test_collect_inputs_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_inputs(&[dir.path().join("nope.jpg")]).unwrap_err();
        assert!(matches!(err, BatchError::Io { .. }));
    }

    #[tokio::test]
    async fn test_run_batch_mixed_results() {
        let dir = tempfile::tempdir().unwrap();
        let big = create_test_png(500, 400);
        let small = create_test_png(16, 16);
        fs::write(dir.path().join("big.png"), &big).unwrap();
        fs::write(dir.path().join("small.png"), &small).unwrap();
        fs::write(dir.path().join("broken.jpg"), vec![0u8; big.len()]).unwrap();

        let options = ProcessingOptions {
            max_size_bytes: (small.len() as u64) * 2,
            max_width: 250,
            max_height: 250,
            ..ProcessingOptions::default()
        };
        let settings = BatchSettings::new(dir.path().join("out"));

        let inputs = collect_inputs(&[dir.path().to_path_buf()]).unwrap();
        let report = run_batch(inputs, options, &settings).await.unwrap();

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.optimized, 1);
        assert_eq!(report.passed_through, 1);
        assert_eq!(report.fell_back, 1);

        // Sorted input order: big, broken, small
        let big_entry = &report.entries[0];
        assert_eq!(big_entry.status, EntryStatus::Optimized);
        assert_eq!(big_entry.dimensions, Some(Dimensions::new(250, 200)));
        assert!(big_entry.output_name.starts_with("big_optimized_"));
        assert!(big_entry.output.as_ref().unwrap().exists());

        let broken_entry = &report.entries[1];
        assert_eq!(broken_entry.status, EntryStatus::Fallback);
        assert_eq!(broken_entry.output_name, "broken.jpg");
        let written = fs::read(broken_entry.output.as_ref().unwrap()).unwrap();
        assert_eq!(written.len(), big.len());

        let small_entry = &report.entries[2];
        assert_eq!(small_entry.status, EntryStatus::PassThrough);
        assert_eq!(fs::read(settings.out_dir.join("small.png")).unwrap(), small);

        assert!(report.total_processed_bytes < report.total_original_bytes);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("toast.png");
        fs::write(&photo, create_test_png(64, 64)).unwrap();

        let settings = BatchSettings {
            dry_run: true,
            ..BatchSettings::new(dir.path().join("out"))
        };
        let report = run_batch(vec![photo], ProcessingOptions::default(), &settings)
            .await
            .unwrap();

        assert_eq!(report.entries.len(), 1);
        assert!(report.entries[0].output.is_none());
        assert!(!settings.out_dir.exists());
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_error() {
        let settings = BatchSettings {
            dry_run: true,
            ..BatchSettings::new("unused")
        };
        let err = run_batch(Vec::new(), ProcessingOptions::default(), &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::NoInputs));
    }

    #[test]
    fn test_write_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut report = BatchReport::default();
        report.push(BatchEntry {
            input: PathBuf::from("a.jpg"),
            output: None,
            output_name: "a.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            status: EntryStatus::PassThrough,
            original_size: 100,
            processed_size: 100,
            compression_ratio: 1.0,
            dimensions: None,
            error: None,
        });
        write_report(&report, &path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["passed_through"], 1);
        assert_eq!(value["entries"][0]["status"], "pass_through");
        assert_eq!(report.overall_ratio(), 1.0);
    }

    #[tokio::test]
    async fn test_same_name_in_sibling_folders_keeps_both() {
        let dir = tempfile::tempdir().unwrap();
        let ceremony = dir.path().join("ceremony");
        let reception = dir.path().join("reception");
        fs::create_dir_all(&ceremony).unwrap();
        fs::create_dir_all(&reception).unwrap();

        let first = create_test_png(20, 20);
        let second = create_test_png(30, 30);
        fs::write(ceremony.join("IMG_0001.png"), &first).unwrap();
        fs::write(reception.join("IMG_0001.png"), &second).unwrap();

        let settings = BatchSettings::new(dir.path().join("out"));
        let inputs = collect_inputs(&[dir.path().to_path_buf()]).unwrap();
        let report = run_batch(inputs, ProcessingOptions::default(), &settings)
            .await
            .unwrap();

        assert_eq!(report.passed_through, 2);
        assert_eq!(report.entries[0].output_name, "IMG_0001.png");
        assert_eq!(report.entries[1].output_name, "IMG_0001_1.png");
        assert_ne!(report.entries[0].output, report.entries[1].output);

        let written = fs::read_dir(&settings.out_dir).unwrap().count();
        assert_eq!(written, 2);
        assert_eq!(fs::read(settings.out_dir.join("IMG_0001.png")).unwrap(), first);
        assert_eq!(fs::read(settings.out_dir.join("IMG_0001_1.png")).unwrap(), second);
    }

    #[test]
    fn test_claim_output_name() {
        let mut taken = HashSet::new();
        assert_eq!(claim_output_name("IMG.jpg", &mut taken), "IMG.jpg");
        assert_eq!(claim_output_name("img.JPG", &mut taken), "img_1.JPG");
        assert_eq!(claim_output_name("IMG.jpg", &mut taken), "IMG_2.jpg");
        assert_eq!(claim_output_name("IMG_1.jpg", &mut taken), "IMG_1_1.jpg");
        assert_eq!(claim_output_name("noext", &mut taken), "noext");
        assert_eq!(claim_output_name("noext", &mut taken), "noext_1");
    }

    #[tokio::test]
    async fn test_missing_file_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.jpg");
        let good = dir.path().join("good.png");
        let good_bytes = create_test_png(24, 24);
        fs::write(&good, &good_bytes).unwrap();

        let settings = BatchSettings::new(dir.path().join("out"));
        let inputs = vec![gone.clone(), good];
        let report = run_batch(inputs, ProcessingOptions::default(), &settings)
            .await
            .unwrap();

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.passed_through, 1);

        let gone_entry = &report.entries[0];
        assert_eq!(gone_entry.input, gone);
        assert_eq!(gone_entry.status, EntryStatus::Unreadable);
        assert!(gone_entry.output.is_none());
        assert!(gone_entry.error.is_some());

        assert_eq!(fs::read(settings.out_dir.join("good.png")).unwrap(), good_bytes);
    }

    #[tokio::test]
    async fn test_single_job_still_processes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("shot_{}.png", i));
            fs::write(&path, create_test_png(16 + i, 16)).unwrap();
            inputs.push(path);
        }

        let settings = BatchSettings {
            jobs: 1,
            ..BatchSettings::new(dir.path().join("out"))
        };
        let report = run_batch(inputs.clone(), ProcessingOptions::default(), &settings)
            .await
            .unwrap();

        assert_eq!(report.entries.len(), 5);
        for (entry, input) in report.entries.iter().zip(&inputs) {
            assert_eq!(&entry.input, input);
            assert!(entry.output.as_ref().unwrap().exists());
        }
        assert!(default_jobs() >= 1);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(15 * 1024 * 1024), "15.0 MB");
    }
}

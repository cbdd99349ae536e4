//! Watch-folder intake: scan a directory for export files and import them.
//!
//! Successful files move to `archive/`, failures to `failed/` with an
//! `.error.txt` sidecar, both with a UTC timestamp suffix so re-drops of the
//! same filename never collide. The poller reads its configuration from the
//! settings table on every iteration, so the folder can be enabled,
//! disabled, or re-pointed at runtime.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use recall_import::{ImportResult, ImportService};
use recall_store::UnitOfWork;

use crate::RunFlag;

pub const SETTING_WATCH_PATH: &str = "watch_folder_path";
pub const SETTING_WATCH_ENABLED: &str = "watch_folder_enabled";
pub const SETTING_WATCH_INTERVAL: &str = "watch_folder_poll_interval";
pub const SETTING_WATCH_HEARTBEAT: &str = "watch_folder_worker_heartbeat";
pub const SETTING_WATCH_LAST_CHECK: &str = "watch_folder_last_check";

const SETTINGS_CATEGORY: &str = "import";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Result of one folder scan.
#[derive(Debug, Default)]
pub struct WatchScanResult {
    pub files_processed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub conversations_imported: usize,
    pub notes: Vec<String>,
    pub errors: Vec<String>,
}

pub struct WatchFolderService {
    import: Arc<ImportService>,
}

impl WatchFolderService {
    pub fn new(import: Arc<ImportService>) -> Self {
        Self { import }
    }

    /// Scan `folder` for top-level `.json` and `.zip` files and process
    /// each. Archive and failed subfolders are created as needed and never
    /// scanned (only direct children of the watch folder are considered).
    pub async fn scan_folder(&self, folder: &Path) -> WatchScanResult {
        let mut result = WatchScanResult::default();

        if !folder.is_dir() {
            result
                .errors
                .push(format!("watch folder does not exist: {}", folder.display()));
            return result;
        }

        let archive_folder = folder.join("archive");
        let failed_folder = folder.join("failed");
        for dir in [&archive_folder, &failed_folder] {
            if let Err(err) = fs::create_dir_all(dir) {
                result
                    .errors
                    .push(format!("cannot create {}: {err}", dir.display()));
                return result;
            }
        }

        let files = match collect_import_files(folder) {
            Ok(files) => files,
            Err(err) => {
                result.errors.push(err.to_string());
                return result;
            }
        };
        if files.is_empty() {
            debug!(folder = %folder.display(), "nothing to process");
            return result;
        }
        info!(folder = %folder.display(), count = files.len(), "processing watch folder files");

        for file in files {
            result.files_processed += 1;
            let outcome = if file.extension().is_some_and(|e| e.eq_ignore_ascii_case("zip")) {
                self.process_zip_file(&file).await
            } else {
                self.process_json_file(&file).await
            };

            match outcome {
                Ok(import) if import.is_success() => {
                    result.conversations_imported += import.imported_count;
                    result
                        .notes
                        .push(format!("{}: {}", file_name(&file), import));
                    if let Err(err) = archive_file(&file, &archive_folder) {
                        warn!(file = %file.display(), error = %err, "archiving failed");
                        result.errors.push(format!("{}: {err}", file_name(&file)));
                    }
                    result.files_succeeded += 1;
                }
                Ok(_) => {
                    let reason = "no conversations found in file";
                    record_failure(&file, &failed_folder, reason, &mut result);
                }
                Err(err) => {
                    record_failure(&file, &failed_folder, &err.to_string(), &mut result);
                }
            }
        }

        info!(
            processed = result.files_processed,
            succeeded = result.files_succeeded,
            failed = result.files_failed,
            imported = result.conversations_imported,
            "scan complete"
        );
        result
    }

    /// Extract a zip into a scoped temp dir, locate `conversations.json`
    /// (root or one level deep), and import it. The temp dir is removed on
    /// every exit path by `TempDir`'s drop.
    pub async fn process_zip_file(&self, zip_path: &Path) -> Result<ImportResult> {
        info!(file = %zip_path.display(), "processing zip file");

        let temp_dir = tempfile::tempdir().context("failed to create temp dir")?;
        extract_zip(zip_path, temp_dir.path())
            .with_context(|| format!("invalid or corrupted zip file: {}", zip_path.display()))?;

        let conversations_path = find_conversations_json(temp_dir.path())
            .ok_or_else(|| anyhow!("no conversations.json found in zip file"))?;

        let raw = fs::read_to_string(&conversations_path)
            .with_context(|| format!("failed to read {}", conversations_path.display()))?;
        let data: serde_json::Value =
            serde_json::from_str(&raw).context("invalid JSON in conversations.json")?;

        Ok(self.import.import_json(&data).await?)
    }

    pub async fn process_json_file(&self, json_path: &Path) -> Result<ImportResult> {
        info!(file = %json_path.display(), "processing JSON file");

        let raw = fs::read_to_string(json_path)
            .with_context(|| format!("failed to read {}", json_path.display()))?;
        let data: serde_json::Value = serde_json::from_str(&raw).context("invalid JSON file")?;
        Ok(self.import.import_json(&data).await?)
    }
}

fn collect_import_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder).context("failed to read watch folder")? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(dest)?;
    Ok(())
}

/// `conversations.json` at the extraction root, or one directory down
/// (exports commonly wrap everything in a single folder).
pub fn find_conversations_json(dir: &Path) -> Option<PathBuf> {
    let root = dir.join("conversations.json");
    if root.is_file() {
        return Some(root);
    }
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let nested = path.join("conversations.json");
            if nested.is_file() {
                return Some(nested);
            }
        }
    }
    None
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn stamped_name(path: &Path) -> (String, String) {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (format!("{stem}_{stamp}{ext}"), format!("{stem}_{stamp}.error.txt"))
}

/// Move a processed file into `archive/` with a timestamp suffix.
pub fn archive_file(path: &Path, archive_folder: &Path) -> Result<PathBuf> {
    let (name, _) = stamped_name(path);
    let dest = archive_folder.join(name);
    fs::rename(path, &dest).with_context(|| format!("failed to archive {}", path.display()))?;
    info!(file = %path.display(), dest = %dest.display(), "archived");
    Ok(dest)
}

/// Move a failed file into `failed/` and write an `.error.txt` sidecar with
/// the filename, UTC timestamp, and error text.
pub fn move_to_failed(path: &Path, failed_folder: &Path, error: &str) -> Result<PathBuf> {
    let (name, sidecar) = stamped_name(path);
    let dest = failed_folder.join(name);
    fs::rename(path, &dest).with_context(|| format!("failed to quarantine {}", path.display()))?;

    let log = format!(
        "File: {}\nTimestamp: {}\nError: {}\n",
        file_name(path),
        Utc::now().to_rfc3339(),
        error
    );
    fs::write(failed_folder.join(sidecar), log).context("failed to write error sidecar")?;

    info!(file = %path.display(), dest = %dest.display(), "moved to failed");
    Ok(dest)
}

fn record_failure(file: &Path, failed_folder: &Path, reason: &str, result: &mut WatchScanResult) {
    error!(file = %file.display(), reason, "file failed to import");
    result.files_failed += 1;
    result.errors.push(format!("{}: {reason}", file_name(file)));
    if let Err(err) = move_to_failed(file, failed_folder, reason) {
        error!(file = %file.display(), error = %err, "quarantine failed");
        result.errors.push(format!("{}: {err}", file_name(file)));
    }
}

/// Check a folder exists and is writable by creating and removing a probe
/// file.
pub fn validate_folder(folder: &Path) -> Result<()> {
    if !folder.exists() {
        return Err(anyhow!("folder does not exist: {}", folder.display()));
    }
    if !folder.is_dir() {
        return Err(anyhow!("path is not a directory: {}", folder.display()));
    }
    let probe = folder.join(".watch_folder_test");
    fs::write(&probe, b"")
        .with_context(|| format!("no write permission for folder: {}", folder.display()))?;
    fs::remove_file(&probe).ok();
    Ok(())
}

/// Settings-driven poller around [`WatchFolderService`].
pub struct WatchFolderWorker {
    pool: PgPool,
    service: WatchFolderService,
    running: RunFlag,
}

impl WatchFolderWorker {
    pub fn new(pool: PgPool, import: Arc<ImportService>, running: RunFlag) -> Self {
        Self {
            pool,
            service: WatchFolderService::new(import),
            running,
        }
    }

    /// Poll loop. Settings are re-read every iteration; the heartbeat is
    /// written every 30 s regardless of whether scanning is enabled.
    pub async fn run(&self) {
        info!("watch folder worker started");
        let mut last_heartbeat: Option<std::time::Instant> = None;
        let mut last_scan: Option<std::time::Instant> = None;

        while self.running.is_running() {
            if last_heartbeat.map_or(true, |t| t.elapsed() >= HEARTBEAT_INTERVAL) {
                if let Err(err) = self.write_setting(SETTING_WATCH_HEARTBEAT).await {
                    error!(error = %err, "failed to update heartbeat");
                }
                last_heartbeat = Some(std::time::Instant::now());
            }

            let (path, enabled, interval) = self.read_settings().await;
            let due = last_scan.map_or(true, |t| t.elapsed() >= interval);

            if enabled && due {
                last_scan = Some(std::time::Instant::now());
                if let Err(err) = self.write_setting(SETTING_WATCH_LAST_CHECK).await {
                    error!(error = %err, "failed to update last check");
                }
                match path {
                    Some(path) if !path.is_empty() => {
                        let result = self.service.scan_folder(Path::new(&path)).await;
                        for error in &result.errors {
                            warn!(%error, "watch folder error");
                        }
                    }
                    _ => debug!("watch folder enabled but no path configured"),
                }
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        info!("watch folder worker stopped");
    }

    async fn read_settings(&self) -> (Option<String>, bool, Duration) {
        let fallback = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS);
        let result: Result<(Option<String>, bool, Duration)> = async {
            let mut uow = UnitOfWork::begin(&self.pool).await?;
            let path = uow.settings().get_value(SETTING_WATCH_PATH).await?;
            let enabled = uow
                .settings()
                .get_value(SETTING_WATCH_ENABLED)
                .await?
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            let interval = uow
                .settings()
                .get_value(SETTING_WATCH_INTERVAL)
                .await?
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback);
            uow.commit().await?;
            Ok((path, enabled, interval))
        }
        .await;

        match result {
            Ok(settings) => settings,
            Err(err) => {
                error!(error = %err, "failed to read watch folder settings");
                (None, false, fallback)
            }
        }
    }

    async fn write_setting(&self, key: &str) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        uow.settings()
            .put(key, &Utc::now().to_rfc3339(), SETTINGS_CATEGORY)
            .await?;
        uow.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_conversations_json_at_root_and_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_conversations_json(dir.path()).is_none());

        let nested = dir.path().join("export-2024");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("conversations.json"), "[]").unwrap();
        let found = find_conversations_json(dir.path()).unwrap();
        assert!(found.ends_with("export-2024/conversations.json"));

        fs::write(dir.path().join("conversations.json"), "[]").unwrap();
        let found = find_conversations_json(dir.path()).unwrap();
        assert_eq!(found, dir.path().join("conversations.json"));
    }

    #[test]
    fn archive_and_failed_moves_are_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        let failed = dir.path().join("failed");
        fs::create_dir_all(&archive).unwrap();
        fs::create_dir_all(&failed).unwrap();

        let file = dir.path().join("export.json");
        fs::write(&file, "{}").unwrap();
        let dest = archive_file(&file, &archive).unwrap();
        assert!(!file.exists());
        let name = dest.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("export_"));
        assert!(name.ends_with(".json"));

        let bad = dir.path().join("broken.zip");
        fs::write(&bad, "not a zip").unwrap();
        move_to_failed(&bad, &failed, "boom").unwrap();
        assert!(!bad.exists());
        let sidecars: Vec<_> = fs::read_dir(&failed)
            .unwrap()
            .flatten()
            .filter(|e| e.path().to_string_lossy().ends_with(".error.txt"))
            .collect();
        assert_eq!(sidecars.len(), 1);
        let body = fs::read_to_string(sidecars[0].path()).unwrap();
        assert!(body.contains("broken.zip"));
        assert!(body.contains("boom"));
    }

    #[test]
    fn collect_skips_directories_and_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("b.ZIP"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();
        fs::write(dir.path().join("archive").join("old.json"), "{}").unwrap();

        let files = collect_import_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.ZIP"]);
    }

    #[test]
    fn validate_folder_rejects_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_folder(dir.path()).is_ok());
        assert!(validate_folder(&dir.path().join("missing")).is_err());

        let file = dir.path().join("a.json");
        fs::write(&file, "{}").unwrap();
        assert!(validate_folder(&file).is_err());
    }
}

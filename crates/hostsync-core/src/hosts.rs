// # Hosts File Store
//
// Owns the marker-delimited managed section of the target hosts file.
//
// ## File Layout
//
// ```text
// 127.0.0.1 localhost
// ::1       localhost
//
// # DevProxy managed entries - START
// 127.0.0.1 api.test
// 127.0.0.1 app.test
// # DevProxy managed entries - END
// ```
//
// Everything outside the section belongs to the user and is preserved
// byte for byte, whatever its encoding (apart from line terminators, which
// are normalized to `\n`, and trailing blank lines, which are collapsed into
// the single separator line written before the section).
//
// ## Atomic Writes
//
// The rewritten file goes to a temporary sibling first and is renamed over
// the target. The rename is the only commit point: a failed write or a
// failed rename leaves the target untouched and removes the temporary file.
//
// ## Locking
//
// One async mutex per `HostsFile` serializes every read-modify-write and
// every restore inside this process. Other processes editing the same file
// are not coordinated with.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::backup::BackupManager;
use crate::error::{Error, Result};

/// Suffix appended to the target file name for the temporary write
const TEMP_SUFFIX: &str = "hostsync.tmp";

/// The pair of marker lines delimiting the managed section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMarkers {
    start: String,
    end: String,
}

impl SectionMarkers {
    /// Markers of the form `# <product> managed entries - START` / `- END`
    pub fn for_product(product: &str) -> Self {
        Self {
            start: format!("# {} managed entries - START", product),
            end: format!("# {} managed entries - END", product),
        }
    }

    /// Opening marker line
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Closing marker line
    pub fn end(&self) -> &str {
        &self.end
    }
}

/// Split raw file content into lines
///
/// Same rules as [`str::lines`]: `\n` separates lines, a trailing `\r` is
/// dropped and a final terminator does not start an extra empty line. No
/// decoding happens, so bytes that are not UTF-8 pass through untouched.
fn split_lines(content: &[u8]) -> Vec<&[u8]> {
    if content.is_empty() {
        return Vec::new();
    }
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    body.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

fn is_marker(line: &[u8], marker: &str) -> bool {
    line.trim_ascii() == marker.as_bytes()
}

/// Extract the managed entries from hosts file content
///
/// The first line equal to the start marker (after trimming) opens the
/// section, the first end marker after it closes it. Blank lines and
/// comments inside are skipped; entries are returned trimmed, in file order.
/// A start marker without a matching end marker extends to end of file.
pub fn extract_managed_entries(content: &[u8], markers: &SectionMarkers) -> Vec<String> {
    let mut entries = Vec::new();
    let mut in_section = false;

    for line in split_lines(content) {
        if !in_section {
            if is_marker(line, &markers.start) {
                in_section = true;
            }
            continue;
        }
        if is_marker(line, &markers.end) {
            break;
        }
        let trimmed = line.trim_ascii();
        if !trimmed.is_empty() && !trimmed.starts_with(b"#") {
            entries.push(String::from_utf8_lossy(trimmed).into_owned());
        }
    }

    entries
}

/// Render `content` with its managed section replaced by `entries`
///
/// The first start marker through the first following end marker (both
/// inclusive) are dropped, trailing blank lines are trimmed, and, when
/// `entries` is non-empty, a blank separator plus a fresh section is
/// appended. The result always ends with exactly one newline.
///
/// An entry spanning several lines would leak out of the section, so entries
/// containing `\n` or `\r` are dropped with a warning.
pub fn render_managed_section(
    content: &[u8],
    entries: &[String],
    markers: &SectionMarkers,
) -> Vec<u8> {
    let mut lines: Vec<&[u8]> = Vec::new();
    // None: before the section, Some(true): inside, Some(false): past it
    let mut section: Option<bool> = None;

    for line in split_lines(content) {
        match section {
            None if is_marker(line, &markers.start) => section = Some(true),
            Some(true) => {
                if is_marker(line, &markers.end) {
                    section = Some(false);
                }
            }
            _ => lines.push(line),
        }
    }

    while lines.last().is_some_and(|line| line.trim_ascii().is_empty()) {
        lines.pop();
    }

    let entries: Vec<&[u8]> = entries
        .iter()
        .filter(|entry| {
            let multi_line = entry.contains(['\n', '\r']);
            if multi_line {
                tracing::warn!("Refusing multi-line hosts entry {:?}", entry);
            }
            !multi_line
        })
        .map(|entry| entry.trim().as_bytes())
        .filter(|entry| !entry.is_empty())
        .collect();

    if !entries.is_empty() {
        lines.push(b"");
        lines.push(markers.start.as_bytes());
        lines.extend(entries);
        lines.push(markers.end.as_bytes());
    }

    let mut rendered = lines.join(&b'\n');
    rendered.push(b'\n');
    rendered
}

/// Path of the temporary sibling used for atomic writes to `path`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hosts".to_string());
    path.with_file_name(format!("{}.{}", name, TEMP_SUFFIX))
}

/// Write `contents` to `path` via a temporary sibling and a rename
///
/// The target keeps its permissions when it already exists. On any failure
/// the temporary file is removed and the target is left as it was.
pub async fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);

    if let Err(e) = write_temp(&temp_path, contents).await {
        discard_temp(&temp_path).await;
        return Err(e);
    }

    if let Ok(metadata) = fs::metadata(path).await {
        if let Err(e) = fs::set_permissions(&temp_path, metadata.permissions()).await {
            tracing::debug!(
                "Could not copy permissions of {} to {}: {}",
                path.display(),
                temp_path.display(),
                e
            );
        }
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        discard_temp(&temp_path).await;
        return Err(Error::from_io(
            format_args!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            e,
        ));
    }

    tracing::trace!("Committed {} via atomic rename", path.display());
    Ok(())
}

async fn write_temp(temp_path: &Path, contents: &[u8]) -> Result<()> {
    let context = || format!("Failed to write temp file {}", temp_path.display());

    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| Error::from_io(context(), e))?;
    file.write_all(contents)
        .await
        .map_err(|e| Error::from_io(context(), e))?;
    file.sync_all()
        .await
        .map_err(|e| Error::from_io(context(), e))?;

    Ok(())
}

async fn discard_temp(temp_path: &Path) {
    match fs::remove_file(temp_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            "Failed to remove temp file {}: {}",
            temp_path.display(),
            e
        ),
    }
}

/// The target hosts file and its managed section
///
/// # Example
///
/// ```rust,no_run
/// use hostsync_core::hosts::{HostsFile, SectionMarkers};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let hosts = HostsFile::new("/etc/hosts", SectionMarkers::for_product("DevProxy"));
///
///     hosts.apply_entries(&["127.0.0.1 app.test".to_string()]).await?;
///     assert_eq!(hosts.managed_entries().await?, vec!["127.0.0.1 app.test"]);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct HostsFile {
    path: PathBuf,
    markers: SectionMarkers,
    lock: Mutex<()>,
}

impl HostsFile {
    /// Create a store for the file at `path`
    pub fn new<P: AsRef<Path>>(path: P, markers: SectionMarkers) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            markers,
            lock: Mutex::new(()),
        }
    }

    /// Target file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Section markers in use
    pub fn markers(&self) -> &SectionMarkers {
        &self.markers
    }

    /// Verify the target can be opened for read-write
    pub async fn check_permissions(&self) -> Result<()> {
        match fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                let hint = if cfg!(windows) {
                    "run the agent as Administrator"
                } else {
                    "run the agent with sudo"
                };
                Err(Error::permission(format!(
                    "cannot write {}: {}",
                    self.path.display(),
                    hint
                )))
            }
            Err(e) => Err(Error::from_io(
                format_args!("Failed to open {}", self.path.display()),
                e,
            )),
        }
    }

    /// Take the file lock
    ///
    /// Every read-modify-write and every restore holds it for its whole
    /// duration.
    pub(crate) async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Entries currently inside the managed section, in file order
    pub async fn managed_entries(&self) -> Result<Vec<String>> {
        let _guard = self.exclusive().await;
        let content = self.read_content().await?;
        Ok(extract_managed_entries(&content, &self.markers))
    }

    /// Replace the managed section with `entries`
    ///
    /// An empty `entries` removes the section altogether.
    pub async fn apply_entries(&self, entries: &[String]) -> Result<()> {
        let _guard = self.exclusive().await;
        let content = self.read_content().await?;
        self.commit(&content, entries).await
    }

    /// Snapshot the whole file into `backups`, then replace the section
    ///
    /// A failed snapshot aborts before the target is touched. Returns the
    /// path of the snapshot taken.
    pub async fn apply_entries_with_backup(
        &self,
        entries: &[String],
        backups: &BackupManager,
    ) -> Result<PathBuf> {
        let _guard = self.exclusive().await;
        let content = self.read_content().await?;
        let snapshot = backups.snapshot(&content).await?;
        self.commit(&content, entries).await?;
        Ok(snapshot)
    }

    /// Overwrite the whole file with the backup at `backup`
    ///
    /// The current content is snapshotted into `backups` first so the
    /// restore itself can be undone. If that snapshot fails the restore is
    /// aborted.
    pub async fn restore_from(&self, backup: &Path, backups: &BackupManager) -> Result<()> {
        let backup = backups.resolve(backup)?;

        let _guard = self.exclusive().await;

        let data = fs::read(&backup).await.map_err(|e| {
            Error::backup(format!("Failed to read backup {}: {}", backup.display(), e))
        })?;

        match self.read_content().await {
            Ok(current) => {
                backups.snapshot(&current).await?;
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read {} before restore, no pre-restore snapshot taken: {}",
                    self.path.display(),
                    e
                );
            }
        }

        write_atomically(&self.path, &data).await?;
        tracing::info!(
            "Restored {} from {}",
            self.path.display(),
            backup.display()
        );
        Ok(())
    }

    async fn read_content(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).await.map_err(|e| {
            Error::from_io(
                format_args!("Failed to read hosts file {}", self.path.display()),
                e,
            )
        })
    }

    async fn commit(&self, content: &[u8], entries: &[String]) -> Result<()> {
        let rendered = render_managed_section(content, entries, &self.markers);
        write_atomically(&self.path, &rendered).await
    }
}

use std::path::Path;

use ntt_types::{ErrorType, InodeKey};
use serde::{Deserialize, Serialize};

/// Source of kernel log text for [`diagnose_at_checkpoint`]. Injected so
/// tests can supply canned text instead of reading `/var/log/kern.log` or
/// shelling out to `dmesg`.
pub trait KernelLog {
    fn tail(&self, max_bytes: usize) -> std::io::Result<String>;
}

/// Reads the trailing bytes of a real kernel log file.
pub struct FileKernelLog {
    path: std::path::PathBuf,
}

impl FileKernelLog {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        FileKernelLog { path: path.into() }
    }
}

impl KernelLog for FileKernelLog {
    fn tail(&self, max_bytes: usize) -> std::io::Result<String> {
        let data = fs_err::read(&self.path)?;
        let start = data.len().saturating_sub(max_bytes);
        Ok(String::from_utf8_lossy(&data[start..]).into_owned())
    }
}

/// Default tail length scanned for kernel log signatures (spec §4.2 step 2).
pub const DEFAULT_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Permanent skip: the medium cannot produce this inode's content.
    DiagnosticSkip,
    /// Keep this inode eligible for another retry.
    Continuing,
}

/// A structured record of what was observed and decided at a retry
/// checkpoint, queued by the worker and flushed to `medium.problems` after
/// the batch commits (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub inode: InodeKey,
    pub error_type: ErrorType,
    pub checks: Vec<String>,
    pub action: Action,
    pub retry_count: u32,
}

fn scan_kernel_log_signatures(text: &str) -> Vec<String> {
    let lower = text.to_ascii_lowercase();
    let mut found = Vec::new();
    if lower.contains("beyond end of device") || lower.contains("beyond eof") {
        found.push("dmesg:beyond_eof".to_string());
    }
    if lower.contains("fat_error") || lower.contains("fat error") {
        found.push("dmesg:fat_error".to_string());
    }
    if lower.contains("i/o error") || lower.contains("input/output error") {
        found.push("dmesg:io_error".to_string());
    }
    found
}

/// Assembles a [`DiagnosticEvent`] at a retry checkpoint: classifies the
/// triggering error, scans a bounded kernel log tail for known signatures,
/// and stats the expected mount point (spec §4.2 step 2).
pub fn diagnose_at_checkpoint(
    inode: InodeKey,
    triggering_error: &std::io::Error,
    retry_count: u32,
    kernel_log: &dyn KernelLog,
    expected_mount_point: &Path,
    tail_bytes: usize,
) -> DiagnosticEvent {
    let error_type = ntt_hash::classify(triggering_error);
    let mut checks = Vec::new();

    match kernel_log.tail(tail_bytes) {
        Ok(text) => checks.extend(scan_kernel_log_signatures(&text)),
        Err(e) => {
            tracing::debug!(error = %e, "could not read kernel log for checkpoint diagnostics");
            checks.push("kernel_log:unreadable".to_string());
        }
    }

    match std::fs::metadata(expected_mount_point) {
        Ok(_) => checks.push("mount_point:present".to_string()),
        Err(_) => checks.push("mount_point:missing".to_string()),
    }

    let action = decide_action(error_type, &checks);
    DiagnosticEvent {
        inode,
        error_type,
        checks,
        action,
        retry_count,
    }
}

/// `diagnostic_skip` if `detected_beyond_eof`/`dmesg:beyond_eof` is present
/// or the classification is itself terminal (`io_error`, `hash_error`);
/// `continuing` otherwise (spec §4.2 step 3).
pub fn decide_action(error_type: ErrorType, checks: &[String]) -> Action {
    let beyond_eof = checks.iter().any(|c| c == "dmesg:beyond_eof");
    if beyond_eof || matches!(error_type, ErrorType::IoError | ErrorType::HashError) {
        Action::DiagnosticSkip
    } else {
        Action::Continuing
    }
}

/// The event recorded when [`crate::RetryLedger`] returns
/// `Disposition::ForceSkip` (spec §4.2 step 5): no diagnosis ran, but the
/// inode is skipped anyway to bound retry cost.
pub fn force_skip_event(inode: InodeKey, retry_count: u32) -> DiagnosticEvent {
    DiagnosticEvent {
        inode,
        error_type: ErrorType::Unknown,
        checks: vec!["forced:max_retry_exceeded".to_string()],
        action: Action::DiagnosticSkip,
        retry_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntt_types::MediumHash;

    struct CannedLog(&'static str);
    impl KernelLog for CannedLog {
        fn tail(&self, _max_bytes: usize) -> std::io::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn inode() -> InodeKey {
        InodeKey {
            medium_hash: "22".repeat(16).parse::<MediumHash>().unwrap(),
            device: 1,
            inode_number: 1,
        }
    }

    #[test]
    fn beyond_eof_signature_forces_diagnostic_skip() {
        let log = CannedLog("kernel: attempt to access beyond end of device sdb1");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "read failed");
        let event = diagnose_at_checkpoint(inode(), &err, 10, &log, Path::new("/nonexistent"), 4096);
        assert_eq!(event.action, Action::DiagnosticSkip);
        assert!(event.checks.contains(&"dmesg:beyond_eof".to_string()));
    }

    #[test]
    fn unrelated_kernel_log_text_keeps_retrying_for_retryable_errors() {
        let log = CannedLog("kernel: usb 1-1: new high-speed device");
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let event = diagnose_at_checkpoint(inode(), &err, 10, &log, Path::new("/nonexistent"), 4096);
        assert_eq!(event.action, Action::Continuing);
        assert_eq!(event.error_type, ErrorType::PermissionError);
    }

    #[test]
    fn io_error_classification_alone_forces_skip_without_a_kernel_signature() {
        let log = CannedLog("nothing relevant here");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "Input/output error");
        let event = diagnose_at_checkpoint(inode(), &err, 10, &log, Path::new("/nonexistent"), 4096);
        assert_eq!(event.action, Action::DiagnosticSkip);
    }

    #[test]
    fn force_skip_event_always_classifies_unknown() {
        let event = force_skip_event(inode(), 50);
        assert_eq!(event.error_type, ErrorType::Unknown);
        assert_eq!(event.action, Action::DiagnosticSkip);
    }
}

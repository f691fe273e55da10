//! Process memory sampling.
//!
//! Reads the resident set size of the current process so the recovery
//! controller can compare it against its memory threshold.

use std::io;

/// Bytes per megabyte as used by configuration thresholds
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Resident memory of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessMemory {
    /// Resident set size in bytes
    pub resident_bytes: u64,
}

impl ProcessMemory {
    /// Sample the current process
    ///
    /// # Errors
    ///
    /// Returns an error if the platform exposes no usable source.
    pub fn sample() -> io::Result<Self> {
        Ok(Self {
            resident_bytes: Self::detect_resident_bytes()?,
        })
    }

    pub fn resident_mb(&self) -> u64 {
        self.resident_bytes / BYTES_PER_MB
    }

    #[cfg(target_os = "linux")]
    fn detect_resident_bytes() -> io::Result<u64> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        parse_vm_rss(&status)
            .ok_or_else(|| io::Error::other("Failed to parse VmRSS from /proc/self/status"))
    }

    #[cfg(target_os = "macos")]
    fn detect_resident_bytes() -> io::Result<u64> {
        use std::process::Command;
        let output = Command::new("ps")
            .args(["-o", "rss=", "-p", &std::process::id().to_string()])
            .output()?;

        let rss = String::from_utf8_lossy(&output.stdout);
        rss.trim()
            .parse::<u64>()
            .map(|kb| kb * 1024)
            .map_err(io::Error::other)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn detect_resident_bytes() -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Process memory sampling not supported on this platform",
        ))
    }
}

/// Extract the VmRSS line (reported in kB) from a /proc status document
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

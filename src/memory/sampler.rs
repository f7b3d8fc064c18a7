//! Raw process and system memory sampling.
//!
//! Linux reads `/proc/meminfo` and `/proc/self/status`; macOS falls back to
//! `sysctl` for the system total. Platforms without a known source return a
//! neutral sample that never triggers batch-size adjustment.

/// One memory measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySample {
    /// Resident set size of this process as a percentage of system memory.
    pub process_memory_pct: f64,
    /// System-wide used memory percentage.
    pub system_memory_pct: f64,
    /// System memory still available, in megabytes.
    pub available_mb: f64,
    /// Resident set size of this process, in megabytes.
    pub process_rss_mb: f64,
}

impl MemorySample {
    /// The larger of the process and system percentages.
    #[must_use]
    pub fn peak_pct(&self) -> f64 {
        self.process_memory_pct.max(self.system_memory_pct)
    }
}

/// Takes a fresh measurement.
///
/// Never fails: missing telemetry yields a neutral (all-zero) sample.
#[must_use]
pub fn sample_memory() -> MemorySample {
    let Some((total, available)) = system_memory_bytes() else {
        return MemorySample::default();
    };
    if total == 0 {
        return MemorySample::default();
    }

    let rss = process_rss_bytes().unwrap_or(0);
    let used = total.saturating_sub(available);

    #[allow(clippy::cast_precision_loss)]
    MemorySample {
        process_memory_pct: rss as f64 / total as f64 * 100.0,
        system_memory_pct: used as f64 / total as f64 * 100.0,
        available_mb: available as f64 / (1024.0 * 1024.0),
        process_rss_mb: rss as f64 / (1024.0 * 1024.0),
    }
}

/// Total and available system memory in bytes.
fn system_memory_bytes() -> Option<(u64, u64)> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        let total = parse_meminfo_kb(&contents, "MemTotal:")?;
        // MemAvailable accounts for reclaimable caches; fall back to MemFree
        // on pre-3.14 kernels.
        let available = parse_meminfo_kb(&contents, "MemAvailable:")
            .or_else(|| parse_meminfo_kb(&contents, "MemFree:"))?;
        return Some((total * 1024, available * 1024));
    }

    #[cfg(target_os = "macos")]
    {
        use std::process::Command;
        let output = Command::new("sysctl").args(["-n", "hw.memsize"]).output().ok()?;
        let total: u64 = String::from_utf8(output.stdout).ok()?.trim().parse().ok()?;
        // macOS has no cheap "available" figure without host_statistics;
        // assume half the machine, which keeps the controller conservative.
        return Some((total, total / 2));
    }

    #[allow(unreachable_code)]
    None
}

/// Resident set size of the current process in bytes.
fn process_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/self/status").ok()?;
        return parse_meminfo_kb(&contents, "VmRSS:").map(|kb| kb * 1024);
    }

    #[allow(unreachable_code)]
    None
}

/// Parses a `Label:   12345 kB` line out of a /proc-style listing.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo_kb(contents: &str, label: &str) -> Option<u64> {
    for line in contents.lines() {
        if line.starts_with(label) {
            let mut parts = line.split_whitespace();
            let _ = parts.next();
            if let Some(value) = parts.next() {
                if let Ok(kb) = value.parse::<u64>() {
                    return Some(kb);
                }
            }
        }
    }
    None
}

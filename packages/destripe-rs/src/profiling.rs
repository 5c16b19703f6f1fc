//! Lightweight timing of pipeline stages.
//!
//! A `ProfileScope` logs its wall-clock lifetime when dropped and appends a
//! line to a persistent profile log, so long destriping runs can be compared
//! across sessions without a profiler attached.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

pub struct ProfileScope {
    label: String,
    start: Instant,
}

impl ProfileScope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }

    /// Seconds elapsed since the scope opened.
    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let ms = self.elapsed_s() * 1000.0;
        log::info!("[PROFILE] {} - {:.3}ms", self.label, ms);
        if let Err(e) = append_profile_line(&self.label, ms) {
            log::warn!("Failed to write profile log: {}", e);
        }
    }
}

fn profile_log_path() -> PathBuf {
    let app_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("destripe");
    std::fs::create_dir_all(&app_dir).ok();
    app_dir.join("pipeline_profile.log")
}

fn append_profile_line(label: &str, duration_ms: f64) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(profile_log_path())?;
    writeln!(
        file,
        "{} | {} | {:.3}ms",
        chrono::Utc::now().to_rfc3339(),
        label,
        duration_ms
    )?;
    Ok(())
}

/// Where profile lines end up, for surfacing to the user.
pub fn profile_log_location() -> String {
    profile_log_path()
        .to_str()
        .unwrap_or("Unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_monotonic() {
        let scope = ProfileScope::new("test");
        let a = scope.elapsed_s();
        let b = scope.elapsed_s();
        assert!(b >= a);
        assert!(a >= 0.0);
    }

    #[test]
    fn test_log_location_is_reported() {
        assert!(profile_log_location().contains("destripe"));
    }
}

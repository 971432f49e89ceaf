//! Snapshot of a configuration's lock and generations for `status`.

use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::fs::walker::{generation_stats, GenerationStats};
use crate::lock::{DirLock, LockState};
use crate::report::format_bytes;
use crate::retention::generation::generations_of;
use crate::retention::Period;
use crate::store;
use crate::utils::errors::Result;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub destination: String,
    pub lock: LockStatus,
    pub periods: Vec<PeriodStatus>,
}

#[derive(Debug, Serialize)]
pub struct LockStatus {
    pub path: String,
    /// `free`, `held`, `stale` or `starting`
    pub state: &'static str,
    pub pid: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct PeriodStatus {
    pub period: Period,
    pub keep: u32,
    pub generations: Vec<GenerationStatus>,
}

#[derive(Debug, Serialize)]
pub struct GenerationStatus {
    pub name: String,
    /// Outside the retention window; removed by the next rotation
    pub expired: bool,
    /// Only gathered for local destinations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<GenerationStats>,
}

impl From<LockState> for LockStatus {
    fn from(state: LockState) -> Self {
        let (state, pid) = match state {
            LockState::Free => ("free", None),
            LockState::Held { pid } => ("held", Some(pid)),
            LockState::Stale { pid } => ("stale", pid),
            LockState::Starting => ("starting", None),
        };
        Self {
            path: String::new(),
            state,
            pid,
        }
    }
}

/// Inspect the lock and list every generation of `config`.
pub fn collect(config: &Config) -> Result<StatusReport> {
    let lock = DirLock::new(config.lock_path());
    let mut lock_status = LockStatus::from(lock.state()?);
    lock_status.path = lock.path().display().to_string();

    let store = store::from_config(config);
    let names = store.list()?;

    let periods = Period::ALL
        .iter()
        .map(|period| {
            let keep = config.retention.keep(*period);
            let generations = generations_of(*period, names.iter().map(String::as_str))
                .into_iter()
                .map(|generation| {
                    let name = generation.dir_name();
                    let stats = if config.is_remote() {
                        None
                    } else {
                        match generation_stats(&config.destination.join(&name)) {
                            Ok(stats) => Some(stats),
                            Err(e) => {
                                warn!("Cannot read {name}: {e}");
                                None
                            }
                        }
                    };
                    GenerationStatus {
                        name,
                        expired: generation.slot >= keep,
                        stats,
                    }
                })
                .collect();
            PeriodStatus {
                period: *period,
                keep,
                generations,
            }
        })
        .collect();

    Ok(StatusReport {
        name: config.name.clone(),
        destination: store.describe(),
        lock: lock_status,
        periods,
    })
}

impl StatusReport {
    /// Human readable rendering.
    pub fn render(&self) -> String {
        let mut text = format!("{} -> {}\n", self.name, self.destination);
        match self.lock.pid {
            Some(pid) => text.push_str(&format!("lock: {} (pid {pid})\n", self.lock.state)),
            None => text.push_str(&format!("lock: {}\n", self.lock.state)),
        }

        for period in &self.periods {
            if period.keep == 0 && period.generations.is_empty() {
                continue;
            }
            text.push_str(&format!(
                "{}: {} of {} kept\n",
                period.period,
                period.generations.iter().filter(|g| !g.expired).count(),
                period.keep
            ));
            for generation in &period.generations {
                text.push_str(&format!("  {}", generation.name));
                if let Some(stats) = &generation.stats {
                    text.push_str(&format!(
                        "  {} files, {}, {} not shared",
                        stats.files,
                        format_bytes(stats.bytes),
                        format_bytes(stats.unique_bytes)
                    ));
                }
                if generation.expired {
                    text.push_str("  (expired)");
                }
                text.push('\n');
            }
        }
        text
    }
}

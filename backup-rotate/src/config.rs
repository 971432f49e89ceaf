//! Configuration management for backup-rotate.
//!
//! Loads one named configuration from a TOML file with environment variable
//! overrides (`BACKUP_ROTATE__RETENTION__DAILY=3`). The configuration is
//! immutable once loaded.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retention::Period;
use crate::utils::errors::{Result, RotateError};

/// Directory searched when a configuration is given by name.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/backup-rotate";

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "BACKUP_ROTATE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration name (file stem), keys the lock and the report
    #[serde(skip)]
    pub name: String,

    /// Local directory to back up
    pub source: PathBuf,

    /// Directory holding the generation directories
    pub destination: PathBuf,

    /// `[user@]host` holding the destination, reached through ssh
    #[serde(default)]
    pub server: Option<String>,

    /// Extra arguments for every ssh invocation
    #[serde(default)]
    pub ssh_options: Vec<String>,

    /// Program plus leading arguments used to reach `server`
    #[serde(default = "default_ssh_command")]
    pub ssh_command: Vec<String>,

    /// Program plus leading arguments used to run rsync
    #[serde(default = "default_rsync_command")]
    pub rsync_command: Vec<String>,

    /// Extra rsync flags appended after the defaults
    #[serde(default)]
    pub rsync_options: Vec<String>,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    /// Bind mounts held for the duration of a run
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// Directory holding `<name>.lock`
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Number of generations kept per period. Zero disables the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_daily")]
    pub daily: u32,

    #[serde(default = "default_weekly")]
    pub weekly: u32,

    #[serde(default = "default_monthly")]
    pub monthly: u32,

    #[serde(default)]
    pub yearly: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Day weekly backups run
    #[serde(default = "default_weekday")]
    pub weekday: Weekday,

    /// Day of month monthly backups run (clamped to the month's length)
    #[serde(default = "default_month_day")]
    pub month_day: u32,

    /// Month the yearly backup runs, on `month_day`
    #[serde(default = "default_year_month")]
    pub year_month: u32,
}

/// Shell commands run around the backup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub before: Vec<String>,

    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub failed: Vec<String>,

    #[serde(default)]
    pub finally: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub source: PathBuf,
    pub target: PathBuf,

    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailWhen {
    #[default]
    Always,
    Failure,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Report recipient; no report is sent when unset
    #[serde(default)]
    pub to: Option<String>,

    /// Sender, defaults to `backup-rotate@<hostname>`
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub when: MailWhen,

    /// Mail submission command, message on stdin
    #[serde(default = "default_sendmail")]
    pub sendmail: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_rsync_command() -> Vec<String> {
    vec!["rsync".to_string()]
}

fn default_ssh_command() -> Vec<String> {
    vec!["ssh".to_string()]
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/var/lock/backup-rotate")
}

fn default_daily() -> u32 {
    7
}

fn default_weekly() -> u32 {
    4
}

fn default_monthly() -> u32 {
    12
}

fn default_weekday() -> Weekday {
    Weekday::Sun
}

fn default_month_day() -> u32 {
    1
}

fn default_year_month() -> u32 {
    1
}

fn default_sendmail() -> Vec<String> {
    vec![
        "/usr/sbin/sendmail".to_string(),
        "-t".to_string(),
        "-oi".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: default_daily(),
            weekly: default_weekly(),
            monthly: default_monthly(),
            yearly: 0,
        }
    }
}

impl RetentionConfig {
    /// Generations kept for `period`.
    pub fn keep(&self, period: Period) -> u32 {
        match period {
            Period::Daily => self.daily,
            Period::Weekly => self.weekly,
            Period::Monthly => self.monthly,
            Period::Yearly => self.yearly,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            weekday: default_weekday(),
            month_day: default_month_day(),
            year_month: default_year_month(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            to: None,
            from: None,
            when: MailWhen::default(),
            sendmail: default_sendmail(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Resolve a configuration argument to a file.
///
/// Anything that looks like a path (contains a separator or ends in `.toml`)
/// is used as is; a bare name becomes `<config_dir>/<name>.toml`.
pub fn resolve_path(arg: &str, config_dir: &Path) -> PathBuf {
    if arg.contains('/') || arg.ends_with(".toml") {
        PathBuf::from(arg)
    } else {
        config_dir.join(format!("{arg}.toml"))
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RotateError::Config(format!(
                "configuration file {} not found",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(true),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without environment overrides.
    pub fn from_toml_str(name: &str, content: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.name = name.to_string();
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RotateError::Config(e.to_string()))
    }

    /// Whether the destination lives on a remote host.
    pub fn is_remote(&self) -> bool {
        self.server.is_some()
    }

    /// Lock directory path for this configuration.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_dir.join(format!("{}.lock", self.name))
    }

    fn validate(&self) -> Result<()> {
        if !self.destination.is_absolute() {
            return Err(RotateError::Config(format!(
                "destination must be an absolute path, got {}",
                self.destination.display()
            )));
        }

        if self.source.as_os_str().is_empty() {
            return Err(RotateError::Config("source must not be empty".to_string()));
        }

        if Period::ALL.iter().all(|p| self.retention.keep(*p) == 0) {
            return Err(RotateError::Config(
                "at least one retention count must be non-zero".to_string(),
            ));
        }

        if !(1..=31).contains(&self.schedule.month_day) {
            return Err(RotateError::Config(format!(
                "schedule.month_day must be within 1..=31, got {}",
                self.schedule.month_day
            )));
        }

        if !(1..=12).contains(&self.schedule.year_month) {
            return Err(RotateError::Config(format!(
                "schedule.year_month must be within 1..=12, got {}",
                self.schedule.year_month
            )));
        }

        if self.rsync_command.is_empty() {
            return Err(RotateError::Config("rsync_command must not be empty".to_string()));
        }

        if self.ssh_command.is_empty() {
            return Err(RotateError::Config("ssh_command must not be empty".to_string()));
        }

        if self.mail.sendmail.is_empty() {
            return Err(RotateError::Config("mail.sendmail must not be empty".to_string()));
        }

        if let Some(server) = &self.server {
            if server.trim().is_empty() {
                return Err(RotateError::Config("server must not be empty".to_string()));
            }
        }

        for mount in &self.mounts {
            if !mount.target.is_absolute() {
                return Err(RotateError::Config(format!(
                    "mount target must be an absolute path, got {}",
                    mount.target.display()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
        source = "/home"
        destination = "/backup/home"
    "#;

    #[test]
    fn test_minimal_defaults() {
        let config = Config::from_toml_str("home", MINIMAL).unwrap();

        assert_eq!(config.name, "home");
        assert_eq!(config.retention, RetentionConfig::default());
        assert_eq!(config.schedule.weekday, Weekday::Sun);
        assert_eq!(config.schedule.month_day, 1);
        assert_eq!(config.rsync_command, vec!["rsync".to_string()]);
        assert_eq!(config.ssh_command, vec!["ssh".to_string()]);
        assert_eq!(config.mail.when, MailWhen::Always);
        assert!(config.mail.to.is_none());
        assert!(!config.is_remote());
        assert_eq!(config.lock_path(), PathBuf::from("/var/lock/backup-rotate/home.lock"));
    }

    #[test]
    fn test_full_config() {
        let content = r#"
            source = "/srv/www"
            destination = "/data/backups/www"
            server = "backup@nas.example.org"
            ssh_options = ["-p", "2222"]
            rsync_command = ["nice", "-n", "19", "rsync"]
            rsync_options = ["--exclude=cache/"]
            lock_dir = "/run/lock"

            [retention]
            daily = 14
            weekly = 8
            monthly = 6
            yearly = 3

            [schedule]
            weekday = "Mon"
            month_day = 15
            year_month = 6

            [hooks]
            before = ["mysqldump --all-databases > /srv/www/db.sql"]
            finally = ["rm -f /srv/www/db.sql"]

            [[mounts]]
            source = "/var/lib/mysql"
            target = "/mnt/mysql"
            read_only = true

            [mail]
            to = "root@example.org"
            when = "failure"
        "#;

        let config = Config::from_toml_str("www", content).unwrap();
        assert!(config.is_remote());
        assert_eq!(config.ssh_options, vec!["-p", "2222"]);
        assert_eq!(config.retention.keep(Period::Daily), 14);
        assert_eq!(config.retention.keep(Period::Yearly), 3);
        assert_eq!(config.schedule.weekday, Weekday::Mon);
        assert_eq!(config.schedule.year_month, 6);
        assert_eq!(config.hooks.before.len(), 1);
        assert!(config.hooks.after.is_empty());
        assert_eq!(config.mounts.len(), 1);
        assert!(config.mounts[0].read_only);
        assert_eq!(config.mail.when, MailWhen::Failure);
        assert_eq!(config.lock_path(), PathBuf::from("/run/lock/www.lock"));
    }

    #[test]
    fn test_rejects_relative_destination() {
        let content = r#"
            source = "/home"
            destination = "backup"
        "#;
        let err = Config::from_toml_str("home", content).unwrap_err();
        assert!(matches!(err, RotateError::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_rejects_zero_retention() {
        let content = r#"
            source = "/home"
            destination = "/backup"

            [retention]
            daily = 0
            weekly = 0
            monthly = 0
        "#;
        assert!(Config::from_toml_str("home", content).is_err());
    }

    #[test]
    fn test_rejects_bad_schedule() {
        let content = r#"
            source = "/home"
            destination = "/backup"

            [schedule]
            month_day = 32
        "#;
        assert!(Config::from_toml_str("home", content).is_err());
    }

    #[test]
    fn test_missing_source_is_settings_error() {
        let err = Config::from_toml_str("home", r#"destination = "/backup""#).unwrap_err();
        assert!(matches!(err, RotateError::Settings(_)));
    }

    #[test]
    fn test_from_file_uses_stem_as_name() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mail-server.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.name, "mail-server");
        assert_eq!(config.destination, PathBuf::from("/backup/home"));
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("env-home.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        std::env::set_var("BACKUP_ROTATE__RETENTION__DAILY", "3");
        std::env::set_var("BACKUP_ROTATE__SCHEDULE__MONTH_DAY", "15");
        // Single underscore after the prefix does not match
        std::env::set_var("BACKUP_ROTATE_RETENTION__WEEKLY", "99");

        let config = Config::from_file(&path);

        std::env::remove_var("BACKUP_ROTATE__RETENTION__DAILY");
        std::env::remove_var("BACKUP_ROTATE__SCHEDULE__MONTH_DAY");
        std::env::remove_var("BACKUP_ROTATE_RETENTION__WEEKLY");

        let config = config.unwrap();
        assert_eq!(config.retention.daily, 3);
        assert_eq!(config.schedule.month_day, 15);
        assert_eq!(config.retention.weekly, default_weekly());
        assert_eq!(config.name, "env-home");
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/backup-rotate.toml")).unwrap_err();
        assert!(matches!(err, RotateError::Config(_)));
    }

    #[test]
    fn test_resolve_path() {
        let dir = Path::new("/etc/backup-rotate");
        assert_eq!(resolve_path("home", dir), PathBuf::from("/etc/backup-rotate/home.toml"));
        assert_eq!(resolve_path("./home.toml", dir), PathBuf::from("./home.toml"));
        assert_eq!(resolve_path("other.toml", dir), PathBuf::from("other.toml"));
        assert_eq!(resolve_path("/tmp/x", dir), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_to_toml_round_trips_through_parser() {
        let config = Config::from_toml_str("home", MINIMAL).unwrap();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("destination = \"/backup/home\""));

        let reparsed = Config::from_toml_str("home", &rendered).unwrap();
        assert_eq!(reparsed.retention, config.retention);
    }
}

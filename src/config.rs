//! Configuration loader and validator for the print station.
use crate::actions::ActionSpec;
use crate::scheduler::TaskKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub printer: Printer,
    #[serde(default)]
    pub button: Button,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub mail: Mail,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub startup: Startup,
}

/// Serial thermal printer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Printer {
    /// When false, jobs are written to the log instead of a device.
    #[serde(default = "yes")]
    pub enabled: bool,
    pub device: PathBuf,
    pub baud: u32,
}

/// Push button and indicator LED on sysfs GPIO.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Button {
    pub enabled: bool,
    pub gpio_root: PathBuf,
    pub pin: u32,
    pub led_pin: Option<u32>,
    pub active_low: bool,
    pub poll_ms: u64,
    pub tap_debounce_ms: u64,
    pub hold_ms: u64,
    pub tap: Vec<ActionSpec>,
    pub hold: Vec<ActionSpec>,
}

impl Default for Button {
    fn default() -> Self {
        Self {
            enabled: false,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            pin: 23,
            led_pin: Some(18),
            active_low: true,
            poll_ms: 5,
            tap_debounce_ms: 10,
            hold_ms: 2000,
            tap: Vec::new(),
            hold: Vec::new(),
        }
    }
}

impl Button {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn tap_debounce(&self) -> Duration {
        Duration::from_millis(self.tap_debounce_ms)
    }

    pub fn hold_time(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Schedule {
    pub tick_ms: u64,
    pub tasks: Vec<Task>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            tasks: Vec::new(),
        }
    }
}

/// One recurring task; exactly one of `every_secs` / `daily_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub every_secs: Option<u64>,
    /// Local wall-clock time, `HH:MM`.
    #[serde(default)]
    pub daily_at: Option<String>,
    #[serde(default)]
    pub catch_up: bool,
    pub actions: Vec<ActionSpec>,
}

impl Task {
    pub fn kind(&self) -> Result<TaskKind, ConfigError> {
        match (self.every_secs, self.daily_at.as_deref()) {
            (Some(0), None) => Err(invalid(format!("schedule.tasks[{}].every_secs must be > 0", self.name))),
            (Some(secs), None) => Ok(TaskKind::Interval(Duration::from_secs(secs))),
            (None, Some(at)) => {
                let (hour, minute) = parse_hhmm(at).ok_or_else(|| {
                    invalid(format!("schedule.tasks[{}].daily_at must be HH:MM, got {at:?}", self.name))
                })?;
                Ok(TaskKind::DailyAt { hour, minute })
            }
            _ => Err(invalid(format!(
                "schedule.tasks[{}] needs exactly one of every_secs or daily_at",
                self.name
            ))),
        }
    }
}

/// Parse `HH:MM` (24h).
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Mail {
    pub enabled: bool,
    pub spool_dir: PathBuf,
    pub check_every_secs: u64,
    pub allowed_senders: Vec<String>,
    pub allowed_recipients: Vec<String>,
    pub printable_exts: Vec<String>,
    pub delete_processed: bool,
}

impl Default for Mail {
    fn default() -> Self {
        Self {
            enabled: false,
            spool_dir: PathBuf::from("/var/spool/thermo-station/inbox"),
            check_every_secs: 30,
            allowed_senders: Vec::new(),
            allowed_recipients: Vec::new(),
            printable_exts: crate::mail::DEFAULT_PRINTABLE_EXTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            delete_processed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Http {
    pub enabled: bool,
    pub bind: String,
    pub secret: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0:8080".to_string(),
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Startup {
    pub delay_secs: u64,
    pub check_network: bool,
    pub probe_addr: String,
    pub greeting: Option<PathBuf>,
}

impl Default for Startup {
    fn default() -> Self {
        Self {
            delay_secs: 0,
            check_network: true,
            probe_addr: crate::startup::DEFAULT_PROBE_ADDR.to_string(),
            greeting: None,
        }
    }
}

impl Startup {
    pub fn options(&self) -> crate::startup::StartupOptions {
        crate::startup::StartupOptions {
            delay: Duration::from_secs(self.delay_secs),
            check_network: self.check_network,
            probe_addr: self.probe_addr.clone(),
            greeting: self.greeting.clone(),
        }
    }
}

fn yes() -> bool {
    true
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate YAML text.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.printer.enabled {
        if cfg.printer.device.as_os_str().is_empty() {
            return Err(invalid("printer.device must be non-empty"));
        }
        if cfg.printer.baud == 0 {
            return Err(invalid("printer.baud must be > 0"));
        }
    }

    let b = &cfg.button;
    if b.enabled {
        if b.poll_ms == 0 {
            return Err(invalid("button.poll_ms must be > 0"));
        }
        if b.tap_debounce_ms >= b.hold_ms {
            return Err(invalid("button.tap_debounce_ms must be less than button.hold_ms"));
        }
        if b.led_pin == Some(b.pin) {
            return Err(invalid("button.led_pin must differ from button.pin"));
        }
    }

    if cfg.schedule.tick_ms == 0 {
        return Err(invalid("schedule.tick_ms must be > 0"));
    }
    let mut names = std::collections::HashSet::new();
    for task in &cfg.schedule.tasks {
        if task.name.trim().is_empty() {
            return Err(invalid("schedule.tasks[].name must be non-empty"));
        }
        if task.name == MAIL_TASK || !names.insert(task.name.as_str()) {
            return Err(invalid(format!("schedule task name {:?} is taken", task.name)));
        }
        task.kind()?;
    }

    let m = &cfg.mail;
    if m.enabled {
        if m.spool_dir.as_os_str().is_empty() {
            return Err(invalid("mail.spool_dir must be non-empty"));
        }
        if m.check_every_secs == 0 {
            return Err(invalid("mail.check_every_secs must be > 0"));
        }
        // empty lists would silently accept nothing
        if m.allowed_senders.iter().all(|s| s.trim().is_empty()) {
            return Err(invalid("mail.allowed_senders must list at least one sender"));
        }
        if m.allowed_recipients.iter().all(|s| s.trim().is_empty()) {
            return Err(invalid("mail.allowed_recipients must list at least one recipient"));
        }
    }

    if cfg.http.enabled {
        if cfg.http.secret.trim().is_empty() {
            return Err(invalid("http.secret must be non-empty"));
        }
        if cfg.http.bind.trim().is_empty() {
            return Err(invalid("http.bind must be non-empty"));
        }
    }

    if cfg.startup.check_network && cfg.startup.probe_addr.trim().is_empty() {
        return Err(invalid("startup.probe_addr must be non-empty"));
    }

    Ok(())
}

/// Name of the built-in mail polling task.
pub const MAIL_TASK: &str = "mail";

/// A complete, valid sample configuration.
pub fn example() -> &'static str {
    r#"printer:
  enabled: true
  device: /dev/serial0
  baud: 19200

button:
  enabled: true
  gpio_root: /sys/class/gpio
  pin: 23
  led_pin: 18
  active_low: true
  poll_ms: 5
  tap_debounce_ms: 10
  hold_ms: 2000
  tap:
    - type: command
      program: python3
      args: [timetemp.py]
  hold:
    - type: shutdown
      image: gfx/goodbye.png

schedule:
  tick_ms: 1000
  tasks:
    - name: feed
      every_secs: 30
      actions:
        - type: command
          program: python3
          args: [twitter.py]
          carry_state: true
    - name: morning
      daily_at: "06:30"
      actions:
        - type: command
          program: python3
          args: [forecast.py]
        - type: command
          program: python3
          args: [sudoku-gfx.py]

mail:
  enabled: true
  spool_dir: /var/spool/thermo-station/inbox
  check_every_secs: 30
  allowed_senders: [alice@example.com]
  allowed_recipients: [printer@example.com]
  printable_exts: [png, jpg, jpeg, gif, bmp]
  delete_processed: true

http:
  enabled: true
  bind: 0.0.0.0:8080
  secret: change-me

startup:
  delay_secs: 30
  check_network: true
  probe_addr: 8.8.8.8:80
  greeting: gfx/hello.png
"#
}

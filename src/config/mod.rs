// Runtime configuration, loaded from an optional TOML file plus environment
use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::risk::DrawdownLockConfig;
use crate::strategy::StrategyKind;

fn default_interval() -> String {
    "5min".to_string()
}
fn default_warmup_days() -> u32 {
    5
}
fn default_equity() -> f64 {
    100_000.0
}
fn default_max_open() -> u32 {
    3
}
fn default_journal_url() -> String {
    "sqlite://data/journal.db".to_string()
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_status_dir() -> String {
    "logs".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskSettings {
    pub daily_risk_fraction: f64,
    pub per_trade_fraction: f64,
    #[serde(default = "RiskSettings::default_max_trades")]
    pub max_trades_per_day: u32,
    #[serde(default = "RiskSettings::default_loss_stop")]
    pub daily_loss_stop_r: f64,
    #[serde(default = "RiskSettings::default_win_stop")]
    pub daily_win_stop_r: f64,
    #[serde(default = "RiskSettings::default_global_stop")]
    pub global_daily_stop_r: f64,
    #[serde(default = "RiskSettings::default_min_units")]
    pub min_units: u32,
}

impl RiskSettings {
    fn default_max_trades() -> u32 {
        3
    }
    fn default_loss_stop() -> f64 {
        -2.0
    }
    fn default_win_stop() -> f64 {
        6.0
    }
    fn default_global_stop() -> f64 {
        -5.0
    }
    fn default_min_units() -> u32 {
        1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParitySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "ParitySettings::default_lookback")]
    pub lookback_days: u32,
    #[serde(default = "ParitySettings::default_floor")]
    pub floor: f64,
    #[serde(default = "ParitySettings::default_cap")]
    pub cap: f64,
}

impl ParitySettings {
    fn default_lookback() -> u32 {
        20
    }
    fn default_floor() -> f64 {
        0.15
    }
    fn default_cap() -> f64 {
        0.60
    }
}

impl Default for ParitySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            lookback_days: Self::default_lookback(),
            floor: Self::default_floor(),
            cap: Self::default_cap(),
        }
    }
}

/// Session window as HH:MM strings, parsed by the scheduler at startup
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    pub start: String,
    pub end: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            start: "07:00".to_string(),
            end: "16:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NewsSettings {
    pub calendar_path: Option<String>,
    #[serde(default = "NewsSettings::default_pad")]
    pub pad_before_m: i64,
    #[serde(default = "NewsSettings::default_pad")]
    pub pad_after_m: i64,
}

impl NewsSettings {
    fn default_pad() -> i64 {
        30
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "BrokerSettings::default_env")]
    pub env: String,
    #[serde(default = "BrokerSettings::default_lookback")]
    pub tag_lookback_hours: i64,
    #[serde(default = "BrokerSettings::default_flatten")]
    pub flatten_on_conflict: bool,
}

impl BrokerSettings {
    fn default_env() -> String {
        "practice".to_string()
    }
    fn default_lookback() -> i64 {
        24
    }
    fn default_flatten() -> bool {
        true
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            env: Self::default_env(),
            tag_lookback_hours: Self::default_lookback(),
            flatten_on_conflict: Self::default_flatten(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifySettings {
    pub discord_webhook: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub symbols: Vec<String>,
    pub strategies: Vec<StrategyKind>,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_warmup_days")]
    pub warmup_days: u32,
    #[serde(default = "default_equity")]
    pub equity_usd: f64,
    #[serde(default = "default_max_open")]
    pub max_open_positions: u32,
    pub risk: RiskSettings,
    #[serde(default)]
    pub parity: ParitySettings,
    #[serde(default)]
    pub drawdown: DrawdownLockConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub news: NewsSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default = "default_journal_url")]
    pub journal_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_status_dir")]
    pub status_dir: String,
    #[serde(default)]
    pub notify: NotifySettings,
}

impl Settings {
    /// Load from an optional TOML file with `FXPORT_*` environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FXPORT")
                .separator("__")
                .list_separator(",")
                .try_parsing(true)
                .with_list_parse_key("symbols")
                .with_list_parse_key("strategies"),
        );

        let settings: Settings = builder
            .build()
            .context("failed to assemble configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Fail-fast validation before any engine is constructed
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("config error: symbols list is empty");
        }
        if self.strategies.is_empty() {
            bail!("config error: strategies list is empty");
        }
        if !(0.0..1.0).contains(&self.risk.daily_risk_fraction)
            || self.risk.daily_risk_fraction <= 0.0
        {
            bail!(
                "config error: daily_risk_fraction {} out of (0, 1)",
                self.risk.daily_risk_fraction
            );
        }
        if !(0.0..1.0).contains(&self.risk.per_trade_fraction) || self.risk.per_trade_fraction <= 0.0
        {
            bail!(
                "config error: per_trade_fraction {} out of (0, 1)",
                self.risk.per_trade_fraction
            );
        }
        if self.equity_usd <= 0.0 {
            bail!("config error: equity_usd must be positive");
        }
        if self.risk.global_daily_stop_r >= 0.0 {
            bail!("config error: global_daily_stop_r must be negative");
        }
        if self.parity.floor > self.parity.cap {
            bail!(
                "config error: parity floor {} exceeds cap {}",
                self.parity.floor,
                self.parity.cap
            );
        }
        Ok(())
    }
}

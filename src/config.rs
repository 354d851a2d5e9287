use crate::error::{CapmcError, CapmcResult};
use crate::model::{ComponentType, PowerAction};

use lazy_static::lazy_static;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ACTION_MAX_WORKERS: usize = 1000;
pub const DEFAULT_WAIT_FOR_OFF_RETRIES: u32 = 60;
pub const DEFAULT_WAIT_FOR_OFF_SLEEP_SECS: u64 = 15;

/// Reset type that toggles power and so needs a status check first.
pub const PUSH_POWER_BUTTON: &str = "PushPowerButton";

lazy_static! {
    static ref POWER_ON_SEQUENCE: Vec<ComponentType> = vec![
        ComponentType::CabinetPDUPowerConnector,
        ComponentType::CabinetPDUOutlet,
        ComponentType::Chassis,
        ComponentType::RouterModule,
        ComponentType::HSNBoard,
        ComponentType::ComputeModule,
        ComponentType::Node,
    ];
    static ref POWER_OFF_SEQUENCE: Vec<ComponentType> =
        POWER_ON_SEQUENCE.iter().rev().cloned().collect();

    /// Power controls used when no configuration file overrides them.
    /// Reset types are listed from most to least preferred.
    pub static ref DEFAULT_POWER_CONTROLS: HashMap<String, PowerCtl> = {
        let mut controls = HashMap::new();
        let mut add = |action: PowerAction, sequence: &[ComponentType], resets: &[&str]| {
            controls.insert(
                action.to_string(),
                PowerCtl {
                    block_role: Vec::new(),
                    component_sequence: sequence.to_vec(),
                    reset_type: resets.iter().map(|r| (*r).to_string()).collect(),
                },
            );
        };
        add(PowerAction::On, &POWER_ON_SEQUENCE, &["On", "ForceOn", PUSH_POWER_BUTTON]);
        add(PowerAction::ForceOn, &POWER_ON_SEQUENCE, &["ForceOn"]);
        add(PowerAction::Off, &POWER_OFF_SEQUENCE, &["GracefulShutdown", "Off", PUSH_POWER_BUTTON]);
        add(PowerAction::ForceOff, &POWER_OFF_SEQUENCE, &["ForceOff"]);
        add(PowerAction::Restart, &[ComponentType::Node], &["GracefulRestart"]);
        add(PowerAction::ForceRestart, &[ComponentType::Node], &["ForceRestart", "PowerCycle"]);
        add(PowerAction::Nmi, &[ComponentType::Node], &["Nmi"]);
        controls
    };
}

/// What to do when a restart is requested against a target that cannot
/// restart itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnsupportedAction {
    /// Emulate the restart with an Off followed by an On
    #[default]
    Simulate,
    Error,
    Ignore,
}

impl fmt::Display for OnUnsupportedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OnUnsupportedAction::Simulate => "simulate",
            OnUnsupportedAction::Error => "error",
            OnUnsupportedAction::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PowerCtl {
    pub block_role: Vec<String>,
    pub component_sequence: Vec<ComponentType>,
    pub reset_type: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CapmcConfiguration {
    pub action_max_workers: usize,
    pub on_unsupported_action: OnUnsupportedAction,
    pub reinit_action_seq: Vec<PowerAction>,
    pub wait_for_off_retries: u32,
    /// Seconds between Off polls
    pub wait_for_off_sleep: u64,
}

impl Default for CapmcConfiguration {
    fn default() -> Self {
        Self {
            action_max_workers: DEFAULT_ACTION_MAX_WORKERS,
            on_unsupported_action: OnUnsupportedAction::default(),
            reinit_action_seq: vec![
                PowerAction::Off,
                PowerAction::ForceOff,
                PowerAction::Restart,
                PowerAction::ForceRestart,
                PowerAction::On,
                PowerAction::ForceOn,
                PowerAction::Nmi,
            ],
            wait_for_off_retries: DEFAULT_WAIT_FOR_OFF_RETRIES,
            wait_for_off_sleep: DEFAULT_WAIT_FOR_OFF_SLEEP_SECS,
        }
    }
}

impl CapmcConfiguration {
    #[must_use]
    pub fn wait_for_off_sleep(&self) -> Duration {
        Duration::from_secs(self.wait_for_off_sleep)
    }
}

/// Service configuration, read from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "PowerControls")]
    pub power_controls: HashMap<String, PowerCtl>,
    #[serde(rename = "CapmcConfiguration")]
    pub capmc: CapmcConfiguration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            power_controls: DEFAULT_POWER_CONTROLS.clone(),
            capmc: CapmcConfiguration::default(),
        }
    }
}

impl Config {
    /// Parses a configuration document. Power controls named in the document
    /// replace the compiled-in entry for that action, others keep the default.
    pub fn from_toml(text: &str) -> CapmcResult<Self> {
        let mut config: Config = toml::from_str(text)?;
        for (action, ctl) in DEFAULT_POWER_CONTROLS.iter() {
            config
                .power_controls
                .entry(action.clone())
                .or_insert_with(|| ctl.clone());
        }
        if config.capmc.action_max_workers == 0 {
            return Err(CapmcError::Config(
                "ActionMaxWorkers must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    #[must_use]
    pub fn power_ctl(&self, action: PowerAction) -> Option<&PowerCtl> {
        self.power_controls.get(action.as_str())
    }

    /// Picks the most preferred configured reset type that the target
    /// advertises.
    pub fn reset_type(&self, action: PowerAction, allowed: &[String]) -> CapmcResult<String> {
        let ctl = self
            .power_ctl(action)
            .filter(|ctl| !ctl.reset_type.is_empty())
            .ok_or_else(|| CapmcError::NoPowerControls(action.to_string()))?;

        ctl.reset_type
            .iter()
            .find(|wanted| allowed.iter().any(|a| a == *wanted))
            .cloned()
            .ok_or_else(|| CapmcError::NoSupportedResetType(action.to_string()))
    }

    /// Component types the action applies to, in dispatch order.
    #[must_use]
    pub fn comp_seq(&self, action: PowerAction) -> &[ComponentType] {
        self.power_ctl(action)
            .map_or(&[], |ctl| ctl.component_sequence.as_slice())
    }

    #[must_use]
    pub fn block_roles(&self, action: PowerAction) -> &[String] {
        self.power_ctl(action).map_or(&[], |ctl| ctl.block_role.as_slice())
    }
}

/// The forced form of a graceful action.
pub fn force_variant(action: PowerAction) -> CapmcResult<PowerAction> {
    match action {
        PowerAction::On | PowerAction::ForceOn => Ok(PowerAction::ForceOn),
        PowerAction::Off | PowerAction::ForceOff => Ok(PowerAction::ForceOff),
        PowerAction::Restart | PowerAction::ForceRestart => Ok(PowerAction::ForceRestart),
        PowerAction::Nmi => Err(CapmcError::NoForceVariant(action.to_string())),
    }
}

/// Loads the configuration file, falling back to the compiled-in defaults
/// when it cannot be read. A file that reads but does not parse is fatal.
pub fn load_config(path: Option<&Path>) -> CapmcResult<Config> {
    let Some(path) = path else {
        info!("Using internal default config values");
        return Ok(Config::default());
    };

    info!("Reading config from: {}", path.display());
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let config = Config::from_toml(&text)
                .map_err(|e| CapmcError::Config(format!("{}: {e}", path.display())))?;
            info!("{}: config values override defaults", path.display());
            Ok(config)
        }
        Err(e) => {
            match e.kind() {
                ErrorKind::NotFound => warn!("{}: file does not exist", path.display()),
                ErrorKind::PermissionDenied => warn!("{}: permission denied", path.display()),
                _ => warn!("{}: {e}", path.display()),
            }
            info!("Using internal default config values");
            Ok(Config::default())
        }
    }
}

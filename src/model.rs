use num_derive::FromPrimitive;
use serde::Serialize;

type Watts = f64;
type KWh = f64;

/// Token id and inverter serial number issued by SolaX Cloud. Always handled as a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token_id: String,
    pub serial_number: String,
}

impl Credentials {
    /// Returns `None` unless both parts are non-empty.
    pub fn new(token_id: &str, serial_number: &str) -> Option<Credentials> {
        if token_id.is_empty() || serial_number.is_empty() {
            None
        } else {
            Some(Credentials {
                token_id: token_id.to_owned(),
                serial_number: serial_number.to_owned(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct Api {
    pub api_url: String,
    pub client: reqwest::Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Serialize)]
pub enum InverterStatus {
    Unknown,
    WaitMode = 100,
    CheckMode = 101,
    NormalMode = 102,
    FaultMode = 103,
    PermanentFaultMode = 104,
    UpdateMode = 105,
    EpsCheckMode = 106,
    EpsMode = 107,
    SelfTestMode = 108,
    IdleMode = 109,
    StandbyMode = 110,
    PvWakeUpBatMode = 111,
    GenCheckMode = 112,
    GenRunMode = 113,
}

/// Coarse classification of an [`InverterStatus`] for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusKind {
    Normal,
    Fault,
    Info,
    Warning,
}

impl InverterStatus {
    /// Looks up a status code as reported in `inverterStatus`. Unknown codes are not an error.
    pub fn from_code(code: &str) -> InverterStatus {
        code.trim()
            .parse::<u64>()
            .ok()
            .and_then(num::FromPrimitive::from_u64)
            .unwrap_or(InverterStatus::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            InverterStatus::Unknown => "Unknown",
            InverterStatus::WaitMode => "Wait Mode",
            InverterStatus::CheckMode => "Check Mode",
            InverterStatus::NormalMode => "Normal Mode",
            InverterStatus::FaultMode => "Fault Mode",
            InverterStatus::PermanentFaultMode => "Permanent Fault Mode",
            InverterStatus::UpdateMode => "Update Mode",
            InverterStatus::EpsCheckMode => "EPS Check Mode",
            InverterStatus::EpsMode => "EPS Mode",
            InverterStatus::SelfTestMode => "Self-Test Mode",
            InverterStatus::IdleMode => "Idle Mode",
            InverterStatus::StandbyMode => "Standby Mode",
            InverterStatus::PvWakeUpBatMode => "Pv Wake Up Bat Mode",
            InverterStatus::GenCheckMode => "Gen Check Mode",
            InverterStatus::GenRunMode => "Gen Run Mode",
        }
    }

    pub fn kind(&self) -> StatusKind {
        match self {
            InverterStatus::NormalMode => StatusKind::Normal,
            InverterStatus::FaultMode | InverterStatus::PermanentFaultMode => StatusKind::Fault,
            InverterStatus::CheckMode
            | InverterStatus::EpsCheckMode
            | InverterStatus::EpsMode
            | InverterStatus::GenCheckMode => StatusKind::Info,
            _ => StatusKind::Warning,
        }
    }
}

/// Most recent successful reading. Never merged with a previous one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub inverter_sn: String,
    pub sn: String,
    pub ac_power: Watts,
    /// Per-string DC power, strings 1 and 2 always, 3 and 4 when reported.
    pub dc_power: Vec<Watts>,
    pub yield_today: KWh,
    pub yield_total: KWh,
    pub feed_in_power: Watts,
    pub feed_in_energy: KWh,
    pub consume_energy: KWh,
    pub feed_in_power_meter2: Option<Watts>,
    /// EPS output per phase, only the phases reported.
    pub eps_power: Vec<Watts>,
    pub battery_power: Option<Watts>,
    pub battery_soc: Option<f64>,
    pub inverter_type: String,
    pub status_code: String,
    pub status: InverterStatus,
    pub upload_time: String,
}

impl TelemetrySnapshot {
    pub fn has_battery(&self) -> bool {
        self.battery_power.is_some() || self.battery_soc.is_some()
    }

    pub fn dc_power_total(&self) -> Watts {
        self.dc_power.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preferences {
    pub auto_refresh: bool,
    pub refresh_interval_minutes: u32,
    pub biometric_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            auto_refresh: true,
            refresh_interval_minutes: 1,
            biometric_enabled: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn credentials_require_both_parts() {
        assert!(Credentials::new("token", "").is_none());
        assert!(Credentials::new("", "SN123").is_none());
        let credentials = Credentials::new("token", "SN123").unwrap();
        assert_eq!("token", credentials.token_id);
        assert_eq!("SN123", credentials.serial_number);
    }

    #[test]
    fn known_status_codes() {
        assert_eq!(InverterStatus::WaitMode, InverterStatus::from_code("100"));
        assert_eq!("Normal Mode", InverterStatus::from_code("102").label());
        assert_eq!("Gen Run Mode", InverterStatus::from_code("113").label());
    }

    #[test]
    fn unknown_status_codes() {
        assert_eq!(InverterStatus::Unknown, InverterStatus::from_code("114"));
        assert_eq!(InverterStatus::Unknown, InverterStatus::from_code("99"));
        assert_eq!(InverterStatus::Unknown, InverterStatus::from_code(""));
        assert_eq!("Unknown", InverterStatus::from_code("abc").label());
    }

    #[test]
    fn status_kinds() {
        assert_eq!(StatusKind::Normal, InverterStatus::NormalMode.kind());
        assert_eq!(StatusKind::Fault, InverterStatus::PermanentFaultMode.kind());
        assert_eq!(StatusKind::Info, InverterStatus::EpsMode.kind());
        assert_eq!(StatusKind::Info, InverterStatus::CheckMode.kind());
        assert_eq!(StatusKind::Warning, InverterStatus::IdleMode.kind());
        assert_eq!(StatusKind::Warning, InverterStatus::Unknown.kind());
    }
}

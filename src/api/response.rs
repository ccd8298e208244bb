use super::Error;
use crate::model::{InverterStatus, TelemetrySnapshot};
use serde::Deserialize;
use serde_json::Value;

/// `inverterType` and `inverterStatus` arrive as strings or as bare numbers depending on the
/// inverter firmware. Normalize both to the string code.
fn string_or_number<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/* `result` object of getRealtimeInfo.do */
#[derive(Debug, Deserialize)]
pub struct RealtimeInfo {
    #[serde(rename = "inverterSN")]
    pub inverter_sn: String,
    pub sn: String,
    pub acpower: f64,
    pub yieldtoday: f64,
    pub yieldtotal: f64,
    pub feedinpower: f64,
    pub feedinenergy: f64,
    pub consumeenergy: f64,
    #[serde(rename = "feedinpowerM2", default)]
    pub feedinpower_m2: Option<f64>,
    #[serde(default)]
    pub soc: Option<f64>,
    #[serde(default)]
    pub peps1: Option<f64>,
    #[serde(default)]
    pub peps2: Option<f64>,
    #[serde(default)]
    pub peps3: Option<f64>,
    #[serde(rename = "inverterType", default, deserialize_with = "string_or_number")]
    pub inverter_type: String,
    #[serde(rename = "inverterStatus", default, deserialize_with = "string_or_number")]
    pub inverter_status: String,
    #[serde(rename = "uploadTime", default)]
    pub upload_time: String,
    #[serde(rename = "batPower", default)]
    pub bat_power: Option<f64>,
    pub powerdc1: f64,
    pub powerdc2: f64,
    #[serde(default)]
    pub powerdc3: Option<f64>,
    #[serde(default)]
    pub powerdc4: Option<f64>,
}

impl RealtimeInfo {
    /// Convert into a [`TelemetrySnapshot`]. A reading without inverter serial numbers is
    /// treated as an unexpected response rather than a valid (empty) snapshot.
    pub fn into_snapshot(self) -> Result<TelemetrySnapshot, Error> {
        if self.inverter_sn.is_empty() || self.sn.is_empty() {
            log::warn!("getRealtimeInfo result without inverterSN/sn");
            return Err(Error::UnexpectedApiResponse);
        }

        let dc_power = [
            Some(self.powerdc1),
            Some(self.powerdc2),
            self.powerdc3,
            self.powerdc4,
        ]
        .iter()
        .flatten()
        .copied()
        .collect();
        let eps_power = [self.peps1, self.peps2, self.peps3]
            .iter()
            .flatten()
            .copied()
            .collect();

        Ok(TelemetrySnapshot {
            status: InverterStatus::from_code(&self.inverter_status),
            status_code: self.inverter_status,
            inverter_sn: self.inverter_sn,
            sn: self.sn,
            ac_power: self.acpower,
            dc_power,
            yield_today: self.yieldtoday,
            yield_total: self.yieldtotal,
            feed_in_power: self.feedinpower,
            feed_in_energy: self.feedinenergy,
            consume_energy: self.consumeenergy,
            feed_in_power_meter2: self.feedinpower_m2,
            eps_power,
            battery_power: self.bat_power,
            battery_soc: self.soc,
            inverter_type: self.inverter_type,
            upload_time: self.upload_time,
        })
    }
}

#[cfg(test)]
mod test {
    use super::RealtimeInfo;
    use crate::model::InverterStatus;
    use serde_json::Value;
    use std::fs;
    use std::path::PathBuf;

    fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    fn result_of(filename: &str) -> RealtimeInfo {
        let envelope: Value = serde_json::from_str(&read_resource(filename)).unwrap();
        serde_json::from_value(envelope["result"].clone()).unwrap()
    }

    #[test]
    fn get_realtime_info() {
        let snapshot = result_of("getRealtimeInfo.json").into_snapshot().unwrap();
        assert_eq!("XM3A15IJ8B1234", snapshot.inverter_sn);
        assert_eq!("SWQ2XYZ8AB", snapshot.sn);
        assert_eq!(2250.0, snapshot.ac_power);
        assert_eq!(vec![1320.0, 1105.0], snapshot.dc_power);
        assert_eq!(Some(87.0), snapshot.battery_soc);
        assert_eq!(Some(-125.0), snapshot.battery_power);
        assert_eq!(InverterStatus::NormalMode, snapshot.status);
        assert_eq!("14", snapshot.inverter_type);
        assert!(snapshot.has_battery());
    }

    #[test]
    fn get_realtime_info_without_battery() {
        let snapshot = result_of("getRealtimeInfo_noBattery.json")
            .into_snapshot()
            .unwrap();
        assert!(!snapshot.has_battery());
        assert_eq!(None, snapshot.feed_in_power_meter2);
        assert!(snapshot.eps_power.is_empty());
        assert_eq!(4, snapshot.dc_power.len());
        assert_eq!(3100.0, snapshot.dc_power_total());
        /* numeric status code, outside the known table */
        assert_eq!("130", snapshot.status_code);
        assert_eq!(InverterStatus::Unknown, snapshot.status);
    }

    #[test]
    fn empty_serial_numbers_are_rejected() {
        let mut info = result_of("getRealtimeInfo.json");
        info.inverter_sn = String::new();
        assert_eq!(
            Err(super::Error::UnexpectedApiResponse),
            info.into_snapshot()
        );
    }

    #[test]
    #[should_panic]
    fn get_realtime_info_missing_fields() {
        let _output: RealtimeInfo = serde_json::from_str(r#"{"inverterSN":"X","sn":"Y"}"#).unwrap();
    }
}

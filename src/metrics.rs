use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, TextEncoder};
use solax_monitor::model::TelemetrySnapshot;
use solax_monitor::{Error, RefreshState};
use std::time::UNIX_EPOCH;

lazy_static! {
    static ref AC_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("ac_power", "inverter AC output power (in W)"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref DC_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("dc_power", "PV power per MPPT string (in W)"),
        &["inverter_sn", "string"],
    )
    .unwrap();
    static ref YIELD_TODAY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("yield_today", "energy generated in current day (in kWh)"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref YIELD_TOTAL_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("yield_total", "energy generated over inverter lifetime (in kWh)"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref FEED_IN_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "feed_in_power",
            "power exported to (positive) or imported from (negative) the grid (in W)",
        ),
        &["inverter_sn"],
    )
    .unwrap();
    static ref FEED_IN_ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("feed_in_energy", "total energy exported to the grid (in kWh)"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref CONSUME_ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("consume_energy", "total energy imported from the grid (in kWh)"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref BATTERY_SOC_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("battery_soc", "battery state of charge (in %)"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref BATTERY_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("battery_power", "battery charge (positive) or discharge power (in W)"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref INVERTER_STATUS_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("inverter_status", "inverter status code as reported by SolaX Cloud"),
        &["inverter_sn"],
    )
    .unwrap();
    static ref LAST_UPDATE_GAUGE: Gauge = register_gauge!(opts!(
        "last_update_timestamp_seconds",
        "unix time of the last successful poll",
    ))
    .unwrap();
    static ref POLL_ERRORS_COUNTER: IntCounter = register_int_counter!(opts!(
        "poll_errors_total",
        "failed polls of SolaX Cloud",
    ))
    .unwrap();
}

/// Feed `snapshot` to Prometheus gauges. Optional readings are only set when reported.
fn process_snapshot(snapshot: &TelemetrySnapshot) {
    let sn = snapshot.inverter_sn.as_str();

    AC_POWER_GAUGE.with_label_values(&[sn]).set(snapshot.ac_power);
    for (i, power) in snapshot.dc_power.iter().enumerate() {
        DC_POWER_GAUGE
            .with_label_values(&[sn, &(i + 1).to_string()])
            .set(*power);
    }
    YIELD_TODAY_GAUGE
        .with_label_values(&[sn])
        .set(snapshot.yield_today);
    YIELD_TOTAL_GAUGE
        .with_label_values(&[sn])
        .set(snapshot.yield_total);
    FEED_IN_POWER_GAUGE
        .with_label_values(&[sn])
        .set(snapshot.feed_in_power);
    FEED_IN_ENERGY_GAUGE
        .with_label_values(&[sn])
        .set(snapshot.feed_in_energy);
    CONSUME_ENERGY_GAUGE
        .with_label_values(&[sn])
        .set(snapshot.consume_energy);

    if let Some(soc) = snapshot.battery_soc {
        BATTERY_SOC_GAUGE.with_label_values(&[sn]).set(soc);
    }
    if let Some(power) = snapshot.battery_power {
        BATTERY_POWER_GAUGE.with_label_values(&[sn]).set(power);
    }

    match snapshot.status_code.parse::<f64>() {
        Ok(code) => INVERTER_STATUS_GAUGE.with_label_values(&[sn]).set(code),
        Err(_) => log::warn!("non-numeric inverter status {:?}", snapshot.status_code),
    }
}

/// Drop every series labelled with the inverter of `snapshot`.
fn forget_inverter(snapshot: &TelemetrySnapshot) {
    let sn = snapshot.inverter_sn.as_str();

    for gauge in [
        &*AC_POWER_GAUGE,
        &*YIELD_TODAY_GAUGE,
        &*YIELD_TOTAL_GAUGE,
        &*FEED_IN_POWER_GAUGE,
        &*FEED_IN_ENERGY_GAUGE,
        &*CONSUME_ENERGY_GAUGE,
        &*BATTERY_SOC_GAUGE,
        &*BATTERY_POWER_GAUGE,
        &*INVERTER_STATUS_GAUGE,
    ] {
        let _ = gauge.remove_label_values(&[sn]);
    }
    for i in 0..snapshot.dc_power.len() {
        let _ = DC_POWER_GAUGE.remove_label_values(&[sn, &(i + 1).to_string()]);
    }
    log::debug!("dropped metrics of inverter {}", sn);
}

/// Record the change from the previously observed refresh state to `state`.
///
/// Updates may be coalesced, so failures are taken from the running count in the state.
pub fn record(previous: &RefreshState, state: &RefreshState) {
    POLL_ERRORS_COUNTER.inc_by(state.failures.saturating_sub(previous.failures));

    if let Some(old) = &previous.snapshot {
        let same_inverter = state
            .snapshot
            .as_ref()
            .map_or(false, |new| new.inverter_sn == old.inverter_sn);
        if !same_inverter {
            forget_inverter(old);
        }
    }

    if state.last_error.is_some() {
        return;
    }
    if let Some(snapshot) = &state.snapshot {
        process_snapshot(snapshot);
    }
    if let Some(updated) = state.last_updated {
        if let Ok(since_epoch) = updated.duration_since(UNIX_EPOCH) {
            LAST_UPDATE_GAUGE.set(since_epoch.as_secs_f64());
        }
    }
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::InternalError))?;
    String::from_utf8(buffer).or(Err(Error::InternalError))
}

#[cfg(test)]
mod test {
    use super::*;
    use solax_monitor::model::InverterStatus;

    fn snapshot(inverter_sn: &str) -> TelemetrySnapshot {
        TelemetrySnapshot {
            inverter_sn: inverter_sn.to_string(),
            sn: "SN1".to_string(),
            ac_power: 2250.0,
            dc_power: vec![1320.0, 1105.0],
            yield_today: 12.4,
            yield_total: 8421.7,
            feed_in_power: 640.0,
            feed_in_energy: 3120.5,
            consume_energy: 4210.0,
            feed_in_power_meter2: None,
            eps_power: vec![],
            battery_power: Some(-125.0),
            battery_soc: Some(87.0),
            inverter_type: "14".to_string(),
            status_code: "102".to_string(),
            status: InverterStatus::NormalMode,
            upload_time: "2024-06-01 12:35:10".to_string(),
        }
    }

    fn state(snapshot: Option<TelemetrySnapshot>, failures: u64) -> RefreshState {
        RefreshState {
            snapshot,
            failures,
            ..RefreshState::default()
        }
    }

    #[test]
    fn coalesced_failures_are_all_counted() {
        let before = POLL_ERRORS_COUNTER.get();
        let previous = state(Some(snapshot("COUNTED")), 1);

        /* error then success, observed only as the success */
        record(&previous, &state(Some(snapshot("COUNTED")), 3));

        assert_eq!(before + 2, POLL_ERRORS_COUNTER.get());
    }

    #[test]
    fn series_of_previous_inverter_are_dropped() {
        let first = state(Some(snapshot("FIRST-INV")), 0);
        record(&RefreshState::default(), &first);
        assert!(read().unwrap().contains("FIRST-INV"));

        let second = state(Some(snapshot("SECOND-INV")), 0);
        record(&first, &second);
        let text = read().unwrap();
        assert!(!text.contains("FIRST-INV"));
        assert!(text.contains("SECOND-INV"));

        /* logout leaves no reading behind */
        record(&second, &RefreshState::default());
        assert!(!read().unwrap().contains("SECOND-INV"));
    }
}

use crate::scheduler::RefreshState;

pub const UNIT_POWER: &str = "W";
pub const UNIT_ENERGY: &str = "kWh";
pub const UNIT_PERCENTAGE: &str = "%";

const NOT_SET: &str = "Not Set";
const MASK: char = '•';
const MASKED_SHORT: &str = "••••••••";

/// Obscure a stored credential, keeping only its last 4 characters visible.
///
/// Values of 8 characters or fewer render as a fixed sentinel that reveals neither their
/// content nor their length.
pub fn mask_text(text: &str) -> String {
    let len = text.chars().count();
    if len == 0 {
        return NOT_SET.to_string();
    }
    if len <= 8 {
        return MASKED_SHORT.to_string();
    }

    let tail: String = text.chars().skip(len - 4).collect();
    format!("{}{}", MASK.to_string().repeat(len - 8), tail)
}

/// One-line rendering of the latest reading.
pub fn summary(state: &RefreshState) -> String {
    let snapshot = match &state.snapshot {
        Some(snapshot) => snapshot,
        None => {
            return match &state.last_error {
                Some(e) => format!("no data yet ({})", e),
                None => String::from("no data yet"),
            }
        }
    };

    let mut line = format!(
        "SN {} [{}] AC {:.0} {p} | PV {:.0} {p} | today {:.1} {e} | total {:.1} {e} | feed-in {:.0} {p}",
        snapshot.sn,
        snapshot.status.label(),
        snapshot.ac_power,
        snapshot.dc_power_total(),
        snapshot.yield_today,
        snapshot.yield_total,
        snapshot.feed_in_power,
        p = UNIT_POWER,
        e = UNIT_ENERGY,
    );

    if let Some(soc) = snapshot.battery_soc {
        line.push_str(&format!(" | battery {:.0}{}", soc, UNIT_PERCENTAGE));
        if let Some(power) = snapshot.battery_power {
            line.push_str(&format!(" {:.0} {}", power, UNIT_POWER));
        }
    }

    if let Some(e) = state.last_error.as_ref().filter(|_| state.is_stale()) {
        line.push_str(&format!(" (stale: {})", e));
    }

    line
}

use super::packet::decode_sensor_frame;

const SENSOR_PREFIX: &str = "sen:";
const VALUE_PREFIX: &str = "value:";
const ALERT_PREFIX: &str = "alert:";
const ALERT_TOKEN: &str = "alert";

const SENSOR_PAYLOAD_LEN: usize = 20;
const SENSOR_AUX_LEN: usize = 2;

/// What a completed device line means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// `sen:<20 hex>-<2 hex>`
    SensorFrame { channels: Vec<u16>, aux: u8 },
    /// `value:<name>:<value>`; the value may itself contain `:`.
    NamedValue { name: String, value: String },
    /// `alert:<message>`
    AlertMessage(String),
    /// `alert` or `alert-<id>`
    AlertToken(Option<String>),
    Plain,
}

/// Classify a trimmed line. Prefixes are tried in a fixed order and the
/// first match wins.
pub fn classify_line(line: &str) -> LineKind {
    if let Some(rest) = line.strip_prefix(SENSOR_PREFIX) {
        return parse_sensor(rest).unwrap_or(LineKind::Plain);
    }
    if let Some(rest) = line.strip_prefix(VALUE_PREFIX) {
        let (name, value) = rest.split_once(':').unwrap_or((rest, ""));
        return LineKind::NamedValue {
            name: name.to_string(),
            value: value.to_string(),
        };
    }
    if let Some(message) = line.strip_prefix(ALERT_PREFIX) {
        return LineKind::AlertMessage(message.to_string());
    }
    parse_alert_token(line).unwrap_or(LineKind::Plain)
}

// Format: sen:<payload>-<aux>, trailing text ignored
fn parse_sensor(rest: &str) -> Option<LineKind> {
    let payload = rest.get(..SENSOR_PAYLOAD_LEN)?;
    let aux = rest
        .get(SENSOR_PAYLOAD_LEN..)?
        .strip_prefix('-')?
        .get(..SENSOR_AUX_LEN)?;
    let aux = u8::from_str_radix(aux, 16).ok()?;
    let channels = decode_sensor_frame(payload);
    if channels.is_empty() {
        return None;
    }
    Some(LineKind::SensorFrame { channels, aux })
}

fn parse_alert_token(line: &str) -> Option<LineKind> {
    let rest = line.strip_prefix(ALERT_TOKEN)?;
    if rest.is_empty() {
        return Some(LineKind::AlertToken(None));
    }
    let id = rest.strip_prefix('-')?;
    let valid = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    valid.then(|| LineKind::AlertToken(Some(id.to_string())))
}

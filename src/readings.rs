use crate::identity::MeterIdentity;
use crate::reconcile::{NormalizedRecord, NO_DATA};
use serde_derive::Serialize;
use serde_json::{json, Map, Value};

/// State published for the monthly series; the data lives in its `graph` attribute
pub const SERIES_STATE: &str = "图表";
pub const UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Text,
    Volume,
    Monetary,
    Series,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
    pub kind: ReadingKind,
}

const fn reading(
    key: &'static str,
    label: &'static str,
    icon: &'static str,
    unit: Option<&'static str>,
    kind: ReadingKind,
) -> ReadingDescriptor {
    ReadingDescriptor {
        key,
        label,
        icon,
        unit,
        kind,
    }
}

const YUAN: Option<&str> = Some("元");
const CUBIC_METRES: Option<&str> = Some("m³");

/// Every reading a meter publishes, in display order.
pub const READINGS: &[ReadingDescriptor] = &[
    reading("owner_no", "编号户名", "mdi:account-card", None, ReadingKind::Text),
    reading("balance", "当前余额", "mdi:cash", YUAN, ReadingKind::Monetary),
    reading("arrears", "当前欠费", "mdi:cash-minus", YUAN, ReadingKind::Monetary),
    reading("current_usage", "本期用量", "mdi:water", CUBIC_METRES, ReadingKind::Volume),
    reading("current_bill", "本期金额", "mdi:cash-100", YUAN, ReadingKind::Monetary),
    reading(
        "current_year_total_usage",
        "本年用水总量",
        "mdi:chart-waterfall",
        CUBIC_METRES,
        ReadingKind::Volume,
    ),
    reading("annual_bill", "年累计金额", "mdi:currency-cny", YUAN, ReadingKind::Monetary),
    reading(
        "last_year_total_usage",
        "去年用水总量",
        "mdi:chart-bar",
        CUBIC_METRES,
        ReadingKind::Volume,
    ),
    reading("monthly_usage", "月度用水趋势", "mdi:chart-areaspline", None, ReadingKind::Series),
    reading("latest_reading_time", "最近一次抄表时间", "mdi:calendar-clock", None, ReadingKind::Text),
    reading(
        "latest_reading_value",
        "最近一次抄表值",
        "mdi:gauge",
        CUBIC_METRES,
        ReadingKind::Text,
    ),
];

/// One reading as the host sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedReading {
    pub unique_id: String,
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
    pub kind: ReadingKind,
    pub state: Value,
    pub attributes: Map<String, Value>,
}

/// Turns a record into the full set of readings of one meter.
/// With no record every reading reports [`UNAVAILABLE`].
pub fn publish(identity: &MeterIdentity, record: Option<&NormalizedRecord>) -> Vec<PublishedReading> {
    let device_id = identity.device_id();
    READINGS
        .iter()
        .map(|descriptor| {
            let (state, attributes) = match record {
                Some(record) => reading_value(descriptor, record),
                None => (Value::from(UNAVAILABLE), Map::new()),
            };
            PublishedReading {
                unique_id: format!("{}_{}", device_id, descriptor.key),
                key: descriptor.key,
                name: descriptor.label,
                icon: descriptor.icon,
                unit: descriptor.unit,
                kind: descriptor.kind,
                state,
                attributes,
            }
        })
        .collect()
}

fn reading_value(
    descriptor: &ReadingDescriptor,
    record: &NormalizedRecord,
) -> (Value, Map<String, Value>) {
    let mut attributes = Map::new();
    let state = match descriptor.key {
        "owner_no" => Value::from(record.owner_no.clone()),
        "balance" => money(record.balance),
        "arrears" => money(record.arrears),
        "current_usage" => Value::from(record.current_usage),
        "current_bill" => money(record.current_bill),
        "current_year_total_usage" => Value::from(record.current_year_total_usage),
        "annual_bill" => money(record.annual_bill),
        "last_year_total_usage" => Value::from(record.last_year_total_usage),
        "monthly_usage" => {
            let graph: Vec<Value> = record
                .monthly_usage
                .iter()
                .map(|m| json!({ "month": m.month, "usage": m.usage }))
                .collect();
            attributes.insert("graph".to_string(), Value::Array(graph));
            attributes.insert("friendly_name".to_string(), Value::from(descriptor.label));
            Value::from(SERIES_STATE)
        }
        "latest_reading_time" => text_or_placeholder(&record.latest_reading_time),
        "latest_reading_value" => text_or_placeholder(&record.latest_reading_value),
        _ => Value::Null,
    };
    (state, attributes)
}

fn money(value: f64) -> Value {
    Value::from((value * 100.0).round() / 100.0)
}

fn text_or_placeholder(value: &str) -> Value {
    if value.trim().is_empty() {
        Value::from(NO_DATA)
    } else {
        Value::from(value)
    }
}

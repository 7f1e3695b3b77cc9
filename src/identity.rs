use serde_derive::Serialize;

pub const MANUFACTURER: &str = "指尖水务";
pub const MODEL: &str = "智能水表";
pub const SW_VERSION: &str = "2.1";

/// Credentials and identifiers of one configured water meter.
///
/// Built once from configuration and never mutated afterwards; everything that
/// talks to the vendor borrows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterIdentity {
    pub name: String,
    pub meter_no: String,
    pub company_id: String,
    pub auth_token: String,
    pub user_id: String,
    pub auth_t: String,
}

impl MeterIdentity {
    /// Stable id of the meter, unique across all configured instances
    pub fn device_id(&self) -> String {
        format!("{}_{}", self.company_id, self.meter_no)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            identifier: self.device_id(),
            name: self.name.clone(),
            manufacturer: MANUFACTURER,
            model: MODEL,
            sw_version: SW_VERSION,
        }
    }
}

/// Registration record the host groups published readings under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub sw_version: &'static str,
}

/// Company ids are two or three ASCII digits.
pub fn is_valid_company_id(company_id: &str) -> bool {
    (2..=3).contains(&company_id.len()) && company_id.bytes().all(|b| b.is_ascii_digit())
}

use crate::error::{FetchError, SetupError};
use crate::identity::MeterIdentity;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const REALTIME_PATH: &str = "/waterMeter/getWaterMeter";
pub const HISTORY_PATH: &str = "/waterMeter/getWaterBillList";
pub const TREND_PATH: &str = "/waterMeter/getWaterTrend";

// The vendor only answers requests that look like its own iOS app
const USER_AGENT: &str = "WaterAffairs1/3.7.0 (iPhone; iOS 14.4.1; Scale/3.00)";
const SUCCESS_CODE: &str = "0";

/// Client for the tap-water vendor API.
///
/// Stateless apart from the connection pool: every call takes the meter it is
/// asking about.
#[derive(Debug, Clone)]
pub struct WaterMeterApi {
    base_url: String,
    client: reqwest::Client,
}

impl WaterMeterApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Current balance and owner details. Mandatory for a refresh to succeed.
    pub async fn fetch_realtime(
        &self,
        identity: &MeterIdentity,
    ) -> Result<RawRealtimeReading, FetchError> {
        let params = [
            ("businessType", "0".to_string()),
            ("systemType", "0".to_string()),
            ("waterCompanyId", identity.company_id.clone()),
            ("waterMeterNo", identity.meter_no.clone()),
        ];
        let content: Option<RawRealtimeReading> =
            self.get(REALTIME_PATH, identity, &params).await?;
        Ok(content.unwrap_or_default())
    }

    /// Bill entries of one calendar year. A year without data is an empty list.
    pub async fn fetch_annual_history(
        &self,
        identity: &MeterIdentity,
        year: i32,
    ) -> Result<Vec<RawHistoryEntry>, FetchError> {
        let params = [
            ("waterCompanyId", identity.company_id.clone()),
            ("waterMeterNo", identity.meter_no.clone()),
            ("year", year.to_string()),
        ];
        let content: Option<Vec<RawHistoryEntry>> =
            self.get(HISTORY_PATH, identity, &params).await?;
        Ok(content.unwrap_or_default())
    }

    /// Monthly usage grouped by year, covering several years.
    pub async fn fetch_trends(
        &self,
        identity: &MeterIdentity,
    ) -> Result<Vec<RawTrendYear>, FetchError> {
        let params = [
            ("waterCompanyId", identity.company_id.clone()),
            ("waterMeterNo", identity.meter_no.clone()),
        ];
        let content: Option<Vec<RawTrendYear>> = self.get(TREND_PATH, identity, &params).await?;
        Ok(content.unwrap_or_default())
    }

    /// Checks a freshly configured meter's credentials with one realtime request.
    pub async fn validate_credentials(&self, identity: &MeterIdentity) -> Result<(), SetupError> {
        let params = [
            ("waterCompanyId", identity.company_id.as_str()),
            ("waterMeterNo", identity.meter_no.as_str()),
        ];
        let response = self
            .request(REALTIME_PATH, identity)
            .query(&params)
            .send()
            .await
            .map_err(|e| SetupError::ConnectionFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SetupError::InvalidAuth);
        }

        let envelope: VendorEnvelope<Value> = response
            .json()
            .await
            .map_err(|e| SetupError::ConnectionFailed(e.to_string()))?;
        if !envelope.is_success() {
            return Err(SetupError::Api(
                envelope.message.unwrap_or_else(|| "未知错误".to_string()),
            ));
        }
        Ok(())
    }

    fn request(&self, path: &str, identity: &MeterIdentity) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&identity.auth_token)
            .header("userId", &identity.user_id)
            .header("AuthorizationT", &identity.auth_t)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "*/*")
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        identity: &MeterIdentity,
        params: &[(&str, String)],
    ) -> Result<Option<T>, FetchError> {
        debug!(path, meter = %identity.meter_no, "vendor request");
        let envelope: VendorEnvelope<T> = self
            .request(path, identity)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        envelope.into_content()
    }
}

/// Wrapper every vendor response arrives in.
#[derive(Debug, Deserialize)]
struct VendorEnvelope<T> {
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub message: Option<String>,
    pub content: Option<T>,
}

impl<T> VendorEnvelope<T> {
    fn is_success(&self) -> bool {
        self.code.as_str() == Some(SUCCESS_CODE)
    }

    fn into_content(self) -> Result<Option<T>, FetchError> {
        if !self.is_success() {
            return Err(FetchError::Api {
                code: match &self.code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                message: self.message.unwrap_or_else(|| "未知错误".to_string()),
            });
        }
        Ok(self.content)
    }
}

/// A vendor field that arrives either as a JSON number or as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VendorValue {
    Number(f64),
    Text(String),
}

impl VendorValue {
    pub fn as_text(&self) -> String {
        match self {
            VendorValue::Number(n) => n.to_string(),
            VendorValue::Text(s) => s.clone(),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct RawRealtimeReading {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub balance: Option<VendorValue>,
    #[serde(default)]
    pub arrears: Option<VendorValue>,
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct RawHistoryEntry {
    #[serde(default)]
    pub lastreaddate: Option<String>,
    #[serde(default)]
    pub currentperiod: Option<VendorValue>,
    #[serde(default)]
    pub waterquantity: Option<VendorValue>,
    #[serde(default)]
    pub arrears: Option<VendorValue>,
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct RawTrendYear {
    #[serde(default)]
    pub year: Option<VendorValue>,
    #[serde(default)]
    pub list: Vec<RawTrendMonth>,
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct RawTrendMonth {
    #[serde(default)]
    pub billdate: Option<String>,
    #[serde(default)]
    pub waterquantity: Option<VendorValue>,
}

#[cfg(test)]
mod test_vendor_api {
    use super::*;
    use mockito::Matcher;

    fn identity() -> MeterIdentity {
        MeterIdentity {
            name: "Home".to_string(),
            meter_no: "0012345".to_string(),
            company_id: "21".to_string(),
            auth_token: "test_token".to_string(),
            user_id: "42".to_string(),
            auth_t: "session".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_realtime() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .match_header("Authorization", "Bearer test_token")
            .match_header("userId", "42")
            .match_header("AuthorizationT", "session")
            .match_header("User-Agent", USER_AGENT)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("businessType".into(), "0".into()),
                Matcher::UrlEncoded("systemType".into(), "0".into()),
                Matcher::UrlEncoded("waterCompanyId".into(), "21".into()),
                Matcher::UrlEncoded("waterMeterNo".into(), "0012345".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"
                {
                    "code": "0",
                    "message": "成功",
                    "content": {
                        "owner": "张三",
                        "address": "幸福路1号",
                        "balance": "128.50元",
                        "arrears": 0
                    }
                }
            "#,
            )
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        let result = api.fetch_realtime(&identity()).await.unwrap();

        assert_eq!(result.owner.as_deref(), Some("张三"));
        assert_eq!(result.address.as_deref(), Some("幸福路1号"));
        assert_eq!(
            result.balance,
            Some(VendorValue::Text("128.50元".to_string()))
        );
        assert_eq!(result.arrears, Some(VendorValue::Number(0.0)));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_vendor_error_code_is_api_error() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code": "401", "message": "登录已过期"}"#)
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        match api.fetch_realtime(&identity()).await.unwrap_err() {
            FetchError::Api { code, message } => {
                assert_eq!(code, "401");
                assert_eq!(message, "登录已过期");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_numeric_zero_code_is_not_success() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code": 0, "content": {}}"#)
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        let err = api.fetch_realtime(&identity()).await.unwrap_err();
        assert!(matches!(err, FetchError::Api { ref code, .. } if code == "0"));
        assert!(err.to_string().contains("未知错误"));
    }

    #[tokio::test]
    async fn test_http_error_is_transport_error() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        let err = api.fetch_realtime(&identity()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_json_is_transport_error() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        let err = api.fetch_realtime(&identity()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_fetch_annual_history() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", HISTORY_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("waterCompanyId".into(), "21".into()),
                Matcher::UrlEncoded("waterMeterNo".into(), "0012345".into()),
                Matcher::UrlEncoded("year".into(), "2024".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"
                {
                    "code": "0",
                    "content": [
                        {"lastreaddate": "2024年01月01日", "currentperiod": "100", "waterquantity": 10, "arrears": 5},
                        {"lastreaddate": "2024年02月01日", "currentperiod": 115, "waterquantity": "15", "arrears": "7.00"}
                    ]
                }
            "#,
            )
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        let entries = api.fetch_annual_history(&identity(), 2024).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].lastreaddate.as_deref(), Some("2024年01月01日"));
        assert_eq!(entries[1].currentperiod, Some(VendorValue::Number(115.0)));
        assert_eq!(entries[1].waterquantity, Some(VendorValue::Text("15".to_string())));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_history_without_content_is_empty() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", HISTORY_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code": "0", "message": "暂无数据", "content": null}"#)
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        let entries = api.fetch_annual_history(&identity(), 2024).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_trends() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", TREND_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"
                {
                    "code": "0",
                    "content": [
                        {"year": "2024", "list": [{"billdate": "2024年03月", "waterquantity": 12}]},
                        {"year": 2023, "list": []}
                    ]
                }
            "#,
            )
            .create_async()
            .await;

        let api = WaterMeterApi::new(format!("{}/", server.url()));
        let years = api.fetch_trends(&identity()).await.unwrap();

        assert_eq!(years.len(), 2);
        assert_eq!(years[0].year, Some(VendorValue::Text("2024".to_string())));
        assert_eq!(years[0].list[0].billdate.as_deref(), Some("2024年03月"));
        assert_eq!(years[1].year, Some(VendorValue::Number(2023.0)));
        assert!(years[1].list.is_empty());
    }

    #[tokio::test]
    async fn test_validate_credentials_ok() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .match_header("Authorization", "Bearer test_token")
            .with_status(200)
            .with_body(r#"{"code": "0", "content": {"owner": "张三"}}"#)
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        tokio_test::assert_ok!(api.validate_credentials(&identity()).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_validate_credentials_unauthorized() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        let err = api.validate_credentials(&identity()).await.unwrap_err();
        assert!(matches!(err, SetupError::InvalidAuth));
    }

    #[tokio::test]
    async fn test_validate_credentials_vendor_rejects() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", REALTIME_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code": "500", "message": "水表不存在"}"#)
            .create_async()
            .await;

        let api = WaterMeterApi::new(server.url());
        match api.validate_credentials(&identity()).await.unwrap_err() {
            SetupError::Api(message) => assert_eq!(message, "水表不存在"),
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validate_credentials_unreachable() {
        // Nothing listens on port 9 of localhost
        let api = WaterMeterApi::new("http://127.0.0.1:9");
        let err = api.validate_credentials(&identity()).await.unwrap_err();
        assert!(matches!(err, SetupError::ConnectionFailed(_)));
    }

    #[test]
    fn test_vendor_value_parsing() {
        let values: Vec<VendorValue> = serde_json::from_str(r#"[3, "12.50元"]"#).unwrap();
        assert_eq!(values[0], VendorValue::Number(3.0));
        assert_eq!(values[0].as_text(), "3");
        assert_eq!(values[1].as_text(), "12.50元");
    }
}

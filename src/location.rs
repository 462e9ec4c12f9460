use crate::config::{LocationConfig, LocationProviderType};
use crate::error::LocationError;
use crate::types::LocationFix;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// 現在地を1回だけ取得する
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn locate(&self) -> Result<LocationFix, LocationError>;
}

/// 設定ファイルの座標を返す
pub struct FixedLocation {
    fix: LocationFix,
}

impl FixedLocation {
    pub fn new(latitude: f64, longitude: f64, address: Option<String>) -> Self {
        Self {
            fix: LocationFix::from_coordinates(latitude, longitude, address),
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn locate(&self) -> Result<LocationFix, LocationError> {
        Ok(self.fix.clone())
    }
}

/// ip-api.com 形式のレスポンス
#[derive(Debug, Deserialize)]
struct IpLocationResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    city: Option<String>,
    #[serde(rename = "regionName", default)]
    region: Option<String>,
}

impl IpLocationResponse {
    fn into_fix(self) -> Result<LocationFix, LocationError> {
        if self.status.as_deref().is_some_and(|s| s != "success") {
            return Err(LocationError::Unavailable(
                self.message.unwrap_or_else(|| "位置情報サービスが失敗を返しました".to_string()),
            ));
        }

        let (Some(latitude), Some(longitude)) = (self.lat, self.lon) else {
            return Err(LocationError::Unavailable("座標がありません".to_string()));
        };

        let address = match (self.city, self.region) {
            (Some(city), Some(region)) if !city.is_empty() && !region.is_empty() => {
                Some(format!("{}, {}", city, region))
            }
            (Some(city), _) if !city.is_empty() => Some(city),
            _ => None,
        };

        Ok(LocationFix::from_coordinates(latitude, longitude, address))
    }
}

/// IPアドレスから大まかな位置を求める
pub struct IpGeolocation {
    url: String,
    client: reqwest::Client,
}

impl IpGeolocation {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("位置情報 HTTPクライアント作成失敗: {}", e))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl LocationProvider for IpGeolocation {
    async fn locate(&self) -> Result<LocationFix, LocationError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                LocationError::Timeout
            } else {
                LocationError::Unavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(LocationError::Unavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: IpLocationResponse = response
            .json()
            .await
            .map_err(|e| LocationError::Unavailable(format!("レスポンスパース失敗: {}", e)))?;

        body.into_fix()
    }
}

/// 設定からプロバイダを作る
pub fn from_config(config: &LocationConfig) -> anyhow::Result<Arc<dyn LocationProvider>> {
    Ok(match config.provider {
        LocationProviderType::Fixed => Arc::new(FixedLocation::new(
            config.latitude,
            config.longitude,
            config.address.clone(),
        )),
        LocationProviderType::Ip => Arc::new(IpGeolocation::new(
            &config.url,
            Duration::from_secs(config.timeout_secs),
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<LocationFix, LocationError> {
        serde_json::from_str::<IpLocationResponse>(json)
            .unwrap()
            .into_fix()
    }

    #[tokio::test]
    async fn test_fixed_location() {
        let provider = FixedLocation::new(17.385, 78.4867, None);
        let fix = provider.locate().await.unwrap();
        assert_eq!(fix.address, "Lat: 17.3850, Long: 78.4867");
    }

    #[test]
    fn test_ip_response_with_city() {
        let fix = parse(
            r#"{"status":"success","lat":17.385,"lon":78.4867,"city":"Hyderabad","regionName":"Telangana"}"#,
        )
        .unwrap();
        assert_eq!(fix.address, "Hyderabad, Telangana");
        assert_eq!(fix.latitude, 17.385);
    }

    #[test]
    fn test_ip_response_without_city() {
        let fix = parse(r#"{"lat":16.5062,"lon":80.648}"#).unwrap();
        assert_eq!(fix.address, "Lat: 16.5062, Long: 80.6480");
    }

    #[test]
    fn test_ip_response_failure() {
        assert_eq!(
            parse(r#"{"status":"fail","message":"private range"}"#),
            Err(LocationError::Unavailable("private range".to_string()))
        );
        assert!(parse(r#"{"status":"success"}"#).is_err());
    }

    #[test]
    fn test_from_config_fixed() {
        let config = LocationConfig {
            provider: LocationProviderType::Fixed,
            ..LocationConfig::default()
        };
        assert!(from_config(&config).is_ok());
    }
}

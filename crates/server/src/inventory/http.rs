//! HTTP inventory backend.
//!
//! Consumes the external inventory service's JSON API:
//!
//! - `GET {base}/accounts/{account}/targets?running=true` lists targets
//! - `GET {base}/accounts/{account}/keys/{key}?region={region}` fetches key material

use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{KeyMaterial, ResolverError, Target, TargetResolver};

/// Target descriptor as returned by the inventory service.
#[derive(Debug, Deserialize)]
struct TargetDto {
    id: String,
    name: Option<String>,
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    login: String,
    region: String,
    key_id: String,
    #[serde(default)]
    running: bool,
}

fn default_port() -> u16 {
    22
}

/// Key material response from the inventory service.
#[derive(Debug, Deserialize)]
struct KeyDto {
    pem: String,
}

/// Inventory backed by the external inventory service.
#[derive(Debug)]
pub struct HttpInventory {
    base: Url,
    client: reqwest::Client,
}

impl HttpInventory {
    /// Create a backend for the given base URL.
    pub fn new(base_url: &str) -> Result<Self, ResolverError> {
        let base = Url::parse(base_url)
            .map_err(|e| ResolverError::Backend(format!("invalid inventory url: {}", e)))?;
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ResolverError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ResolverError::Backend("inventory url cannot be a base".into()))?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

impl TargetResolver for HttpInventory {
    async fn list_targets(
        &self,
        account_id: &str,
        running_only: bool,
    ) -> Result<Vec<Target>, ResolverError> {
        let mut url = self.endpoint(&["accounts", account_id, "targets"])?;
        if running_only {
            url.query_pairs_mut().append_pair("running", "true");
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolverError::Backend(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(ResolverError::Unauthorized(account_id.to_string()));
            }
            status => {
                return Err(ResolverError::Backend(format!(
                    "inventory service returned {}",
                    status
                )));
            }
        }

        let dtos: Vec<TargetDto> = response
            .json()
            .await
            .map_err(|e| ResolverError::Backend(e.to_string()))?;

        Ok(dtos
            .into_iter()
            .map(|dto| Target {
                display_name: dto.name.unwrap_or_else(|| dto.id.clone()),
                target_id: dto.id,
                host: dto.host,
                port: dto.port,
                login: dto.login,
                region: dto.region,
                account_id: account_id.to_string(),
                key_id: dto.key_id,
                running: dto.running,
            })
            .collect())
    }

    async fn fetch_key_material(
        &self,
        account_id: &str,
        key_id: &str,
        region: &str,
    ) -> Result<KeyMaterial, ResolverError> {
        let mut url = self.endpoint(&["accounts", account_id, "keys", key_id])?;
        url.query_pairs_mut().append_pair("region", region);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolverError::Backend(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(ResolverError::KeyNotFound(key_id.to_string()));
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(ResolverError::Unauthorized(account_id.to_string()));
            }
            status => {
                return Err(ResolverError::Backend(format!(
                    "inventory service returned {}",
                    status
                )));
            }
        }

        let dto: KeyDto = response
            .json()
            .await
            .map_err(|e| ResolverError::Backend(e.to_string()))?;

        Ok(KeyMaterial::new(dto.pem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_url() {
        let err = HttpInventory::new("not a url").unwrap_err();
        assert!(matches!(err, ResolverError::Backend(_)));
    }

    #[test]
    fn test_endpoint_builds_paths() {
        let inventory = HttpInventory::new("https://inventory.internal:8443/api").unwrap();
        let url = inventory
            .endpoint(&["accounts", "prod", "targets"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://inventory.internal:8443/api/accounts/prod/targets"
        );
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let inventory = HttpInventory::new("https://inventory.internal").unwrap();
        let url = inventory
            .endpoint(&["accounts", "pr od", "keys", "k/1"])
            .unwrap();
        // Segments must not be able to splice extra path components
        assert!(url.as_str().contains("pr%20od"));
        assert!(url.as_str().contains("k%2F1"));
    }
}

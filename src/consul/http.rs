//! Consul agent client over HTTP

use super::{
    CatalogEntry, CheckRegistration, CheckStatus, CoordinationClient, HealthCheck, KvRecord,
    ServiceRegistration,
};
use crate::common::{encode_path, format_ttl, ConsulSettings, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulKv {
    key: String,
    value: Option<String>,
    create_index: u64,
}

impl ConsulKv {
    fn into_record(self) -> Result<KvRecord> {
        let value = match self.value {
            Some(encoded) => {
                let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    crate::Error::Coordination(format!("bad value for {}: {}", self.key, e))
                })?;
                String::from_utf8(bytes).map_err(|_| {
                    crate::Error::Coordination(format!("non UTF-8 value for {}", self.key))
                })?
            }
            None => String::new(),
        };
        Ok(KvRecord {
            key: self.key,
            value,
            create_index: self.create_index,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulCatalogService {
    node: String,
    address: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
    service_name: String,
    #[serde(default)]
    service_address: String,
    #[serde(default)]
    service_port: u16,
    #[serde(default)]
    service_tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulHealthNode {
    node: String,
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulHealthServiceInfo {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulServiceHealth {
    node: ConsulHealthNode,
    service: ConsulHealthServiceInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulAgentCheck {
    node: String,
    #[serde(rename = "CheckID")]
    check_id: String,
    name: String,
    status: String,
    #[serde(default)]
    notes: String,
    #[serde(rename = "ServiceID", default)]
    service_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRegisterBody<'a> {
    name: &'a str,
    #[serde(rename = "ID")]
    id: &'a str,
    address: &'a str,
    port: u16,
    tags: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckRegisterBody<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    notes: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "ServiceID", skip_serializing_if = "Option::is_none")]
    service_id: Option<&'a str>,
}

/// HTTP client for the local Consul agent
#[derive(Clone)]
pub struct ConsulClient {
    http: Client,
    base_url: String,
}

impl ConsulClient {
    pub fn new(settings: &ConsulSettings) -> Result<Self> {
        Self::with_base_url(settings.base_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn expect_success(url: &str, response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(crate::Error::UnexpectedStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            })
        }
    }

    async fn get_kv(&self, key: &str, recurse: bool) -> Result<Vec<KvRecord>> {
        let url = self.url(&format!("kv/{}", encode_path(key)));
        let mut request = self.http.get(&url);
        if recurse {
            request = request.query(&[("recurse", "true")]);
        }
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let entries: Vec<ConsulKv> = Self::expect_success(&url, response)?.json().await?;
        entries.into_iter().map(ConsulKv::into_record).collect()
    }
}

#[async_trait]
impl CoordinationClient for ConsulClient {
    async fn kv_get(&self, key: &str) -> Result<Option<KvRecord>> {
        Ok(self.get_kv(key, false).await?.into_iter().next())
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        let url = self.url(&format!("kv/{}", encode_path(key)));
        let response = self.http.put(&url).body(value.to_string()).send().await?;
        Self::expect_success(&url, response)?;
        tracing::debug!("PUT {} = {}", key, value);
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<()> {
        let url = self.url(&format!("kv/{}", encode_path(key)));
        let response = self.http.delete(&url).send().await?;
        Self::expect_success(&url, response)?;
        tracing::debug!("DELETE {}", key);
        Ok(())
    }

    async fn kv_scan(&self, prefix: &str) -> Result<Vec<KvRecord>> {
        let mut records = self.get_kv(prefix, true).await?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn catalog_service(&self, name: &str) -> Result<Vec<CatalogEntry>> {
        let url = self.url(&format!("catalog/service/{}", encode_path(name)));
        let response = self.http.get(&url).send().await?;
        let services: Vec<ConsulCatalogService> =
            Self::expect_success(&url, response)?.json().await?;

        Ok(services
            .into_iter()
            .map(|s| CatalogEntry {
                address: if s.service_address.is_empty() {
                    s.address
                } else {
                    s.service_address
                },
                node: s.node,
                service_id: s.service_id,
                service_name: s.service_name,
                service_port: s.service_port,
                tags: s.service_tags.unwrap_or_default(),
            })
            .collect())
    }

    async fn healthy_service(&self, name: &str, tag: Option<&str>) -> Result<Vec<CatalogEntry>> {
        let url = self.url(&format!("health/service/{}", encode_path(name)));
        let mut request = self.http.get(&url).query(&[("passing", "true")]);
        if let Some(tag) = tag {
            request = request.query(&[("tag", tag)]);
        }
        let response = request.send().await?;
        let services: Vec<ConsulServiceHealth> =
            Self::expect_success(&url, response)?.json().await?;

        Ok(services
            .into_iter()
            .map(|h| CatalogEntry {
                address: if h.service.address.is_empty() {
                    h.node.address
                } else {
                    h.service.address
                },
                node: h.node.node,
                service_id: h.service.id,
                service_name: h.service.service,
                service_port: h.service.port,
                tags: h.service.tags.unwrap_or_default(),
            })
            .collect())
    }

    async fn register_service(&self, service: &ServiceRegistration) -> Result<()> {
        let url = self.url("agent/service/register");
        let body = ServiceRegisterBody {
            name: &service.name,
            id: &service.id,
            address: &service.address,
            port: service.port,
            tags: &service.tags,
        };
        let response = self.http.put(&url).json(&body).send().await?;
        Self::expect_success(&url, response)?;
        Ok(())
    }

    async fn register_check(&self, check: &CheckRegistration) -> Result<()> {
        let url = self.url("agent/check/register");
        let body = CheckRegisterBody {
            id: &check.id,
            name: &check.name,
            notes: &check.notes,
            ttl: format_ttl(check.ttl),
            service_id: check.service_id.as_deref(),
        };
        let response = self.http.put(&url).json(&body).send().await?;
        Self::expect_success(&url, response)?;
        Ok(())
    }

    async fn ttl_pass(&self, check_id: &str) -> Result<()> {
        let url = self.url(&format!("agent/check/pass/{}", encode_path(check_id)));
        let response = self.http.put(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(crate::Error::UnknownCheck(check_id.to_string()));
        }
        Self::expect_success(&url, response)?;
        Ok(())
    }

    async fn health_check(&self, check_id: &str) -> Result<Option<HealthCheck>> {
        let url = self.url("agent/checks");
        let response = self.http.get(&url).send().await?;
        let mut checks: HashMap<String, ConsulAgentCheck> =
            Self::expect_success(&url, response)?.json().await?;

        match checks.remove(check_id) {
            Some(check) => Ok(Some(HealthCheck {
                status: check.status.parse::<CheckStatus>()?,
                id: check.check_id,
                name: check.name,
                node: check.node,
                notes: check.notes,
                service_id: Some(check.service_id).filter(|s| !s.is_empty()),
                ttl: None,
            })),
            None => Ok(None),
        }
    }
}

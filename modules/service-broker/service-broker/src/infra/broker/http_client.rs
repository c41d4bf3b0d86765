//! HTTP client speaking the Open Service Broker API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use service_broker_sdk::{BrokerError, ServiceBinding, ServiceInstance, ServicePlan};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::response_parser::{
    RawResponse, parse_delete_response, parse_last_operation_response,
};
use crate::config::BrokerClientConfig;
use crate::domain::error::DomainError;
use crate::domain::ports::{BrokerClient, BrokerResponse, LastOperationPoll};

pub const API_VERSION_HEADER: &str = "X-Broker-API-Version";
pub const REQUEST_IDENTITY_HEADER: &str = "X-Broker-API-Request-Identity";

struct Received {
    method: &'static str,
    uri: String,
    status: u16,
    retry_after: Option<String>,
    body: String,
}

impl Received {
    fn raw(&self) -> RawResponse<'_> {
        RawResponse {
            method: self.method,
            uri: &self.uri,
            status: self.status,
            retry_after: self.retry_after.as_deref(),
            body: &self.body,
        }
    }
}

pub struct HttpBrokerClient {
    client: reqwest::Client,
    api_version: String,
    timeout: Duration,
}

impl HttpBrokerClient {
    /// Build a client whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerClient` when the underlying HTTP client cannot be built.
    pub fn new(config: &BrokerClientConfig, timeout: Duration) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| DomainError::broker_client(e.to_string()))?;

        Ok(Self {
            client,
            api_version: config.api_version.clone(),
            timeout,
        })
    }

    fn url(
        method: &'static str,
        plan: &ServicePlan,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Url, BrokerError> {
        let base = plan.broker.broker_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}")).map_err(|e| {
            BrokerError::Unreachable {
                method,
                uri: base.to_owned(),
                message: format!("invalid broker url: {e}"),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("service_id", &plan.service_id)
            .append_pair("plan_id", &plan.plan_id)
            .extend_pairs(query);
        Ok(url)
    }

    async fn send(
        &self,
        method: &'static str,
        plan: &ServicePlan,
        url: Url,
    ) -> Result<Received, BrokerError> {
        let uri = url.to_string();
        let builder = if method == "GET" {
            self.client.get(url)
        } else {
            self.client.delete(url)
        };

        let response = builder
            .header(API_VERSION_HEADER, &self.api_version)
            .header(REQUEST_IDENTITY_HEADER, Uuid::new_v4().to_string())
            .basic_auth(&plan.broker.auth_username, Some(&plan.broker.auth_password))
            .send()
            .await
            .map_err(|e| self.transport_error(method, &uri, &e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(method, &uri, &e))?;

        debug!(method, uri = %uri, status, "Broker responded");
        Ok(Received {
            method,
            uri,
            status,
            retry_after,
            body,
        })
    }

    fn transport_error(&self, method: &'static str, uri: &str, e: &reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::Timeout {
                method,
                uri: uri.to_owned(),
                timeout: self.timeout,
            }
        } else {
            BrokerError::Unreachable {
                method,
                uri: uri.to_owned(),
                message: e.to_string(),
            }
        }
    }

    async fn delete(
        &self,
        plan: &ServicePlan,
        path: &str,
        accepts_incomplete: bool,
    ) -> Result<BrokerResponse, BrokerError> {
        let query: &[(&str, &str)] = if accepts_incomplete {
            &[("accepts_incomplete", "true")]
        } else {
            &[]
        };
        let url = Self::url("DELETE", plan, path, query)?;
        let received = self.send("DELETE", plan, url).await?;
        parse_delete_response(&received.raw(), accepts_incomplete)
    }
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    #[instrument(skip_all, fields(instance_guid = %instance.guid, broker = %plan.broker.name))]
    async fn deprovision(
        &self,
        instance: &ServiceInstance,
        plan: &ServicePlan,
        accepts_incomplete: bool,
    ) -> Result<BrokerResponse, BrokerError> {
        let path = format!("v2/service_instances/{}", instance.guid);
        self.delete(plan, &path, accepts_incomplete).await
    }

    #[instrument(
        skip_all,
        fields(
            instance_guid = %instance.guid,
            binding_guid = %binding.guid,
            broker = %plan.broker.name
        )
    )]
    async fn unbind(
        &self,
        instance: &ServiceInstance,
        plan: &ServicePlan,
        binding: &ServiceBinding,
        accepts_incomplete: bool,
    ) -> Result<BrokerResponse, BrokerError> {
        let path = format!(
            "v2/service_instances/{}/service_bindings/{}",
            instance.guid, binding.guid
        );
        self.delete(plan, &path, accepts_incomplete).await
    }

    #[instrument(skip_all, fields(instance_guid = %instance.guid, broker = %plan.broker.name))]
    async fn fetch_last_operation(
        &self,
        instance: &ServiceInstance,
        plan: &ServicePlan,
        operation: Option<&str>,
    ) -> Result<LastOperationPoll, BrokerError> {
        let path = format!("v2/service_instances/{}/last_operation", instance.guid);
        let query: Vec<(&str, &str)> = operation.map(|op| ("operation", op)).into_iter().collect();
        let url = Self::url("GET", plan, &path, &query)?;
        let received = self.send("GET", plan, url).await?;
        parse_last_operation_response(&received.raw())
    }
}

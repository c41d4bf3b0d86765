//! YAML fixture describing the brokers, instances and bindings the in-memory
//! store starts with.
//!
//! ```yaml
//! brokers:
//!   - name: pg-broker
//!     url: http://localhost:9000
//!     username: admin
//!     password: secret
//! instances:
//!   - guid: 5b0c8f5e-62f4-4f55-9d2b-3d8d0b1d0a11
//!     name: orders-db
//!     plan: { broker: pg-broker, service_id: pg, plan_id: small }
//!     bindings:
//!       - app_guid: 0d1ab2a4-8f0e-4a55-a9c6-0e3c4d2c7f10
//!   - guid: 9e4e0a52-6d39-4c4c-9d63-8b4d3b2a6f21
//!     name: logs
//!     user_provided: { syslog_drain_url: "syslog://logs.example.com" }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, bail};
use chrono::Utc;
use figment::Figment;
use figment::providers::{Format, Yaml};
use serde::Deserialize;
use service_broker::infra::storage::InMemoryServiceInstanceRepository;
use service_broker::{
    BindingKind, InstanceKind, LastOperation, OperationState, OperationType, ServiceBinding,
    ServiceBroker, ServiceInstance, ServicePlan,
};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Seed {
    pub brokers: Vec<BrokerSeed>,
    pub instances: Vec<InstanceSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSeed {
    #[serde(default = "Uuid::new_v4")]
    pub guid: Uuid,
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSeed {
    pub guid: Uuid,
    pub name: String,
    #[serde(default = "Uuid::new_v4")]
    pub space_guid: Uuid,
    pub plan: Option<PlanSeed>,
    pub user_provided: Option<UserProvidedSeed>,
    pub last_operation: Option<LastOperationSeed>,
    #[serde(default)]
    pub bindings: Vec<BindingSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanSeed {
    /// Name of an entry in `brokers`.
    pub broker: String,
    pub service_id: String,
    pub plan_id: String,
    #[serde(default = "default_plan_name")]
    pub name: String,
    #[serde(default = "Uuid::new_v4")]
    pub guid: Uuid,
}

fn default_plan_name() -> String {
    "default".to_owned()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserProvidedSeed {
    pub credentials: serde_json::Value,
    pub syslog_drain_url: Option<String>,
    pub route_service_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LastOperationSeed {
    #[serde(rename = "type")]
    pub operation_type: String,
    pub state: String,
    pub description: Option<String>,
    pub broker_operation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSeed {
    #[serde(default = "Uuid::new_v4")]
    pub guid: Uuid,
    pub app_guid: Option<Uuid>,
    pub route_guid: Option<Uuid>,
}

impl Seed {
    /// # Errors
    ///
    /// Returns an error when the file is missing or not a valid seed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            bail!("seed file does not exist: {}", path.display());
        }
        Figment::from(Yaml::file(path))
            .extract()
            .with_context(|| format!("invalid seed file {}", path.display()))
    }

    /// Resolve broker references and build the stored models.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown brokers, invalid URLs, operation names
    /// outside the protocol, or instances that are neither managed nor
    /// user-provided.
    pub fn into_models(self) -> anyhow::Result<(Vec<ServiceInstance>, Vec<ServiceBinding>)> {
        let mut brokers = HashMap::new();
        for broker in self.brokers {
            let broker_url = Url::parse(&broker.url)
                .with_context(|| format!("invalid url for broker {}", broker.name))?;
            brokers.insert(
                broker.name.clone(),
                ServiceBroker {
                    guid: broker.guid,
                    name: broker.name,
                    broker_url,
                    auth_username: broker.username,
                    auth_password: broker.password,
                },
            );
        }

        let mut instances = Vec::with_capacity(self.instances.len());
        let mut bindings = Vec::new();
        for seed in self.instances {
            let kind = match (seed.plan, seed.user_provided) {
                (Some(plan), None) => {
                    let Some(broker) = brokers.get(&plan.broker) else {
                        bail!("instance {} references unknown broker {}", seed.name, plan.broker);
                    };
                    InstanceKind::Managed {
                        plan: ServicePlan {
                            guid: plan.guid,
                            name: plan.name,
                            service_id: plan.service_id,
                            plan_id: plan.plan_id,
                            broker: broker.clone(),
                        },
                    }
                }
                (None, Some(ups)) => InstanceKind::UserProvided {
                    credentials: ups.credentials,
                    syslog_drain_url: ups.syslog_drain_url,
                    route_service_url: ups.route_service_url,
                },
                _ => bail!(
                    "instance {} needs exactly one of `plan` or `user_provided`",
                    seed.name
                ),
            };
            let last_operation = seed
                .last_operation
                .map(LastOperationSeed::into_model)
                .transpose()
                .with_context(|| format!("instance {}", seed.name))?;

            for binding in seed.bindings {
                let kind = match (binding.app_guid, binding.route_guid) {
                    (Some(app_guid), None) => BindingKind::App { app_guid },
                    (None, Some(route_guid)) => BindingKind::Route { route_guid },
                    _ => bail!(
                        "binding {} needs exactly one of `app_guid` or `route_guid`",
                        binding.guid
                    ),
                };
                bindings.push(ServiceBinding {
                    guid: binding.guid,
                    service_instance_guid: seed.guid,
                    kind,
                    credentials: serde_json::Value::Object(serde_json::Map::new()),
                    created_at: Utc::now(),
                });
            }

            instances.push(ServiceInstance {
                guid: seed.guid,
                name: seed.name,
                space_guid: seed.space_guid,
                kind,
                last_operation,
            });
        }

        Ok((instances, bindings))
    }

    /// Load everything into `store`. Returns `(instances, bindings)` counts.
    ///
    /// # Errors
    ///
    /// See [`Seed::into_models`].
    pub async fn apply(
        self,
        store: &InMemoryServiceInstanceRepository,
    ) -> anyhow::Result<(usize, usize)> {
        let (instances, bindings) = self.into_models()?;
        let counts = (instances.len(), bindings.len());
        for instance in instances {
            store.insert_instance(instance).await;
        }
        for binding in bindings {
            store.insert_binding(binding).await?;
        }
        Ok(counts)
    }
}

impl LastOperationSeed {
    fn into_model(self) -> anyhow::Result<LastOperation> {
        let operation_type = match self.operation_type.as_str() {
            "create" => OperationType::Create,
            "update" => OperationType::Update,
            "delete" => OperationType::Delete,
            other => bail!("unknown operation type: {other}"),
        };
        let state = self.state.parse::<OperationState>()?;
        let now = Utc::now();
        Ok(LastOperation {
            operation_type,
            state,
            description: self.description,
            broker_operation: self.broker_operation,
            created_at: now,
            updated_at: now,
        })
    }
}

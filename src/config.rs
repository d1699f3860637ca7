//! Startup settings
//!
//! Every setting can be given as a flag or through the environment variable
//! the deployment manifests set.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::adapters::{
    AdxAdapter, AdxSettings, AzureCredential, AzureTarget, BackendAdapter, EventHubAdapter,
    PlatformAdapter, PlatformAuth, PowerBiAdapter, ServicePrincipal, StaticToken, TokenSource,
    ARM_ENDPOINT, AZURE_AUTHORITY, EVENTHUB_DATA_RECEIVER_ROLE, EVENTHUB_DATA_SENDER_ROLE,
    POWER_BI_API, POWER_BI_APP,
};
use crate::controllers::WatchConfig;
use crate::error::{Error, Result};
use crate::resource::ResourceKind;

/// Reconciles one kind of Cosmo Tech resource in one namespace
#[derive(Parser, Clone)]
#[command(name = "cosmotech-operator", version, about)]
pub struct Settings {
    /// Kind of resource this process reconciles
    #[arg(long, env = "RESOURCE_KIND", value_enum)]
    pub kind: ResourceKind,

    /// Namespace holding the custom resources
    #[arg(long, env = "NAMESPACE", default_value = "cosmotech")]
    pub namespace: String,

    /// Cosmo Tech platform API root
    #[arg(long, env = "API_URL")]
    pub api_url: Option<String>,

    /// Platform API key; takes precedence over Azure AD authentication
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Azure AD scope of the platform API
    #[arg(long, env = "API_SCOPE")]
    pub api_scope: Option<String>,

    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[arg(long, env = "TENANT_ID")]
    pub tenant_id: Option<String>,

    /// Azure AD authority
    #[arg(long, env = "AZURE_AUTHORITY", default_value = AZURE_AUTHORITY)]
    pub authority: String,

    #[arg(long, env = "AZURE_SUBSCRIPTION")]
    pub subscription: Option<String>,

    #[arg(long, env = "RESOURCE_GROUP_NAME")]
    pub resource_group: Option<String>,

    #[arg(long, env = "LOCATION")]
    pub location: Option<String>,

    /// Azure Resource Manager endpoint
    #[arg(long, env = "ARM_ENDPOINT", default_value = ARM_ENDPOINT)]
    pub arm_endpoint: String,

    #[arg(long, env = "ADX_CLUSTER_NAME")]
    pub adx_cluster_name: Option<String>,

    /// Managed identity of the ADX cluster
    #[arg(long, env = "ADX_CLUSTER_PRINCIPAL_ID")]
    pub adx_cluster_principal_id: Option<String>,

    /// Identity of the platform, granted send rights on workspace event hubs
    #[arg(long, env = "PLATFORM_PRINCIPAL_ID")]
    pub platform_principal_id: Option<String>,

    #[arg(long, env = "EVENTHUB_BUILT_DATA_RECEIVER", default_value = EVENTHUB_DATA_RECEIVER_ROLE)]
    pub eventhub_receiver_role: String,

    #[arg(long, env = "EVENTHUB_BUILT_DATA_SENDER", default_value = EVENTHUB_DATA_SENDER_ROLE)]
    pub eventhub_sender_role: String,

    /// Static Power BI access token
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, env = "POWER_BI_API", default_value = POWER_BI_API)]
    pub power_bi_api: String,

    #[arg(long, env = "POWER_BI_APP", default_value = POWER_BI_APP)]
    pub power_bi_app: String,

    /// Port of the metrics and health server
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// First reconnect delay after a watch failure, in milliseconds
    #[arg(long, env = "WATCH_INITIAL_BACKOFF_MS", default_value_t = 500)]
    pub watch_initial_backoff_ms: u64,

    /// Reconnect delay cap, in seconds
    #[arg(long, env = "WATCH_MAX_BACKOFF_SECS", default_value_t = 60)]
    pub watch_max_backoff_secs: u64,

    /// Watch failures in a row before the process exits
    #[arg(long, env = "WATCH_MAX_FAILURES", default_value_t = 10)]
    pub watch_max_failures: u32,

    /// Deferrals of one resource before it is marked failed
    #[arg(long, env = "MAX_DEFERRALS", default_value_t = 30)]
    pub max_deferrals: u32,
}

impl Settings {
    /// Check that every setting the selected kind needs is present
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        let mut require = |name: &'static str, value: &Option<String>| {
            if value.as_deref().map_or(true, str::is_empty) {
                missing.push(name);
            }
        };

        match self.kind {
            ResourceKind::Organization
            | ResourceKind::Solution
            | ResourceKind::Workspace
            | ResourceKind::Runner
            | ResourceKind::Run => {
                require("API_URL", &self.api_url);
                if self.api_key.is_none() {
                    require("API_SCOPE", &self.api_scope);
                    require("CLIENT_ID", &self.client_id);
                    require("CLIENT_SECRET", &self.client_secret);
                    require("TENANT_ID", &self.tenant_id);
                }
            }
            ResourceKind::AdxDatabase | ResourceKind::EventHub => {
                require("CLIENT_ID", &self.client_id);
                require("CLIENT_SECRET", &self.client_secret);
                require("TENANT_ID", &self.tenant_id);
                require("AZURE_SUBSCRIPTION", &self.subscription);
                require("RESOURCE_GROUP_NAME", &self.resource_group);
                require("LOCATION", &self.location);
                if self.kind == ResourceKind::AdxDatabase {
                    require("ADX_CLUSTER_NAME", &self.adx_cluster_name);
                    require("PLATFORM_PRINCIPAL_ID", &self.platform_principal_id);
                }
            }
            ResourceKind::Report => {
                if self.token.is_none() {
                    require("CLIENT_ID", &self.client_id);
                    require("CLIENT_SECRET", &self.client_secret);
                    require("TENANT_ID", &self.tenant_id);
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "missing settings for {}: {}",
                self.kind,
                missing.join(", ")
            )))
        }
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            initial_backoff: Duration::from_millis(self.watch_initial_backoff_ms),
            max_backoff: Duration::from_secs(self.watch_max_backoff_secs),
            max_consecutive_failures: self.watch_max_failures,
            max_deferrals: self.max_deferrals,
        }
    }

    fn service_principal(&self) -> Result<ServicePrincipal> {
        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Ok(ServicePrincipal {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => Err(Error::config("TENANT_ID, CLIENT_ID and CLIENT_SECRET are required")),
        }
    }

    fn credential(&self, http: &reqwest::Client) -> Result<Arc<dyn TokenSource>> {
        Ok(Arc::new(AzureCredential::with_authority(
            http.clone(),
            self.authority.clone(),
            self.service_principal()?,
        )))
    }

    fn azure_target(&self) -> Result<AzureTarget> {
        let value = |name: &str, v: &Option<String>| {
            v.clone().ok_or_else(|| Error::config(format!("{name} is required")))
        };
        Ok(AzureTarget {
            subscription_id: value("AZURE_SUBSCRIPTION", &self.subscription)?,
            resource_group: value("RESOURCE_GROUP_NAME", &self.resource_group)?,
            location: value("LOCATION", &self.location)?,
            tenant_id: value("TENANT_ID", &self.tenant_id)?,
        })
    }

    /// Build the backend adapter for the selected kind
    pub fn adapter(&self, http: reqwest::Client) -> Result<Arc<dyn BackendAdapter>> {
        self.validate()?;

        let adapter: Arc<dyn BackendAdapter> = match self.kind {
            ResourceKind::AdxDatabase => Arc::new(AdxAdapter::new(
                http.clone(),
                self.arm_endpoint.clone(),
                self.credential(&http)?,
                self.azure_target()?,
                AdxSettings {
                    cluster_name: self.adx_cluster_name.clone().unwrap_or_default(),
                    cluster_principal_id: self.adx_cluster_principal_id.clone(),
                    platform_principal_id: self.platform_principal_id.clone().unwrap_or_default(),
                    receiver_role_id: self.eventhub_receiver_role.clone(),
                    sender_role_id: self.eventhub_sender_role.clone(),
                },
            )),
            ResourceKind::EventHub => Arc::new(EventHubAdapter::new(
                http.clone(),
                self.arm_endpoint.clone(),
                self.credential(&http)?,
                self.azure_target()?,
            )),
            ResourceKind::Report => {
                let token: Arc<dyn TokenSource> = match &self.token {
                    Some(token) => Arc::new(StaticToken::new(token.clone())),
                    None => self.credential(&http)?,
                };
                Arc::new(PowerBiAdapter::new(
                    http,
                    self.power_bi_api.clone(),
                    self.power_bi_app.clone(),
                    token,
                ))
            }
            kind => {
                let auth = match (&self.api_key, &self.api_scope) {
                    (Some(key), _) => PlatformAuth::ApiKey(key.clone()),
                    (None, Some(scope)) => PlatformAuth::Bearer {
                        source: self.credential(&http)?,
                        scope: scope.clone(),
                    },
                    (None, None) => return Err(Error::config("API_KEY or API_SCOPE is required")),
                };
                Arc::new(PlatformAdapter::new(
                    http,
                    self.api_url.clone().unwrap_or_default(),
                    kind,
                    auth,
                )?)
            }
        };
        Ok(adapter)
    }
}

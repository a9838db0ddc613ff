use std::sync::Arc;

use crate::auth::oauth::{IdentityProvider, OidcProvider};
use crate::auth::{AuthChain, JwtCodec, PermissionResolver};
use crate::config::{ClusterBackend, Config, KubernetesConfig};
use crate::db::{CredentialStore, Store};
use crate::k8s::{ClusterApi, InMemoryCluster, KubeCluster};
use crate::services::{
    AuthService, DefaultAuthService, LifecycleOrchestrator, NetworkExposureManager,
    RemoteExecutor,
};

const PROVIDER_TIMEOUT_SECONDS: u64 = 15;

/// Build a shared HTTP client for identity-provider calls.
fn build_shared_http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .user_agent(concat!("Blockyard/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

/// Picks the orchestration backend named in the config.
pub async fn connect_cluster(config: &KubernetesConfig) -> anyhow::Result<Arc<dyn ClusterApi>> {
    let cluster: Arc<dyn ClusterApi> = match config.backend {
        ClusterBackend::Cluster => Arc::new(KubeCluster::connect(config).await?),
        ClusterBackend::Memory => {
            tracing::warn!("Using the in-memory cluster backend; nothing will be scheduled");
            Arc::new(InMemoryCluster::new())
        }
    };
    Ok(cluster)
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub store: Store,

    pub credentials: Arc<dyn CredentialStore>,

    pub cluster: Arc<dyn ClusterApi>,

    pub jwt: Arc<JwtCodec>,

    pub auth_chain: AuthChain,

    pub permissions: PermissionResolver,

    pub auth_service: Arc<dyn AuthService>,

    pub executor: Arc<RemoteExecutor>,

    pub network: Arc<NetworkExposureManager>,

    pub lifecycle: Arc<LifecycleOrchestrator>,

    pub identity_provider: Option<Arc<dyn IdentityProvider>>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let cluster = connect_cluster(&config.kubernetes).await?;

        let identity_provider: Option<Arc<dyn IdentityProvider>> = if config.oauth.enabled {
            let http_client = build_shared_http_client(PROVIDER_TIMEOUT_SECONDS)?;
            Some(Arc::new(OidcProvider::new(http_client, &config.oauth)))
        } else {
            None
        };

        Ok(Self::from_parts(config, store, cluster, identity_provider))
    }

    /// Wires every service around an existing store and cluster.
    #[must_use]
    pub fn from_parts(
        config: Config,
        store: Store,
        cluster: Arc<dyn ClusterApi>,
        identity_provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let credentials: Arc<dyn CredentialStore> = Arc::new(store.clone());
        let jwt = Arc::new(JwtCodec::from_config(&config.security));

        let auth_chain = AuthChain::standard(Arc::clone(&jwt), Arc::clone(&credentials));
        let permissions = PermissionResolver::new(Arc::clone(&credentials));
        let auth_service = Arc::new(DefaultAuthService::new(
            Arc::clone(&credentials),
            Arc::clone(&jwt),
            config.security.clone(),
        )) as Arc<dyn AuthService + Send + Sync + 'static>;

        let executor = Arc::new(RemoteExecutor::new(
            Arc::clone(&cluster),
            config.exec_timeout(),
        ));
        let network = Arc::new(NetworkExposureManager::new(Arc::clone(&cluster)));
        let lifecycle = Arc::new(LifecycleOrchestrator::new(
            Arc::clone(&cluster),
            Arc::clone(&credentials),
            Arc::clone(&executor),
            Arc::clone(&network),
            config.kubernetes.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            credentials,
            cluster,
            jwt,
            auth_chain,
            permissions,
            auth_service,
            executor,
            network,
            lifecycle,
            identity_provider,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

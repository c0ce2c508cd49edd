//! Dependency wiring.
//!
//! Everything the handlers touch is assembled here, once, into explicit
//! dependency structs. There is no ambient state: a handler sees exactly
//! what bootstrap handed it.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use oxidp_auth::config::AuthConfig;
use oxidp_auth::flow::{FlowEngine, LoginService};
use oxidp_auth::http::OpState;
use oxidp_auth::keys::{KeyManager, SigningAlgorithm};
use oxidp_auth::oauth::dpop::DpopValidator;
use oxidp_auth::storage::{ClientStore, ConsentStore, MemoryClientStore, MemoryConsentStore};
use oxidp_auth::token::{TokenMinter, TokenService};
use oxidp_config::{AppConfig, MemoryVersionStore, SettingsEngine, SqlVersionStore, TracingEventSink, VersionStore};
use oxidp_core::clock::{Clock, SystemClock};
use oxidp_core::tenant::{Tenant, TenantPolicies};
use oxidp_directory::{
    MemoryUserStore, SettingsCache, SettingsSource, SqlUserStore, UserDirectory, UserStore,
};
use oxidp_storage::{AdapterRegistry, DynAdapter};
use oxidp_storage_postgres::{PostgresAdapter, PostgresConfig};
use oxidp_store::{
    AuthCodeStore, ChallengeStore, CibaRequestStore, DeviceCodeStore, DpopJtiStore, FlowStateStore,
    ParRequestStore, RateLimiter, RefreshTokenRotator, RevocationStore, SessionStore,
    SetupTokenStore,
};

/// The assembled application.
pub struct AppContext {
    /// Handler state for the protocol router.
    pub op_state: OpState,

    /// Stores swept by the maintenance task.
    pub maintenance: MaintenanceTargets,

    /// The settings engine behind the admin surface.
    pub settings: Arc<SettingsEngine>,

    /// The user directory.
    pub directory: Arc<UserDirectory>,

    /// The CORE adapter, when a relational backend is configured.
    pub core_adapter: Option<DynAdapter>,

    /// Process configuration.
    pub config: AppConfig,
}

/// Store handles the background sweeper visits.
#[derive(Clone)]
pub struct MaintenanceTargets {
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) codes: Arc<AuthCodeStore>,
    pub(crate) rotator: Arc<RefreshTokenRotator>,
    pub(crate) challenges: Arc<ChallengeStore>,
    pub(crate) devices: Arc<DeviceCodeStore>,
    pub(crate) ciba: Arc<CibaRequestStore>,
    pub(crate) jtis: Arc<DpopJtiStore>,
    pub(crate) revocations: Arc<RevocationStore>,
    pub(crate) par: Arc<ParRequestStore>,
    pub(crate) flows: Arc<FlowStateStore>,
    pub(crate) limiter: Arc<RateLimiter>,
}

/// Assembles the application from its configuration.
///
/// The in-memory sharded stores are authoritative for protocol state. When
/// `core_database_url` is configured, the directory and settings history
/// run on the relational adapter; otherwise they stay in memory, which is
/// the single-node and test deployment.
pub async fn bootstrap(config: AppConfig) -> anyhow::Result<AppContext> {
    let clock: Arc<dyn Clock> = SystemClock::shared();
    let mut auth_config = AuthConfig::new(config.issuer.clone());
    auth_config.cookie_same_site_none =
        config.cookie_same_site == oxidp_config::CookieSameSite::None;

    let tenant = Tenant {
        tenant_id: "default".to_string(),
        base_domain: config.issuer.clone(),
        default_partition: "default".to_string(),
        policies: TenantPolicies::default(),
    };

    // Sharded single-writer stores.
    let shards = &config.shards;
    let sessions = Arc::new(
        SessionStore::new(shards.session_shards, clock.clone()).context("session store")?,
    );
    let codes =
        Arc::new(AuthCodeStore::new(shards.code_shards, clock.clone()).context("code store")?);
    let rotator = Arc::new(
        RefreshTokenRotator::new(shards.refresh_shards, clock.clone()).context("refresh rotator")?,
    );
    let challenges = Arc::new(
        ChallengeStore::new(shards.challenge_shards, clock.clone()).context("challenge store")?,
    );
    let devices = Arc::new(
        DeviceCodeStore::new(shards.misc_shards, clock.clone()).context("device store")?,
    );
    let ciba =
        Arc::new(CibaRequestStore::new(shards.misc_shards, clock.clone()).context("ciba store")?);
    let jtis = Arc::new(DpopJtiStore::new(shards.misc_shards, clock.clone()).context("jti store")?);
    let revocations = Arc::new(
        RevocationStore::new(shards.misc_shards, clock.clone()).context("revocation store")?,
    );
    let par =
        Arc::new(ParRequestStore::new(shards.misc_shards, clock.clone()).context("PAR store")?);
    let flows = Arc::new(
        FlowStateStore::new(shards.flow_state_shards, clock.clone()).context("flow store")?,
    );
    let limiter =
        Arc::new(RateLimiter::new(shards.misc_shards, clock.clone()).context("rate limiter")?);
    let setup = Arc::new(SetupTokenStore::new(clock.clone()));

    // Keys and minting.
    let keys = Arc::new(
        KeyManager::new(
            shards.misc_shards,
            clock.clone(),
            vec![
                SigningAlgorithm::RS256,
                SigningAlgorithm::ES256,
                SigningAlgorithm::EdDSA,
            ],
            auth_config.key_grace_period_secs,
        )
        .map_err(|e| anyhow::anyhow!("key manager: {e}"))?,
    );
    let minter = Arc::new(TokenMinter::new(
        keys.clone(),
        clock.clone(),
        auth_config.clone(),
        SigningAlgorithm::ES256,
    ));

    // Registries and the flow engine.
    let clients: Arc<dyn ClientStore> = Arc::new(MemoryClientStore::new());
    let consent: Arc<dyn ConsentStore> = Arc::new(MemoryConsentStore::new());
    let engine = Arc::new(FlowEngine::new(
        clients.clone(),
        consent.clone(),
        par.clone(),
        codes.clone(),
        flows.clone(),
        minter.clone(),
        auth_config.clone(),
    ));

    let token_service = Arc::new(TokenService::new(
        codes.clone(),
        rotator.clone(),
        revocations.clone(),
        devices.clone(),
        ciba.clone(),
        minter,
        keys.clone(),
        clock.clone(),
        auth_config.clone(),
    ));

    let dpop = Arc::new(DpopValidator::new(
        jtis.clone(),
        clock.clone(),
        auth_config.dpop_proof_window_secs,
    ));

    let login = Arc::new(LoginService::new(
        challenges.clone(),
        sessions.clone(),
        clock.clone(),
        auth_config.clone(),
    ));

    // Settings versioning and the directory, relational when configured.
    let core_adapter: Option<DynAdapter> = match config.core_database_url.as_deref() {
        Some(url) => {
            let mut pg_config = PostgresConfig::new(url);
            pg_config.statement_deadline_ms = config.storage_deadline.as_millis() as u64;
            let adapter = PostgresAdapter::connect(&pg_config)
                .await
                .map_err(|e| anyhow::anyhow!("CORE adapter: {e}"))?;
            Some(Arc::new(adapter) as DynAdapter)
        }
        None => None,
    };

    let version_store: Arc<dyn VersionStore> = match &core_adapter {
        Some(adapter) => Arc::new(SqlVersionStore::new(adapter.clone())),
        None => Arc::new(MemoryVersionStore::new()),
    };
    let settings = Arc::new(SettingsEngine::new(
        version_store,
        Arc::new(TracingEventSink),
        clock.clone(),
    ));
    let settings_cache = Arc::new(SettingsCache::new(
        Arc::new(EngineSettingsSource {
            engine: settings.clone(),
        }),
        clock.clone(),
        10_000,
    ));
    let user_store: Arc<dyn UserStore> = match &core_adapter {
        Some(adapter) => {
            // Every PII partition rides the CORE adapter until per-partition
            // databases are provisioned in configuration.
            let registry = AdapterRegistry::new(
                adapter.clone(),
                std::collections::HashMap::from([("default".to_string(), adapter.clone())]),
            );
            Arc::new(SqlUserStore::new(registry))
        }
        None => Arc::new(MemoryUserStore::new()),
    };
    let directory = Arc::new(UserDirectory::new(user_store, settings_cache, clock.clone()));

    info!(issuer = %config.issuer, "application assembled");

    let op_state = OpState {
        tenant,
        config: auth_config,
        engine,
        login,
        token_service,
        clients,
        consent,
        sessions: sessions.clone(),
        par: par.clone(),
        devices: devices.clone(),
        ciba: ciba.clone(),
        setup,
        keys,
        dpop,
        limiter: limiter.clone(),
        admin_secret: config.admin_api_secret.clone(),
    };

    Ok(AppContext {
        op_state,
        core_adapter,
        maintenance: MaintenanceTargets {
            sessions,
            codes,
            rotator,
            challenges,
            devices,
            ciba,
            jtis,
            revocations,
            par,
            flows,
            limiter,
        },
        settings,
        directory,
        config,
    })
}

/// Adapts the settings engine to the directory's settings source.
struct EngineSettingsSource {
    engine: Arc<SettingsEngine>,
}

#[async_trait::async_trait]
impl SettingsSource for EngineSettingsSource {
    async fn load(&self) -> oxidp_directory::DirectoryResult<oxidp_directory::PartitionSettings> {
        match self.engine.current("partition").await {
            Ok(snapshot) => serde_json::from_value(snapshot).map_err(|e| {
                oxidp_directory::DirectoryError::Storage(oxidp_storage::StorageError::decode(
                    e.to_string(),
                ))
            }),
            // No version written yet: a single-partition default.
            Err(_) => Ok(oxidp_directory::PartitionSettings {
                default_partition: "default".to_string(),
                ip_routing_enabled: false,
                available_partitions: vec!["default".to_string()],
                tenant_partitions: Default::default(),
                partition_rules: vec![],
                updated_at: 0,
                updated_by: None,
            }),
        }
    }
}

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    auth::{
        password::{Argon2Hasher, CredentialHasher},
        services::AuthSessionManager,
    },
    clock::{Clock, SystemClock},
    config::AppConfig,
    drivers::availability::DriverAvailabilityRegistry,
    notify::{LogNotifier, Notifier, SendGridNotifier},
    rides::{lifecycle::RideLifecycleManager, query::RideQueryService},
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthSessionManager,
    pub rides: RideLifecycleManager,
    pub queries: RideQueryService,
    pub drivers: DriverAvailabilityRegistry,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    warn!(error = %e, "migration failed; continuing");
                }
                info!("using postgres store");
                Store::postgres(db)
            }
            None => {
                warn!("DATABASE_URL not set; rides and users are kept in memory");
                Store::in_memory()
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.mail {
            Some(mail) => Arc::new(SendGridNotifier::new(mail.clone())),
            None => {
                info!("no mail provider configured; notifications go to the log");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::build(
            config,
            store,
            Arc::new(Argon2Hasher),
            notifier,
            Arc::new(SystemClock),
        ))
    }

    pub fn build(
        config: AppConfig,
        store: Store,
        hasher: Arc<dyn CredentialHasher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let drivers = DriverAvailabilityRegistry::new(store.clone());
        let auth = AuthSessionManager::new(
            store.clone(),
            hasher,
            notifier,
            clock.clone(),
            config.auth.clone(),
        );
        let rides = RideLifecycleManager::new(store.clone(), drivers.clone(), clock);
        let queries = RideQueryService::new(store);
        Self {
            auth,
            rides,
            queries,
            drivers,
        }
    }
}

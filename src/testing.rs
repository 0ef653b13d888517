//! In-memory wiring for service and router tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::macros::datetime;

use crate::{
    auth::{
        password::CredentialHasher,
        repo_types::{NewUser, Role, User},
        services::{AuthSessionManager, Authenticated},
    },
    clock::ManualClock,
    config::{AppConfig, AuthConfig},
    drivers::{
        availability::DriverAvailabilityRegistry,
        repo_types::{Driver, NewDriver},
    },
    notify::Notifier,
    rides::{lifecycle::RideLifecycleManager, query::RideQueryService},
    state::AppState,
    store::{memory::MemoryStore, Store},
};

/// Reversible "hash" so tests do not pay for argon2.
pub struct PlainHasher;

impl CredentialHasher for PlainHasher {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        Ok(format!("plain:{plain}"))
    }

    fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        Ok(hash.strip_prefix("plain:") == Some(plain))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Sent {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        });
        Ok(())
    }
}

pub struct TestEnv {
    pub memory: Arc<MemoryStore>,
    pub store: Store,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: AppConfig,
    pub state: AppState,
    pub auth: AuthSessionManager,
    pub rides: RideLifecycleManager,
    pub queries: RideQueryService,
    pub drivers: DriverAvailabilityRegistry,
}

impl TestEnv {
    pub fn new() -> Self {
        let memory = Arc::new(MemoryStore::default());
        let store = Store::from_memory(memory.clone());
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 10:00 UTC)));
        let notifier = Arc::new(RecordingNotifier::default());
        let config = AppConfig {
            database_url: None,
            auth: AuthConfig::default(),
            mail: None,
        };
        let state = AppState::build(
            config.clone(),
            store.clone(),
            Arc::new(PlainHasher),
            notifier.clone(),
            clock.clone(),
        );
        Self {
            memory,
            store,
            clock,
            notifier,
            config,
            auth: state.auth.clone(),
            rides: state.rides.clone(),
            queries: state.queries.clone(),
            drivers: state.drivers.clone(),
            state,
        }
    }

    /// Password + OTP login, reading the issued code straight from the store.
    pub async fn login(&self, email: &str, password: &str) -> Authenticated {
        self.auth.login(email, password).await.unwrap();
        let code = self.store.otps.find(email).await.unwrap().unwrap().code;
        self.auth.verify_otp(email, &code).await.unwrap()
    }

    pub async fn reset_token_of(&self, user_id: i64) -> String {
        self.memory.reset_token_of(user_id).await.unwrap().token
    }

    pub async fn rider(&self, email: &str, phone: &str) -> User {
        self.user(email, phone, Role::Rider).await
    }

    pub async fn user(&self, email: &str, phone: &str, role: Role) -> User {
        self.store
            .users
            .insert(NewUser {
                email: email.into(),
                password_hash: "plain:password123".into(),
                name: "Test".into(),
                phone: phone.into(),
                role,
            })
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn driver(&self) -> Driver {
        self.store
            .drivers
            .insert(NewDriver {
                name: "Driver".into(),
                phone: "+250780000000".into(),
            })
            .await
            .unwrap()
    }

    /// Inserts drivers until one with `id` exists.
    pub async fn driver_with_id(&self, id: i64) -> Driver {
        loop {
            let driver = self.driver().await;
            if driver.id >= id {
                return driver;
            }
        }
    }
}

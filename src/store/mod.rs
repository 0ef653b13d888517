//! Persistence gateway.
//!
//! One trait per entity. Services only see these traits; `memory` backs tests and
//! database-less runs, `postgres` backs production.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    auth::repo_types::{NewUser, OtpCheck, OtpToken, PasswordResetToken, Redemption, User},
    drivers::repo_types::{Driver, NewDriver},
    rides::repo_types::{NewRide, Ride, RideChange, RideStatus, Transition},
};

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>>;
    /// Returns `None` when the email or phone is already taken.
    async fn insert(&self, user: NewUser) -> anyhow::Result<Option<User>>;
    /// Inserts a user and its driver record in one atomic write. `None` as for `insert`.
    async fn insert_with_driver(
        &self,
        user: NewUser,
        driver: NewDriver,
    ) -> anyhow::Result<Option<(User, Driver)>>;
}

#[async_trait]
pub trait DriverStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Driver>>;
    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<Driver>>;
    async fn insert(&self, driver: NewDriver) -> anyhow::Result<Driver>;
    /// Explicit toggle by the driver. Returns the updated driver, or `None` if it does not exist.
    async fn set_available(&self, id: i64, available: bool) -> anyhow::Result<Option<Driver>>;
    /// Marks the driver busy, remembering whether they were online.
    async fn occupy(&self, id: i64) -> anyhow::Result<Option<Driver>>;
    /// Puts the driver back online if they were online before their trips and no
    /// ACCEPTED or STARTED ride still references them.
    async fn release(&self, id: i64) -> anyhow::Result<Option<Driver>>;
    async fn list_available(&self) -> anyhow::Result<Vec<Driver>>;
}

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn insert(&self, ride: NewRide) -> anyhow::Result<Ride>;
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Ride>>;
    async fn list_all(&self) -> anyhow::Result<Vec<Ride>>;
    async fn find_by_rider(&self, rider_id: i64) -> anyhow::Result<Vec<Ride>>;
    async fn find_by_driver(&self, driver_id: i64) -> anyhow::Result<Vec<Ride>>;
    async fn find_by_status(&self, status: RideStatus) -> anyhow::Result<Vec<Ride>>;
    /// Case-insensitive substring match on pickup or dropoff location.
    async fn search(&self, query: &str) -> anyhow::Result<Vec<Ride>>;
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;
    /// Atomically applies `change` iff the ride's current status is in `change.allowed_from()`.
    async fn transition(&self, id: i64, change: RideChange) -> anyhow::Result<Transition>;
    async fn set_rating(
        &self,
        id: i64,
        rating: i32,
        comment: Option<String>,
    ) -> anyhow::Result<Option<Ride>>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Replaces code and expiry of the user's single token in one write.
    async fn upsert(&self, token: OtpToken) -> anyhow::Result<()>;
    async fn find(&self, user_email: &str) -> anyhow::Result<Option<OtpToken>>;
    /// Deletes the token iff `code` matches and `now < expires_at`.
    async fn consume(
        &self,
        user_email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<OtpCheck>;
}

#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Replaces any previous token of the same user.
    async fn upsert(&self, token: PasswordResetToken) -> anyhow::Result<()>;
    /// Removes the token and, if it has not expired at `now`, stores `password_hash`
    /// for its user. Both happen in one atomic write.
    async fn redeem(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> anyhow::Result<Redemption>;
}

/// Bundle of store handles shared by the services.
#[derive(Clone)]
pub struct Store {
    pub users: Arc<dyn UserStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub rides: Arc<dyn RideStore>,
    pub otps: Arc<dyn OtpStore>,
    pub reset_tokens: Arc<dyn ResetTokenStore>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(memory::MemoryStore::default()))
    }

    pub fn from_memory(mem: Arc<memory::MemoryStore>) -> Self {
        Self {
            users: mem.clone(),
            drivers: mem.clone(),
            rides: mem.clone(),
            otps: mem.clone(),
            reset_tokens: mem,
        }
    }

    pub fn postgres(db: sqlx::PgPool) -> Self {
        let pg = Arc::new(postgres::PgStore::new(db));
        Self {
            users: pg.clone(),
            drivers: pg.clone(),
            rides: pg.clone(),
            otps: pg.clone(),
            reset_tokens: pg,
        }
    }
}

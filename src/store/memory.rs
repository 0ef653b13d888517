use std::collections::{BTreeMap, HashMap, HashSet};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{DriverStore, OtpStore, ResetTokenStore, RideStore, UserStore};
use crate::{
    auth::repo_types::{NewUser, OtpCheck, OtpToken, PasswordResetToken, Redemption, User},
    drivers::repo_types::{Driver, NewDriver},
    rides::repo_types::{NewRide, Ride, RideChange, RideStatus, Transition},
};

struct Table<T> {
    next_id: i64,
    rows: BTreeMap<i64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            rows: BTreeMap::new(),
        }
    }
}

impl<T> Table<T> {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Drivers {
    table: Table<Driver>,
    /// Drivers to put back online once their last active ride ends.
    resume: HashSet<i64>,
}

/// Process-local store. Every write happens under the owning table's write lock,
/// which is what makes transitions and upserts atomic.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<Table<User>>,
    drivers: RwLock<Drivers>,
    rides: RwLock<Table<Ride>>,
    otps: RwLock<HashMap<String, OtpToken>>,
    reset_tokens: RwLock<HashMap<i64, PasswordResetToken>>,
    #[cfg(test)]
    fail_driver_inserts: AtomicBool,
}

impl MemoryStore {
    /// The live reset token of a user, if any.
    #[cfg(test)]
    pub async fn reset_token_of(&self, user_id: i64) -> Option<PasswordResetToken> {
        self.reset_tokens.read().await.get(&user_id).cloned()
    }

    /// Makes the next driver inserts fail, for exercising partial-write paths.
    #[cfg(test)]
    pub fn fail_driver_inserts(&self, fail: bool) {
        self.fail_driver_inserts.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn driver_insert_fault(&self) -> anyhow::Result<()> {
        if self.fail_driver_inserts.load(Ordering::SeqCst) {
            anyhow::bail!("driver insert failed");
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn driver_insert_fault(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn is_taken(users: &Table<User>, new: &NewUser) -> bool {
    users
        .rows
        .values()
        .any(|u| u.email == new.email || u.phone == new.phone)
}

fn add_user(users: &mut Table<User>, new: NewUser) -> Option<User> {
    if is_taken(users, &new) {
        return None;
    }
    let id = users.next_id();
    let user = User {
        id,
        email: new.email,
        password_hash: new.password_hash,
        name: new.name,
        phone: new.phone,
        role: new.role,
    };
    users.rows.insert(id, user.clone());
    Some(user)
}

fn add_driver(drivers: &mut Table<Driver>, new: NewDriver) -> Driver {
    let id = drivers.next_id();
    let driver = Driver {
        id,
        name: new.name,
        phone: new.phone,
        available: false,
    };
    drivers.rows.insert(id, driver.clone());
    driver
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.rows.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.rows.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.rows.values().find(|u| u.phone == phone).cloned())
    }

    async fn insert(&self, new: NewUser) -> anyhow::Result<Option<User>> {
        let mut users = self.users.write().await;
        Ok(add_user(&mut users, new))
    }

    async fn insert_with_driver(
        &self,
        user: NewUser,
        driver: NewDriver,
    ) -> anyhow::Result<Option<(User, Driver)>> {
        let mut users = self.users.write().await;
        if is_taken(&users, &user) {
            return Ok(None);
        }
        let mut drivers = self.drivers.write().await;
        self.driver_insert_fault()?;
        let driver = add_driver(&mut drivers.table, driver);
        Ok(add_user(&mut users, user).map(|u| (u, driver)))
    }

}

#[async_trait]
impl DriverStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Driver>> {
        Ok(self.drivers.read().await.table.rows.get(&id).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<Driver>> {
        let drivers = self.drivers.read().await;
        Ok(drivers.table.rows.values().find(|d| d.phone == phone).cloned())
    }

    async fn insert(&self, new: NewDriver) -> anyhow::Result<Driver> {
        let mut drivers = self.drivers.write().await;
        self.driver_insert_fault()?;
        Ok(add_driver(&mut drivers.table, new))
    }

    async fn set_available(&self, id: i64, available: bool) -> anyhow::Result<Option<Driver>> {
        let mut drivers = self.drivers.write().await;
        let Drivers { table, resume } = &mut *drivers;
        resume.remove(&id);
        Ok(table.rows.get_mut(&id).map(|d| {
            d.available = available;
            d.clone()
        }))
    }

    async fn occupy(&self, id: i64) -> anyhow::Result<Option<Driver>> {
        let mut drivers = self.drivers.write().await;
        let Drivers { table, resume } = &mut *drivers;
        Ok(table.rows.get_mut(&id).map(|d| {
            if d.available {
                resume.insert(id);
            }
            d.available = false;
            d.clone()
        }))
    }

    async fn release(&self, id: i64) -> anyhow::Result<Option<Driver>> {
        // rides before drivers, the only order both locks are taken in
        let rides = self.rides.read().await;
        let busy = rides.rows.values().any(|r| {
            r.driver_id == Some(id)
                && matches!(r.status, RideStatus::Accepted | RideStatus::Started)
        });
        let mut drivers = self.drivers.write().await;
        let Drivers { table, resume } = &mut *drivers;
        let Some(driver) = table.rows.get_mut(&id) else {
            return Ok(None);
        };
        if !busy && resume.remove(&id) {
            driver.available = true;
        }
        Ok(Some(driver.clone()))
    }

    async fn list_available(&self) -> anyhow::Result<Vec<Driver>> {
        let drivers = self.drivers.read().await;
        Ok(drivers
            .table
            .rows
            .values()
            .filter(|d| d.available)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn insert(&self, new: NewRide) -> anyhow::Result<Ride> {
        let mut rides = self.rides.write().await;
        let id = rides.next_id();
        let ride = Ride {
            id,
            rider_id: new.rider_id,
            driver_id: None,
            status: new.status,
            pickup_location: new.pickup_location,
            dropoff_location: new.dropoff_location,
            estimated_fare: new.estimated_fare,
            distance: new.distance,
            duration: new.duration,
            booked_at: Some(new.booked_at),
            started_at: None,
            completed_at: None,
            rating: None,
            comment: None,
        };
        rides.rows.insert(id, ride.clone());
        Ok(ride)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Ride>> {
        Ok(self.rides.read().await.rows.get(&id).cloned())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Ride>> {
        Ok(self.rides.read().await.rows.values().cloned().collect())
    }

    async fn find_by_rider(&self, rider_id: i64) -> anyhow::Result<Vec<Ride>> {
        let rides = self.rides.read().await;
        Ok(rides
            .rows
            .values()
            .filter(|r| r.rider_id == rider_id)
            .cloned()
            .collect())
    }

    async fn find_by_driver(&self, driver_id: i64) -> anyhow::Result<Vec<Ride>> {
        let rides = self.rides.read().await;
        Ok(rides
            .rows
            .values()
            .filter(|r| r.driver_id == Some(driver_id))
            .cloned()
            .collect())
    }

    async fn find_by_status(&self, status: RideStatus) -> anyhow::Result<Vec<Ride>> {
        let rides = self.rides.read().await;
        Ok(rides
            .rows
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Ride>> {
        let needle = query.to_lowercase();
        let rides = self.rides.read().await;
        Ok(rides
            .rows
            .values()
            .filter(|r| {
                r.pickup_location.to_lowercase().contains(&needle)
                    || r.dropoff_location.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        Ok(self.rides.write().await.rows.remove(&id).is_some())
    }

    async fn transition(&self, id: i64, change: RideChange) -> anyhow::Result<Transition> {
        let mut rides = self.rides.write().await;
        let Some(ride) = rides.rows.get_mut(&id) else {
            return Ok(Transition::Missing);
        };
        if !change.allowed_from().contains(&ride.status) {
            return Ok(Transition::Rejected(ride.status));
        }
        change.apply(ride);
        Ok(Transition::Applied(ride.clone()))
    }

    async fn set_rating(
        &self,
        id: i64,
        rating: i32,
        comment: Option<String>,
    ) -> anyhow::Result<Option<Ride>> {
        let mut rides = self.rides.write().await;
        Ok(rides.rows.get_mut(&id).map(|r| {
            r.rating = Some(rating);
            r.comment = comment;
            r.clone()
        }))
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn upsert(&self, token: OtpToken) -> anyhow::Result<()> {
        self.otps
            .write()
            .await
            .insert(token.user_email.clone(), token);
        Ok(())
    }

    async fn find(&self, user_email: &str) -> anyhow::Result<Option<OtpToken>> {
        Ok(self.otps.read().await.get(user_email).cloned())
    }

    async fn consume(
        &self,
        user_email: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<OtpCheck> {
        let mut otps = self.otps.write().await;
        let Some(token) = otps.get(user_email) else {
            return Ok(OtpCheck::Missing);
        };
        if token.code != code || now >= token.expires_at {
            return Ok(OtpCheck::Rejected);
        }
        otps.remove(user_email);
        Ok(OtpCheck::Accepted)
    }
}

#[async_trait]
impl ResetTokenStore for MemoryStore {
    async fn upsert(&self, token: PasswordResetToken) -> anyhow::Result<()> {
        self.reset_tokens.write().await.insert(token.user_id, token);
        Ok(())
    }

    async fn redeem(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> anyhow::Result<Redemption> {
        let mut tokens = self.reset_tokens.write().await;
        let Some(found) = tokens.values().find(|t| t.token == token).cloned() else {
            return Ok(Redemption::Missing);
        };
        let user_id = found.user_id;
        if now >= found.expires_at {
            tokens.remove(&user_id);
            return Ok(Redemption::Expired { user_id });
        }
        let mut users = self.users.write().await;
        let user = users
            .rows
            .get_mut(&user_id)
            .ok_or_else(|| anyhow::anyhow!("user {user_id} not found"))?;
        user.password_hash = password_hash.to_string();
        tokens.remove(&user_id);
        Ok(Redemption::Applied { user_id })
    }
}

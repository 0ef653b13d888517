use tracing::{info, instrument, warn};

use crate::{
    drivers::repo_types::Driver,
    error::{AppError, AppResult},
    store::Store,
};

/// Which drivers are open for assignment.
#[derive(Clone)]
pub struct DriverAvailabilityRegistry {
    store: Store,
}

impl DriverAvailabilityRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn set_availability(&self, driver_id: i64, available: bool) -> AppResult<Driver> {
        let driver = self
            .store
            .drivers
            .set_available(driver_id, available)
            .await?
            .ok_or(AppError::NotFound("driver"))?;
        info!(driver_id, available, "driver availability changed");
        Ok(driver)
    }

    pub async fn get_driver(&self, driver_id: i64) -> AppResult<Driver> {
        self.store
            .drivers
            .find_by_id(driver_id)
            .await?
            .ok_or(AppError::NotFound("driver"))
    }

    pub async fn is_available(&self, driver_id: i64) -> AppResult<bool> {
        Ok(self.get_driver(driver_id).await?.available)
    }

    pub async fn available_drivers(&self) -> AppResult<Vec<Driver>> {
        Ok(self.store.drivers.list_available().await?)
    }

    /// Takes the driver offline for an accepted ride. Side effects of a ride transition are
    /// logged, not fatal: the transition has already been committed.
    pub(crate) async fn occupy(&self, driver_id: i64) {
        let res = self.store.drivers.occupy(driver_id).await;
        log_side_effect(driver_id, res);
    }

    /// Puts the driver back online after a ride ends, if they were online when they took
    /// it and have no other ride in progress. Otherwise availability is left alone.
    pub(crate) async fn release(&self, driver_id: i64) {
        let res = self.store.drivers.release(driver_id).await;
        log_side_effect(driver_id, res);
    }
}

fn log_side_effect(driver_id: i64, res: anyhow::Result<Option<Driver>>) {
    match res {
        Ok(Some(_)) => {}
        Ok(None) => warn!(driver_id, "ride references unknown driver"),
        Err(e) => warn!(error = %e, driver_id, "failed to update driver availability"),
    }
}

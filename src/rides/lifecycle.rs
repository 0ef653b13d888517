use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    clock::Clock,
    drivers::{availability::DriverAvailabilityRegistry, repo_types::Driver},
    error::{AppError, AppResult},
    rides::repo_types::{NewRide, Ride, RideChange, RideStatus, Transition},
    store::Store,
};

/// A booking as submitted. Required fields are checked by `book`.
#[derive(Debug, Clone, Default)]
pub struct BookRide {
    pub rider_id: Option<i64>,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub estimated_fare: Option<f64>,
    pub distance: Option<f64>,
    pub duration: Option<i32>,
    pub status: Option<RideStatus>,
    pub booked_at: Option<OffsetDateTime>,
}

fn required<T>(value: Option<T>, what: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::Validation(format!("{what} is required")))
}

fn non_negative(value: f64, what: &str) -> AppResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(AppError::Validation(format!("{what} must be a non-negative number")))
    }
}

/// Owns every write to a ride's status.
#[derive(Clone)]
pub struct RideLifecycleManager {
    store: Store,
    drivers: DriverAvailabilityRegistry,
    clock: Arc<dyn Clock>,
}

impl RideLifecycleManager {
    pub fn new(store: Store, drivers: DriverAvailabilityRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            drivers,
            clock,
        }
    }

    async fn apply(&self, ride_id: i64, change: RideChange) -> AppResult<Ride> {
        match self.store.rides.transition(ride_id, change).await? {
            Transition::Applied(ride) => Ok(ride),
            Transition::Missing => Err(AppError::NotFound("ride")),
            Transition::Rejected(current) => {
                warn!(ride_id, %current, target = %change.target(), "illegal ride transition");
                Err(AppError::Conflict(format!(
                    "ride {ride_id} is {current}; cannot move to {}",
                    change.target()
                )))
            }
        }
    }

    #[instrument(skip(self, req), fields(rider_id = ?req.rider_id))]
    pub async fn book(&self, req: BookRide) -> AppResult<Ride> {
        let rider_id = required(req.rider_id, "Rider ID")?;
        let estimated_fare = non_negative(required(req.estimated_fare, "Estimated fare")?, "Estimated fare")?;
        let distance = non_negative(required(req.distance, "Distance")?, "Distance")?;
        let duration = required(req.duration, "Duration")?;
        if duration < 0 {
            return Err(AppError::Validation("Duration must not be negative".into()));
        }
        let status = req.status.unwrap_or(RideStatus::Pending);
        if status != RideStatus::Pending {
            return Err(AppError::Validation("a new ride must be PENDING".into()));
        }

        let ride = self
            .store
            .rides
            .insert(NewRide {
                rider_id,
                status,
                pickup_location: req.pickup_location.unwrap_or_default(),
                dropoff_location: req.dropoff_location.unwrap_or_default(),
                estimated_fare,
                distance,
                duration,
                booked_at: req.booked_at.unwrap_or_else(|| self.clock.now()),
            })
            .await?;
        info!(ride_id = ride.id, rider_id, "ride booked");
        Ok(ride)
    }

    /// PENDING -> ACCEPTED as one compare-and-swap; concurrent losers get `Conflict`.
    #[instrument(skip(self))]
    pub async fn accept(&self, ride_id: i64, driver_id: i64) -> AppResult<Ride> {
        let driver: Driver = self.drivers.get_driver(driver_id).await?;
        let ride = self
            .apply(ride_id, RideChange::Accept { driver_id: driver.id })
            .await?;
        self.drivers.occupy(driver.id).await;
        info!(ride_id, driver_id, "ride accepted");
        Ok(ride)
    }

    #[instrument(skip(self))]
    pub async fn start(&self, ride_id: i64) -> AppResult<Ride> {
        let ride = self
            .apply(ride_id, RideChange::Start { at: self.clock.now() })
            .await?;
        info!(ride_id, "ride started");
        Ok(ride)
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, ride_id: i64) -> AppResult<Ride> {
        let ride = self
            .apply(ride_id, RideChange::Complete { at: self.clock.now() })
            .await?;
        if let Some(driver_id) = ride.driver_id {
            self.drivers.release(driver_id).await;
        }
        info!(ride_id, "ride completed");
        Ok(ride)
    }

    /// Idempotent: cancelling a cancelled ride returns it unchanged.
    #[instrument(skip(self))]
    pub async fn cancel(&self, ride_id: i64) -> AppResult<Ride> {
        match self.apply(ride_id, RideChange::Cancel).await {
            Ok(ride) => {
                if let Some(driver_id) = ride.driver_id {
                    self.drivers.release(driver_id).await;
                }
                info!(ride_id, "ride cancelled");
                Ok(ride)
            }
            Err(AppError::Conflict(msg)) => match self.store.rides.find_by_id(ride_id).await? {
                Some(ride) if ride.status == RideStatus::Cancelled => Ok(ride),
                Some(_) => Err(AppError::Conflict(msg)),
                None => Err(AppError::NotFound("ride")),
            },
            Err(e) => Err(e),
        }
    }

    /// Ratings are accepted in any status but must be within 1..=5.
    #[instrument(skip(self, comment))]
    pub async fn rate(&self, ride_id: i64, rating: i32, comment: Option<String>) -> AppResult<Ride> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation("rating must be between 1 and 5".into()));
        }
        let comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        let ride = self
            .store
            .rides
            .set_rating(ride_id, rating, comment)
            .await?
            .ok_or(AppError::NotFound("ride"))?;
        info!(ride_id, rating, "ride rated");
        Ok(ride)
    }

    pub async fn set_driver_availability(&self, driver_id: i64, available: bool) -> AppResult<Driver> {
        self.drivers.set_availability(driver_id, available).await
    }
}

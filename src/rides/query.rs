use std::{cmp::Ordering, collections::HashMap, str::FromStr};

use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    auth::repo_types::User,
    drivers::repo_types::Driver,
    error::{AppError, AppResult},
    rides::repo_types::{Ride, RideStatus},
    store::Store,
};

/// Side of the ride a history or active-ride lookup is made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Rider,
    Driver,
}

impl FromStr for Perspective {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rider" => Ok(Self::Rider),
            "driver" => Ok(Self::Driver),
            _ => Err(AppError::InvalidRole(s.to_string())),
        }
    }
}

impl Perspective {
    fn active_statuses(&self) -> &'static [RideStatus] {
        match self {
            Perspective::Rider => &[RideStatus::Pending, RideStatus::Accepted, RideStatus::Started],
            Perspective::Driver => &[RideStatus::Accepted, RideStatus::Started],
        }
    }
}

/// A ride with its driver and rider resolved for display.
#[derive(Debug, Clone, Serialize)]
pub struct RideView {
    #[serde(flatten)]
    pub ride: Ride,
    pub driver: Option<Driver>,
    pub rider: Option<User>,
}

/// Zero-based page of `size` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Earnings {
    pub driver_id: i64,
    pub completed_rides: usize,
    pub total_fare: f64,
    pub average_rating: Option<f64>,
}

/// Newest booking first; rides without a booking time go last.
fn newest_first(a: &Ride, b: &Ride) -> Ordering {
    match (a.booked_at, b.booked_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn paginate(rides: Vec<Ride>, page: Option<Page>) -> Vec<Ride> {
    match page {
        Some(Page { page, size }) => rides
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect(),
        None => rides,
    }
}

fn earnings_of(driver_id: i64, rides: &[Ride]) -> Earnings {
    let completed: Vec<&Ride> = rides
        .iter()
        .filter(|r| r.status == RideStatus::Completed)
        .collect();
    let ratings: Vec<i32> = completed.iter().filter_map(|r| r.rating).collect();
    let average_rating = (!ratings.is_empty())
        .then(|| ratings.iter().map(|&r| f64::from(r)).sum::<f64>() / ratings.len() as f64);
    Earnings {
        driver_id,
        completed_rides: completed.len(),
        total_fare: completed.iter().map(|r| r.estimated_fare).sum(),
        average_rating,
    }
}

/// Read side over rides. Never mutates.
#[derive(Clone)]
pub struct RideQueryService {
    store: Store,
}

impl RideQueryService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolves drivers and riders, looking each id up at most once per call.
    async fn enrich(&self, rides: Vec<Ride>) -> AppResult<Vec<RideView>> {
        let mut drivers: HashMap<i64, Option<Driver>> = HashMap::new();
        let mut riders: HashMap<i64, Option<User>> = HashMap::new();
        let mut views = Vec::with_capacity(rides.len());

        for ride in rides {
            let driver = match ride.driver_id {
                Some(id) => match drivers.get(&id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let found = self.store.drivers.find_by_id(id).await?;
                        drivers.insert(id, found.clone());
                        found
                    }
                },
                None => None,
            };
            let rider = match riders.get(&ride.rider_id) {
                Some(cached) => cached.clone(),
                None => {
                    let found = self.store.users.find_by_id(ride.rider_id).await?;
                    riders.insert(ride.rider_id, found.clone());
                    found
                }
            };
            views.push(RideView {
                ride,
                driver,
                rider,
            });
        }
        Ok(views)
    }

    async fn rides_of(&self, perspective: Perspective, user_id: i64) -> AppResult<Vec<Ride>> {
        let mut rides = match perspective {
            Perspective::Rider => self.store.rides.find_by_rider(user_id).await?,
            Perspective::Driver => self.store.rides.find_by_driver(user_id).await?,
        };
        rides.sort_by(newest_first);
        Ok(rides)
    }

    #[instrument(skip(self))]
    pub async fn history(
        &self,
        role: &str,
        user_id: i64,
        page: Option<Page>,
    ) -> AppResult<Vec<RideView>> {
        let perspective: Perspective = role.parse()?;
        let rides = paginate(self.rides_of(perspective, user_id).await?, page);
        self.enrich(rides).await
    }

    #[instrument(skip(self))]
    pub async fn active_ride(&self, role: &str, user_id: i64) -> AppResult<Option<RideView>> {
        let perspective: Perspective = role.parse()?;
        let active = perspective.active_statuses();
        let ride = self
            .rides_of(perspective, user_id)
            .await?
            .into_iter()
            .find(|r| active.contains(&r.status));
        match ride {
            Some(ride) => Ok(self.enrich(vec![ride]).await?.pop()),
            None => Ok(None),
        }
    }

    pub async fn available_rides(&self) -> AppResult<Vec<RideView>> {
        let mut rides = self.store.rides.find_by_status(RideStatus::Pending).await?;
        rides.sort_by(newest_first);
        self.enrich(rides).await
    }

    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> AppResult<Vec<RideView>> {
        let rides = self.store.rides.search(query.trim()).await?;
        self.enrich(rides).await
    }

    pub async fn all_rides(&self) -> AppResult<Vec<RideView>> {
        let rides = self.store.rides.list_all().await?;
        self.enrich(rides).await
    }

    pub async fn ride_by_id(&self, ride_id: i64) -> AppResult<RideView> {
        let ride = self
            .store
            .rides
            .find_by_id(ride_id)
            .await?
            .ok_or(AppError::NotFound("ride"))?;
        self.enrich(vec![ride])
            .await?
            .pop()
            .ok_or(AppError::NotFound("ride"))
    }

    #[instrument(skip(self))]
    pub async fn delete_ride(&self, ride_id: i64) -> AppResult<()> {
        if !self.store.rides.delete(ride_id).await? {
            return Err(AppError::NotFound("ride"));
        }
        info!(ride_id, "ride deleted");
        Ok(())
    }

    pub async fn driver_earnings(&self, driver_id: i64) -> AppResult<Earnings> {
        if self.store.drivers.find_by_id(driver_id).await?.is_none() {
            return Err(AppError::NotFound("driver"));
        }
        let rides = self.store.rides.find_by_driver(driver_id).await?;
        Ok(earnings_of(driver_id, &rides))
    }
}

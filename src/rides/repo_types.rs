use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Ride status. Legal moves:
/// PENDING -> ACCEPTED -> STARTED -> COMPLETED, and any of the first three -> CANCELLED.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RideStatus {
    Pending,
    Accepted,
    Started,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "PENDING",
            RideStatus::Accepted => "ACCEPTED",
            RideStatus::Started => "STARTED",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RideStatus::Pending),
            "ACCEPTED" => Ok(RideStatus::Accepted),
            "STARTED" => Ok(RideStatus::Started),
            "COMPLETED" => Ok(RideStatus::Completed),
            "CANCELLED" => Ok(RideStatus::Cancelled),
            other => anyhow::bail!("unknown ride status {other:?}"),
        }
    }
}

/// Persisted ride. Related driver/rider records are resolved at read time (see `RideView`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: i64,
    pub rider_id: i64,
    pub driver_id: Option<i64>,
    pub status: RideStatus,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub estimated_fare: f64,
    pub distance: f64, // km
    pub duration: i32, // minutes
    #[serde(with = "time::serde::rfc3339::option")]
    pub booked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

#[derive(Debug, FromRow)]
pub struct RideRow {
    pub id: i64,
    pub rider_id: i64,
    pub driver_id: Option<i64>,
    pub status: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub estimated_fare: f64,
    pub distance: f64,
    pub duration: i32,
    pub booked_at: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

impl TryFrom<RideRow> for Ride {
    type Error = anyhow::Error;

    fn try_from(r: RideRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            rider_id: r.rider_id,
            driver_id: r.driver_id,
            status: r.status.parse()?,
            pickup_location: r.pickup_location,
            dropoff_location: r.dropoff_location,
            estimated_fare: r.estimated_fare,
            distance: r.distance,
            duration: r.duration,
            booked_at: r.booked_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            rating: r.rating,
            comment: r.comment,
        })
    }
}

/// A validated booking, ready to be stored.
#[derive(Debug, Clone)]
pub struct NewRide {
    pub rider_id: i64,
    pub status: RideStatus,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub estimated_fare: f64,
    pub distance: f64,
    pub duration: i32,
    pub booked_at: OffsetDateTime,
}

/// Field updates applied together with a status transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RideChange {
    Accept { driver_id: i64 },
    Start { at: OffsetDateTime },
    Complete { at: OffsetDateTime },
    Cancel,
}

impl RideChange {
    pub fn target(&self) -> RideStatus {
        match self {
            RideChange::Accept { .. } => RideStatus::Accepted,
            RideChange::Start { .. } => RideStatus::Started,
            RideChange::Complete { .. } => RideStatus::Completed,
            RideChange::Cancel => RideStatus::Cancelled,
        }
    }

    /// Statuses the ride must currently be in for the change to apply.
    pub fn allowed_from(&self) -> &'static [RideStatus] {
        match self {
            RideChange::Accept { .. } => &[RideStatus::Pending],
            RideChange::Start { .. } => &[RideStatus::Accepted],
            RideChange::Complete { .. } => &[RideStatus::Started],
            RideChange::Cancel => &[
                RideStatus::Pending,
                RideStatus::Accepted,
                RideStatus::Started,
            ],
        }
    }

    pub fn apply(&self, ride: &mut Ride) {
        ride.status = self.target();
        match *self {
            RideChange::Accept { driver_id } => ride.driver_id = Some(driver_id),
            RideChange::Start { at } => ride.started_at = Some(at),
            RideChange::Complete { at } => ride.completed_at = Some(at),
            RideChange::Cancel => {}
        }
    }
}

/// Result of a compare-and-swap status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Ride),
    /// The ride exists but was in the given status, which does not permit the change.
    Rejected(RideStatus),
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_change_starts_from_a_live_status() {
        let changes = [
            RideChange::Accept { driver_id: 1 },
            RideChange::Start { at: OffsetDateTime::UNIX_EPOCH },
            RideChange::Complete { at: OffsetDateTime::UNIX_EPOCH },
            RideChange::Cancel,
        ];
        for change in changes {
            let from = change.allowed_from();
            assert!(!from.contains(&RideStatus::Completed));
            assert!(!from.contains(&RideStatus::Cancelled));
        }
    }

    #[test]
    fn status_text_round_trips() {
        for s in ["PENDING", "ACCEPTED", "STARTED", "COMPLETED", "CANCELLED"] {
            assert_eq!(s.parse::<RideStatus>().unwrap().as_str(), s);
        }
        assert!("pending".parse::<RideStatus>().is_err());
    }
}

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::rides::{fare::RideType, lifecycle::BookRide, query::Page, repo_types::RideStatus};

#[derive(Debug, Deserialize)]
pub struct BookRideRequest {
    pub rider_id: Option<i64>,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub estimated_fare: Option<f64>,
    pub distance: Option<f64>,
    pub duration: Option<i32>,
    pub status: Option<RideStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub booked_at: Option<OffsetDateTime>,
}

impl From<BookRideRequest> for BookRide {
    fn from(r: BookRideRequest) -> Self {
        Self {
            rider_id: r.rider_id,
            pickup_location: r.pickup_location,
            dropoff_location: r.dropoff_location,
            estimated_fare: r.estimated_fare,
            distance: r.distance,
            duration: r.duration,
            status: r.status,
            booked_at: r.booked_at,
        }
    }
}

/// `driver_id` may be omitted when the caller is a driver.
#[derive(Debug, Deserialize)]
pub struct AcceptRideRequest {
    pub driver_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RateRideRequest {
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: Option<usize>,
    pub size: Option<usize>,
}

impl Pagination {
    const DEFAULT_SIZE: usize = 10;

    /// No paging unless at least one of `page`/`size` is given.
    pub fn into_page(self) -> Option<Page> {
        match (self.page, self.size) {
            (None, None) => None,
            (page, size) => Some(Page {
                page: page.unwrap_or(0),
                size: size.unwrap_or(Self::DEFAULT_SIZE).max(1),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub distance: f64,
    pub duration: f64,
    #[serde(default)]
    pub ride_type: RideType,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub estimated_fare: f64,
    pub ride_type: RideType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let none = Pagination { page: None, size: None };
        assert_eq!(none.into_page(), None);
        let first = Pagination { page: None, size: Some(0) };
        assert_eq!(first.into_page(), Some(Page { page: 0, size: 1 }));
        let third = Pagination { page: Some(2), size: None };
        assert_eq!(third.into_page(), Some(Page { page: 2, size: 10 }));
    }

    #[test]
    fn booking_body_fields_are_optional() {
        let req: BookRideRequest = serde_json::from_str(r#"{"rider_id": 3}"#).unwrap();
        assert_eq!(req.rider_id, Some(3));
        assert!(req.booked_at.is_none());

        let req: BookRideRequest = serde_json::from_str(
            r#"{"rider_id": 3, "status": "PENDING", "booked_at": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(req.status, Some(RideStatus::Pending));
        assert!(req.booked_at.is_some());
    }
}

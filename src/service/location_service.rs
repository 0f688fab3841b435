//! Live location sharing between ride participants.

use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DispatchContext, UserId};

/// A WGS-84 coordinate as sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees, `-90..=90`.
    pub latitude: f64,
    /// Longitude in degrees, `-180..=180`.
    pub longitude: f64,
}

/// Location update delivered to the target participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Identity that shared the location.
    pub shared_by: UserId,
    /// Server time the update was accepted.
    pub timestamp: DateTime<Utc>,
}

/// Stateless service behind the `share_location` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationService;

impl LocationService {
    /// Creates a new `LocationService`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates `location` and stamps it with the sender and time.
    ///
    /// # Errors
    ///
    /// Fails if either coordinate is not finite or out of range.
    pub fn share_location(
        &self,
        ctx: &DispatchContext,
        location: Location,
    ) -> anyhow::Result<LocationUpdate> {
        let Location {
            latitude,
            longitude,
        } = location;
        ensure!(
            latitude.is_finite() && (-90.0..=90.0).contains(&latitude),
            "latitude {latitude} out of range"
        );
        ensure!(
            longitude.is_finite() && (-180.0..=180.0).contains(&longitude),
            "longitude {longitude} out of range"
        );

        tracing::debug!(identity = %ctx.identity(), latitude, longitude, "location shared");
        Ok(LocationUpdate {
            latitude,
            longitude,
            shared_by: ctx.identity().clone(),
            timestamp: Utc::now(),
        })
    }
}

//! Device location.
//!
//! Platform location services answer through a one-shot callback. This module
//! bridges that callback into an `async fn`: the request resolves exactly once,
//! and dropping the pending future cancels the platform request.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::lostfound::{
    LostFound,
    error::{LostFoundError, Result},
};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Location request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

pub type LocationCallback = Box<dyn FnOnce(std::result::Result<Coordinates, LocationError>) + Send>;

/// Callback-style location source, as exposed by the platform.
pub trait LocationProvider: Send + Sync {
    /// Starts a request. `callback` is invoked at most once.
    fn request_location(&self, callback: LocationCallback) -> RequestId;

    /// Abandons a pending request. Unknown or finished ids are ignored.
    fn cancel(&self, request: RequestId);
}

/// Cancels the request unless disarmed.
struct CancelOnDrop<'a> {
    provider: &'a dyn LocationProvider,
    request: Option<RequestId>,
}

impl CancelOnDrop<'_> {
    fn disarm(&mut self) {
        self.request = None;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            tracing::debug!(
                target: "lostfound::location",
                "Cancelling location request {:?}",
                request
            );
            self.provider.cancel(request);
        }
    }
}

/// Awaits one location fix from `provider`.
pub async fn current_location(
    provider: &dyn LocationProvider,
) -> std::result::Result<Coordinates, LocationError> {
    let (tx, rx) = oneshot::channel();
    let request = provider.request_location(Box::new(move |result| {
        // Receiver is gone if the caller stopped waiting
        let _ = tx.send(result);
    }));

    let mut guard = CancelOnDrop {
        provider,
        request: Some(request),
    };
    let result = rx.await;
    guard.disarm();

    // A provider that drops the callback without calling it counts as cancelled
    result.unwrap_or(Err(LocationError::Cancelled))
}

impl LostFound {
    pub async fn current_location(&self) -> Result<Coordinates> {
        let provider = self
            .location
            .as_ref()
            .ok_or(LostFoundError::LocationProviderMissing)?;
        Ok(current_location(provider.as_ref()).await?)
    }
}

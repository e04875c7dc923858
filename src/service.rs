//! The recognition services and the feature flags each of them understands.
//!
//! A [`Service`] binds a request type, a result type and a set of
//! [`FeatureFlag`] headers. [`Client`](crate::Client) and
//! [`ClientBuilder`](crate::ClientBuilder) are generic over it, so the three
//! service clients share one implementation.

use crate::multipart::RecognitionRequest;
use crate::request::{AnprRequest, TransportRequest, VehicleRequest};
use crate::response::Correlated;
use crate::result::{AnprResult, TransportResult, VehicleResult};
use serde::de::DeserializeOwned;
use std::fmt;

/// A boolean request header toggling optional server-side behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureFlag {
    DisableImageResizing,
    EnableWideRangeAnalysis,
    DisableCallStatistics,
    DisableChecksumCheck,
    EnableFullUsAccrCode,
    DisableIsoCode,
}

impl FeatureFlag {
    /// The request header carrying this flag.
    pub const fn header_name(self) -> &'static str {
        match self {
            FeatureFlag::DisableImageResizing => "X-Disable-Image-Resizing",
            FeatureFlag::EnableWideRangeAnalysis => "X-Enable-Wide-Range-Analysis",
            FeatureFlag::DisableCallStatistics => "X-Disable-Call-Statistics",
            FeatureFlag::DisableChecksumCheck => "X-Disable-Checksum-Check",
            FeatureFlag::EnableFullUsAccrCode => "X-Enable-Full-Us-Accr-Code",
            FeatureFlag::DisableIsoCode => "X-Disable-Iso-Code",
        }
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_name())
    }
}

/// A recognition service reachable through a [`Client`](crate::Client).
pub trait Service: Send + Sync + 'static {
    /// The typed request the service accepts.
    type Request: RecognitionRequest + Sync;

    /// The typed result the service returns.
    type Result: DeserializeOwned + Correlated + Send;

    /// Short name used in logs.
    const NAME: &'static str;

    /// Flag headers sent with every request, in this order.
    const FEATURE_FLAGS: &'static [FeatureFlag];
}

/// Vehicle recognition: plates, make and model, ADR plates.
#[derive(Debug, Clone, Copy)]
pub struct VehicleApi;

impl Service for VehicleApi {
    type Request = VehicleRequest;
    type Result = VehicleResult;

    const NAME: &'static str = "vehicle";
    const FEATURE_FLAGS: &'static [FeatureFlag] = &[
        FeatureFlag::DisableCallStatistics,
        FeatureFlag::DisableImageResizing,
        FeatureFlag::EnableWideRangeAnalysis,
    ];
}

/// The plate-only ANPR API. It takes no flag headers.
#[derive(Debug, Clone, Copy)]
pub struct AnprApi;

impl Service for AnprApi {
    type Request = AnprRequest;
    type Result = AnprResult;

    const NAME: &'static str = "anpr";
    const FEATURE_FLAGS: &'static [FeatureFlag] = &[];
}

/// Transport and cargo code recognition.
#[derive(Debug, Clone, Copy)]
pub struct TransportApi;

impl Service for TransportApi {
    type Request = TransportRequest;
    type Result = TransportResult;

    const NAME: &'static str = "transport";
    const FEATURE_FLAGS: &'static [FeatureFlag] = &[
        FeatureFlag::DisableImageResizing,
        FeatureFlag::EnableWideRangeAnalysis,
        FeatureFlag::DisableChecksumCheck,
        FeatureFlag::EnableFullUsAccrCode,
        FeatureFlag::DisableIsoCode,
    ];
}

//! Typed results returned by the recognition services.
//!
//! Result bodies are decoded leniently: the fields every response shares are
//! typed, everything else is kept as JSON so new server fields never break
//! decoding.

use crate::response::Correlated;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! recognition_result {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            /// Server correlation id, copied from the `x-amzn-requestid` header.
            #[serde(skip)]
            pub request_id: Option<String>,

            /// API version reported by the server.
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub version: Option<String>,

            /// Recognition payload.
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub data: Option<Value>,

            /// Any other top-level fields.
            #[serde(flatten)]
            pub extra: Map<String, Value>,
        }

        impl $name {
            /// Looks up a top-level field of the body.
            pub fn field(&self, name: &str) -> Option<&Value> {
                match name {
                    "data" => self.data.as_ref(),
                    _ => self.extra.get(name),
                }
            }
        }

        impl Correlated for $name {
            fn set_request_id(&mut self, request_id: Option<String>) {
                self.request_id = request_id;
            }

            fn request_id(&self) -> Option<&str> {
                self.request_id.as_deref()
            }
        }
    };
}

recognition_result!(
    /// Result of a vehicle recognition call.
    VehicleResult
);

recognition_result!(
    /// Result of an ANPR call.
    AnprResult
);

recognition_result!(
    /// Result of a transport code recognition call.
    TransportResult
);

/// A location the vehicle API can be pointed at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The locations returned by `GET {endpoint}/countries`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locations {
    pub locations: Vec<Location>,
}

impl Locations {
    /// Finds a location by code, ignoring ASCII case.
    pub fn find(&self, code: &str) -> Option<&Location> {
        self.locations.iter().find(|location| {
            location
                .code
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(code))
        })
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

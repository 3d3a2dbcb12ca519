#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocode resolution for parking violations.
//!
//! Locations are resolved from layered, imperfect sources in a fixed
//! order (see [`resolver`]):
//!
//! 1. **Supplied GPS** — coordinates recorded by the ticketing device.
//! 2. **Street-segment centroid** — the location is parsed into a
//!    street-centerline segment id, which is looked up in a
//!    [`CentroidTable`].
//!
//! Anything else is left without coordinates and counted in
//! [`GeocodeStats`]. Resolution never fails the run.

pub mod address;
pub mod centroids;
pub mod parser;
pub mod resolver;
pub mod stats;

pub use centroids::{Centroid, CentroidError, CentroidTable};
pub use parser::{AddressParser, LookupError, ParsedAddress, StreetLookupParser};
pub use resolver::{GeocodeResolver, Resolution};
pub use stats::GeocodeStats;

//! Ports to the device's collaborators
//!
//! The delivery layer never talks to hardware or the network directly. Each
//! collaborator sits behind one of these traits so the same logic runs on
//! the device, on a Linux gateway, and in tests.
//!
//! | Port          | Provided by                         |
//! |---------------|-------------------------------------|
//! | [`Transport`] | HTTP client (`fieldlink-connectors`) |
//! | [`LinkDriver`]| Radio / OS network manager          |
//! | [`KeyStore`]  | NVS partition, or a blob directory  |
//! | [`Sensors`]   | Ambient sensors and camera pair     |

pub mod keystore;
pub mod link;
pub mod sensors;
pub mod transport;

pub use keystore::KeyStore;
pub use link::LinkDriver;
pub use sensors::Sensors;
pub use transport::{Body, Part, Request, Response, Transport};

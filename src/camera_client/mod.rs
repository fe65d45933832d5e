pub mod api;
mod client;
mod core;
pub mod discovery;
pub mod helpers;
pub mod models;

pub use client::{ApiConnector, CameraServiceClient, HttpConnector};
pub use discovery::{DeviceFinder, SsdpDeviceFinder, StaticDeviceFinder};

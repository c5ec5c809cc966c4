pub mod api;
pub mod bus;
pub mod config;
pub mod controllers;
pub mod drivers;
pub mod managers;
pub mod model;
pub mod receiver;
pub mod sinks;
pub mod snow;
pub mod solar;
pub mod store;
pub mod units;

pub mod proto {
    tonic::include_proto!("weather.v1");
}

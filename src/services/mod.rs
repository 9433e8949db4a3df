pub mod analyze;
pub mod blob;
pub mod cache;
pub mod gpx;
pub mod open_meteo;
pub mod provider;
pub mod timing;
pub mod wind;

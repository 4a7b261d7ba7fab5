pub mod analysis;
pub mod config;
pub mod dataset;
pub mod logging;
pub mod model;
pub mod modelling;
pub mod sitedata;

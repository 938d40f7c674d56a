pub mod archive;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod geoserver;
pub mod identity;
pub mod manager;
pub mod output;
pub mod retention;
pub mod sync;
pub mod upload;

pub mod app;
pub mod benchmark;
pub mod compare;
pub mod config;
pub mod domain;
pub mod error;
pub mod hapi;
pub mod magmodel;
pub mod ows;
pub mod registry;
pub mod report;
pub mod shc;
pub mod sources;
pub mod sphharm;
pub mod table;
pub mod time_util;

pub mod annotation;
pub mod app;
pub mod config;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod geometry;
pub mod identity;
pub mod link;
pub mod materialize;
pub mod memory;
pub mod output;
pub mod provenance;
pub mod roi;
pub mod settings;
pub mod store;
pub mod xml;

pub mod archive;
pub mod config;
pub mod db;
pub mod discord;
pub mod error;
pub mod fetcher;
pub mod importer;
pub mod model;
pub mod pause;
pub mod policy;
pub mod purge;
pub mod search;

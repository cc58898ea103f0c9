// Library exports for agora
// The binary and the integration tests both drive the stores through here

pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod loading;
pub mod models;
pub mod posts;
pub mod profile;
pub mod reactions;
pub mod remote;
pub mod session;
pub mod storage;
pub mod views;

pub mod activities;
pub mod api;
pub mod auth;
pub mod claims;
pub mod client;
pub mod config;
pub mod dates;
pub mod days;
pub mod db;
pub mod docstore;
pub mod error;
pub mod events;
pub mod files;
pub mod images;
pub mod invites;
pub mod outfits;
pub mod photos;
pub mod profiles;

pub use client::Client;
pub use error::{Error, Result};

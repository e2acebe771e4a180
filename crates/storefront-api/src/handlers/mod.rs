//! API handlers
//!
//! Author: hephaex@gmail.com

pub mod auth;
pub mod billing;
pub mod health;
pub mod shopify;
pub mod webhooks;

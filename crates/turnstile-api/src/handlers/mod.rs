//! API handlers
//!
//! Author: hephaex@gmail.com

pub mod admin;
pub mod health;
pub mod user;

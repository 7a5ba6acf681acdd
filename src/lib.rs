//! Dataland community manager: data request lifecycle, notification batching
//! and request priority aggregation.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod model;
pub mod notifications;
pub mod priority;
pub mod requests;

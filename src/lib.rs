//! Wayfare backend
//!
//! Books flights, hotels and cars through a supplier, collects payment through a
//! hosted checkout, and reconciles confirmation signals into one booking record.
//! The FX-SmartSave engine recommends the cheapest settlement currency for a
//! purchase quoted in several currencies.

pub mod api;
pub mod bookings;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod supplier;
pub mod workers;

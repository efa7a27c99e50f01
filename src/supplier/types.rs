//! Supplier search parameters

use crate::bookings::types::ProductType;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSearch {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<NaiveDate>,
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelSearch {
    pub city_code: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub adults: u32,
    #[serde(default = "one")]
    pub rooms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarSearch {
    pub pickup_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropoff_location: Option<String>,
    pub pickup_at: DateTime<Utc>,
    pub dropoff_at: DateTime<Utc>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "product_type", rename_all = "snake_case")]
pub enum SearchParams {
    Flight(FlightSearch),
    Hotel(HotelSearch),
    Car(CarSearch),
}

fn is_iata_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

impl SearchParams {
    pub fn product_type(&self) -> ProductType {
        match self {
            SearchParams::Flight(_) => ProductType::Flight,
            SearchParams::Hotel(_) => ProductType::Hotel,
            SearchParams::Car(_) => ProductType::Car,
        }
    }

    /// Reject requests the supplier would refuse anyway.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            SearchParams::Flight(f) => {
                if !is_iata_code(&f.origin) || !is_iata_code(&f.destination) {
                    return Err("origin and destination must be 3-letter IATA codes".to_string());
                }
                if f.origin == f.destination {
                    return Err("origin and destination must differ".to_string());
                }
                if f.adults == 0 || f.adults + f.children > 9 {
                    return Err("between 1 and 9 travellers, at least one adult".to_string());
                }
                if let Some(ret) = f.return_date {
                    if ret < f.departure_date {
                        return Err("return_date is before departure_date".to_string());
                    }
                }
            }
            SearchParams::Hotel(h) => {
                if !is_iata_code(&h.city_code) {
                    return Err("city_code must be a 3-letter IATA city code".to_string());
                }
                if h.check_out <= h.check_in {
                    return Err("check_out must be after check_in".to_string());
                }
                if h.adults == 0 || h.rooms == 0 || h.rooms > h.adults {
                    return Err("need at least one adult per room".to_string());
                }
            }
            SearchParams::Car(c) => {
                if c.pickup_location.trim().is_empty() {
                    return Err("pickup_location is required".to_string());
                }
                if c.dropoff_at <= c.pickup_at {
                    return Err("dropoff_at must be after pickup_at".to_string());
                }
            }
        }
        Ok(())
    }

    /// Same search moved `days` later; used for the day-by-day fallback.
    pub fn shifted(&self, days: i64) -> Self {
        let delta = Duration::days(days);
        match self {
            SearchParams::Flight(f) => SearchParams::Flight(FlightSearch {
                departure_date: f.departure_date + delta,
                return_date: f.return_date.map(|d| d + delta),
                ..f.clone()
            }),
            SearchParams::Hotel(h) => SearchParams::Hotel(HotelSearch {
                check_in: h.check_in + delta,
                check_out: h.check_out + delta,
                ..h.clone()
            }),
            SearchParams::Car(c) => SearchParams::Car(CarSearch {
                pickup_at: c.pickup_at + delta,
                dropoff_at: c.dropoff_at + delta,
                ..c.clone()
            }),
        }
    }
}

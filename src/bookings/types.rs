//! Booking domain types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Flight,
    Hotel,
    Car,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Flight => "flight",
            ProductType::Hotel => "hotel",
            ProductType::Car => "car",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flight" => Ok(ProductType::Flight),
            "hotel" => Ok(ProductType::Hotel),
            "car" => Ok(ProductType::Car),
            other => Err(format!("unknown product type '{}'", other)),
        }
    }
}

/// Lifecycle of a booking. `PendingPayment` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    ConfirmedWithoutPayment,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::ConfirmedWithoutPayment => "confirmed_without_payment",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::PendingPayment)
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed | BookingStatus::ConfirmedWithoutPayment
        )
    }

    /// Edges of the status graph. Self-loops are not transitions.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (
                BookingStatus::PendingPayment,
                BookingStatus::Confirmed
                    | BookingStatus::ConfirmedWithoutPayment
                    | BookingStatus::Cancelled
            )
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(BookingStatus::PendingPayment),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "confirmed_without_payment" => Ok(BookingStatus::ConfirmedWithoutPayment),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    None,
    CheckoutPending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::None => "none",
            PaymentStatus::CheckoutPending => "checkout_pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PaymentStatus::None),
            "checkout_pending" => Ok(PaymentStatus::CheckoutPending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Display-oriented projection of `(status, payment_status)`. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStage {
    AwaitingCheckout,
    AwaitingPayment,
    ProcessingProvider,
    PaymentFailed,
    Confirmed,
    Cancelled,
}

/// Currencies whose minor unit is the major unit.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Number of decimal places between a currency's major and minor units.
pub fn minor_unit_exponent(currency: &str) -> i64 {
    if ZERO_DECIMAL_CURRENCIES.contains(&currency.to_uppercase().as_str()) {
        0
    } else {
        2
    }
}

/// Money in integer minor units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub amount_minor: i64,
    pub currency: String,
}

impl Price {
    pub fn new(amount_minor: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor,
            currency: currency.into().trim().to_uppercase(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }

    /// Amount in major units, e.g. `12345 USD` minor -> `123.45`.
    pub fn major_amount(&self) -> bigdecimal::BigDecimal {
        bigdecimal::BigDecimal::new(self.amount_minor.into(), minor_unit_exponent(&self.currency))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.major_amount())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ContactDetails {
    pub fn validate(&self) -> Result<(), String> {
        if self.full_name.trim().is_empty() {
            return Err("contact.full_name is required".to_string());
        }
        let email = regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .map_err(|e| format!("email pattern failed to compile: {}", e))?;
        if !email.is_match(self.email.trim()) {
            return Err(format!("contact.email '{}' is not a valid address", self.email));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSegment {
    pub carrier: String,
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure_at: DateTime<Utc>,
    pub arrival_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightOffer {
    pub offer_id: String,
    pub origin: String,
    pub destination: String,
    pub segments: Vec<FlightSegment>,
    pub passengers: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabin: Option<String>,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelOffer {
    pub offer_id: String,
    pub hotel_id: String,
    pub hotel_name: String,
    pub city_code: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub room_type: String,
    pub guests: u32,
    /// Guest pays the property directly; the platform charges nothing
    #[serde(default)]
    pub pay_at_property: bool,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarOffer {
    pub offer_id: String,
    pub vendor: String,
    pub vehicle_class: String,
    pub pickup_location: String,
    pub pickup_at: DateTime<Utc>,
    pub dropoff_at: DateTime<Utc>,
    pub price: Price,
}

/// Supplier's priced product as last validated, keyed by product type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "product_type", rename_all = "snake_case")]
pub enum OfferSnapshot {
    Flight(FlightOffer),
    Hotel(HotelOffer),
    Car(CarOffer),
}

impl OfferSnapshot {
    pub fn product_type(&self) -> ProductType {
        match self {
            OfferSnapshot::Flight(_) => ProductType::Flight,
            OfferSnapshot::Hotel(_) => ProductType::Hotel,
            OfferSnapshot::Car(_) => ProductType::Car,
        }
    }

    pub fn offer_id(&self) -> &str {
        match self {
            OfferSnapshot::Flight(o) => &o.offer_id,
            OfferSnapshot::Hotel(o) => &o.offer_id,
            OfferSnapshot::Car(o) => &o.offer_id,
        }
    }

    pub fn price(&self) -> &Price {
        match self {
            OfferSnapshot::Flight(o) => &o.price,
            OfferSnapshot::Hotel(o) => &o.price,
            OfferSnapshot::Car(o) => &o.price,
        }
    }

    /// Line-item description shown on the checkout page.
    pub fn display_name(&self) -> String {
        match self {
            OfferSnapshot::Flight(o) => {
                let carrier = o
                    .segments
                    .first()
                    .map(|s| s.carrier.as_str())
                    .unwrap_or("Flight");
                format!(
                    "{} {} → {} ({} pax)",
                    carrier, o.origin, o.destination, o.passengers
                )
            }
            OfferSnapshot::Hotel(o) => format!(
                "{}, {} ({} to {})",
                o.hotel_name, o.room_type, o.check_in, o.check_out
            ),
            OfferSnapshot::Car(o) => format!(
                "{} {} at {}",
                o.vendor, o.vehicle_class, o.pickup_location
            ),
        }
    }

    /// Same offer carrying a different price.
    pub fn with_price(&self, price: Price) -> Self {
        let mut next = self.clone();
        match &mut next {
            OfferSnapshot::Flight(o) => o.price = price,
            OfferSnapshot::Hotel(o) => o.price = price,
            OfferSnapshot::Car(o) => o.price = price,
        }
        next
    }

    pub fn is_pay_at_property(&self) -> bool {
        matches!(self, OfferSnapshot::Hotel(o) if o.pay_at_property)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Customer,
    Operator,
}

impl CancelActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelActor::Customer => "customer",
            CancelActor::Operator => "operator",
        }
    }
}

impl FromStr for CancelActor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(CancelActor::Customer),
            "operator" => Ok(CancelActor::Operator),
            other => Err(format!("unknown cancel actor '{}'", other)),
        }
    }
}

/// One purchase attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub product_type: ProductType,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub client_request_id: String,
    pub offer: OfferSnapshot,
    /// Settlement amount actually charged, minor units
    pub amount_minor: i64,
    pub currency: String,
    pub contact: ContactDetails,
    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub checkout_expires_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    /// Currency the customer preferred via SmartSave; informational only
    pub preferred_currency: Option<String>,
    pub cancelled_by: Option<CancelActor>,
    pub cancellation_reason: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Fresh `pending_payment` booking.
    pub fn new_pending(
        client_request_id: impl Into<String>,
        offer: OfferSnapshot,
        price: Price,
        contact: ContactDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_type: offer.product_type(),
            status: BookingStatus::PendingPayment,
            payment_status: PaymentStatus::None,
            client_request_id: client_request_id.into(),
            offer,
            amount_minor: price.amount_minor,
            currency: price.currency,
            contact,
            checkout_session_id: None,
            checkout_url: None,
            checkout_expires_at: None,
            payment_reference: None,
            preferred_currency: None,
            cancelled_by: None,
            cancellation_reason: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn price(&self) -> Price {
        Price::new(self.amount_minor, self.currency.clone())
    }

    pub fn stage(&self) -> BookingStage {
        match (self.status, self.payment_status) {
            (BookingStatus::Confirmed | BookingStatus::ConfirmedWithoutPayment, _) => {
                BookingStage::Confirmed
            }
            (BookingStatus::Cancelled, _) => BookingStage::Cancelled,
            (BookingStatus::PendingPayment, PaymentStatus::None) => BookingStage::AwaitingCheckout,
            (BookingStatus::PendingPayment, PaymentStatus::CheckoutPending) => {
                BookingStage::AwaitingPayment
            }
            (BookingStatus::PendingPayment, PaymentStatus::Succeeded) => {
                BookingStage::ProcessingProvider
            }
            (BookingStatus::PendingPayment, PaymentStatus::Failed) => BookingStage::PaymentFailed,
        }
    }

    /// A session is reusable while it exists and has not reached its expiry.
    pub fn has_open_session(&self, now: DateTime<Utc>) -> bool {
        self.checkout_session_id.is_some()
            && self.checkout_url.is_some()
            && self.checkout_expires_at.map(|at| at > now).unwrap_or(false)
    }

    /// Zero-amount bookings and pay-at-property hotels skip checkout.
    pub fn is_payment_free(&self) -> bool {
        self.amount_minor == 0 || self.offer.is_pay_at_property()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn hotel_offer(amount_minor: i64, currency: &str) -> OfferSnapshot {
        OfferSnapshot::Hotel(HotelOffer {
            offer_id: "HOTEL-OFFER-1".to_string(),
            hotel_id: "PARLS01".to_string(),
            hotel_name: "Hotel Lumière".to_string(),
            city_code: "PAR".to_string(),
            check_in: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap_or_default(),
            check_out: NaiveDate::from_ymd_opt(2026, 11, 5).unwrap_or_default(),
            room_type: "Double".to_string(),
            guests: 2,
            pay_at_property: false,
            price: Price::new(amount_minor, currency),
        })
    }

    pub fn flight_offer(amount_minor: i64, currency: &str) -> OfferSnapshot {
        let departure = Utc.with_ymd_and_hms(2026, 12, 1, 9, 30, 0).unwrap();
        OfferSnapshot::Flight(FlightOffer {
            offer_id: "FLIGHT-OFFER-1".to_string(),
            origin: "LHR".to_string(),
            destination: "JFK".to_string(),
            segments: vec![FlightSegment {
                carrier: "BA".to_string(),
                flight_number: "BA117".to_string(),
                origin: "LHR".to_string(),
                destination: "JFK".to_string(),
                departure_at: departure,
                arrival_at: departure + chrono::Duration::hours(8),
            }],
            passengers: 1,
            cabin: Some("ECONOMY".to_string()),
            price: Price::new(amount_minor, currency),
        })
    }

    pub fn contact() -> ContactDetails {
        ContactDetails {
            full_name: "Ada Traveller".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
        }
    }

    pub fn pending_booking(amount_minor: i64) -> Booking {
        Booking::new_pending(
            "req-1",
            hotel_offer(amount_minor, "USD"),
            Price::new(amount_minor, "USD"),
            contact(),
            Utc::now(),
        )
    }
}

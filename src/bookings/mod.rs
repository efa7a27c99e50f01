//! Booking records and their status graph

pub mod state_machine;
pub mod types;

pub use state_machine::{apply, Transition, TransitionError, TransitionOutcome};
pub use types::{
    Booking, BookingStage, BookingStatus, CancelActor, ContactDetails, OfferSnapshot,
    PaymentStatus, Price, ProductType,
};

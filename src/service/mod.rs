pub mod releases;
pub mod reservation;
pub mod retry;

pub use releases::{OwedRelease, ReleaseQueue};
pub use reservation::{CancelError, CancelOutcome, PurchaseError, ReservationService};
pub use retry::RetryPolicy;

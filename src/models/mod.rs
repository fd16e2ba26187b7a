pub mod concert;
pub mod order;

pub use concert::{Concert, ConcertSnapshot, NewConcert};
pub use order::{NewOrder, Order, OrderStatus};

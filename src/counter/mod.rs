//! The central counter service: a family of tumbling-minute budgets and
//! the HTTP surface that arbitrates reservations across worker processes.

pub mod budget;
pub mod handle;
pub mod handlers;
pub mod paired;
pub mod schemas;

pub use budget::{BudgetSnapshot, LockDenied, Reservation, WindowBudget, WINDOW_SECS};
pub use handle::LeaseHandle;
pub use handlers::CounterState;
pub use paired::{PairedBudget, PairedDenial, PairedSnapshot};

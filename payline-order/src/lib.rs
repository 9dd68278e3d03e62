pub mod models;
pub mod payment;
pub mod totals;
pub mod repository;
pub mod orchestrator;
pub mod manager;

pub use models::{Address, ClientReference, Item, Order, OrderError, OrderRecord, OrderState, Tax};
pub use payment::{Payment, PaymentRecord, PaymentState, Transaction, TransactionRecord, TransactionState};
pub use totals::{compute_totals, Totals};
pub use repository::{InMemoryOrderRepository, OrderRepository, RepositoryError};
pub use orchestrator::{OrchestratorError, PaymentOrchestrator};
pub use manager::{ItemSource, ManagerError, NewOrder, OrderManager};

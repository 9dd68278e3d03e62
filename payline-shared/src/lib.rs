pub mod money;
pub mod pii;
pub mod models;

pub use money::{round_money, to_minor_units};
pub use pii::Masked;

mod account;
mod connection;
mod id;
mod transaction;

pub use account::{Account, AccountType};
pub use connection::{Connection, ConnectionStatus, Provider};
pub use id::Id;
pub use transaction::{Location, NegativeAmountError, Transaction, TransactionKind};

pub mod attempt;
pub mod document;
pub mod error;
pub mod loan;
pub mod payment;
pub mod wallet;

//! One-off content purchases, settled by the reconciler like subscriptions.

pub mod book;

pub use book::{Purchase, PurchaseBook, PurchaseOrder};

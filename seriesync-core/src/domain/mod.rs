//! Domain types: identifiers, series, metadata, stored items, baskets.

pub mod identifier;
pub mod item;
pub mod metadata;
pub mod series;

pub use identifier::Identifier;
pub use item::{Basket, BasketMember, StoredItem};
pub use metadata::{MetaValue, Metadata, PRICE_COLUMN};
pub use series::{Row, Series};

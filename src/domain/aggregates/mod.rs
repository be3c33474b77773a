//! Aggregates module
pub mod cart;
pub mod order;
pub mod product;
pub mod user;

pub use cart::{Cart, CartLine};
pub use order::{Change, NewOrder, Order, OrderAction, OrderItem, OrderStatus, PaymentStatus, Transition};
pub use product::{Product, ProductDraft};
pub use user::{Principal, Role, Scope, User};

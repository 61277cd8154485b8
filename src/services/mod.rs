pub mod baskets;
pub mod orders;

pub use baskets::BasketService;
pub use orders::OrderService;

pub mod basket;
pub mod basket_item;
pub mod buyer_address;
pub mod order;
pub mod order_item;
pub mod product;

pub use basket::Entity as Basket;
pub use basket_item::Entity as BasketItem;
pub use buyer_address::Entity as BuyerAddress;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;

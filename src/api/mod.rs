//! Clients for the remote admin backends.
//!
//! Writes go to the script API through [`Backend`]; reads additionally try
//! the edge worker and the local cache through [`CachedApiClient`].

mod cache;
mod cached_client;
mod client;
mod error;
mod types;
mod worker;

pub use cache::QueryKey;
pub use cached_client::CachedApiClient;
pub use client::{ApiClient, Backend};
pub use error::{ApiError, ErrorKind};
pub use types::{
  server_id, Draft, ListPage, Movement, MovementDraft, MovementType, Order, OrderDraft, OrderItem,
  OrderStatus, Product, ShippingInfo,
};
pub use worker::EdgeClient;

//! Community messaging: conversations, messages, reactions and read receipts

pub mod dtos;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

pub use handlers::MessagingState;
pub use services::{
    ConversationService, LruMessageCache, MessageCache, MessageService, NoopMessageCache,
};
pub use store::PostgresMessagingStore;

pub mod conversation_service;
pub mod formatter;
pub mod message_cache;
pub mod message_service;

pub use conversation_service::ConversationService;
pub use message_cache::{LruMessageCache, MessageCache, NoopMessageCache};
pub use message_service::MessageService;

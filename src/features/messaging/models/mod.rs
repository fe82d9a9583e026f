pub mod conversation;
pub mod member;
pub mod message;

pub use conversation::{direct_pair_key, Conversation, NewConversation, Participant};
pub use member::{CommunityMember, ContactPolicy, MemberRole};
pub use message::{
    Attachment, Message, MessageType, NewAttachment, NewMessage, PageDirection, Reaction,
    ReadReceipt,
};

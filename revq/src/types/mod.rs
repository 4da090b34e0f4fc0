pub mod ids;
pub mod message;
pub mod status;
pub mod events;

pub use ids::{MessageId, ReceiptToken};
pub use message::{LockRecord, Message, MessageFields};
pub use status::MessageStatus;
pub use events::QueueEvent;

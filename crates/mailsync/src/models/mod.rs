//! Domain models for the sync subsystem

mod account;
mod contact;
mod message;

pub use account::{AccountStatus, MailboxAccount};
pub use contact::Contact;
pub use message::{Direction, EmailAddress, MessageId, MessageRecord, ThreadId};

pub mod delivery;
pub mod fanout;
pub mod history;
pub mod identity;
pub mod lifecycle;
pub mod membership;
pub mod message_store;
pub mod pg_store;

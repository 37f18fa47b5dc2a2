pub mod chat;
pub mod events;
pub mod images;
pub mod receipts;
pub mod report;
pub mod schema;

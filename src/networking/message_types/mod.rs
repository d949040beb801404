pub mod database_message;
pub mod status_message;

pub mod aggregate;
pub mod censor;
pub mod error;
pub mod moderation;
pub mod source;

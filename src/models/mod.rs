pub mod job;
pub mod moderation;
pub mod submission;

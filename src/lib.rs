//! Asynchronous comment moderation
//!
//! Comments are accepted over HTTP, recorded as pending jobs in PostgreSQL and
//! queued in Redis. A worker classifies each one with Google's Gemini API
//! against eight fixed harm categories and stores the verdict.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

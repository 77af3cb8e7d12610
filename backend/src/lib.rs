pub mod ai;
pub mod auth;
pub mod category;
pub mod config;
pub mod error;
pub mod handlers;
pub mod i18n;
pub mod models;
pub mod repository;
pub mod seo;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_utils;

pub mod telegram;
pub mod web;

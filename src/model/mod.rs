//! Core data model types for received, decomposed and stored messages.

pub mod mail;

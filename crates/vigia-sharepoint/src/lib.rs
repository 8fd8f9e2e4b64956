//! SharePoint connector: app-only REST access to the contract's document library.

pub mod client;

pub use client::{SharePointClient, SharePointConfig, SharePointError};

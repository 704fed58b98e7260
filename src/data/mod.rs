//! Data module for checkrun
//!
//! Contains the check catalog and the report objects checks produce.

pub mod catalog;
pub mod report;

//! Handler modules for scrollcap-api.

pub mod convert;

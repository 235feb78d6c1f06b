//! Utilities module - text helpers shared by the stores and the engine

pub mod text_utils;

pub use text_utils::TextUtils;

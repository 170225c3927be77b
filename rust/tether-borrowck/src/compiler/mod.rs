pub mod ast;
pub mod borrowck;
pub mod error_codes;
pub mod lifetimes;
pub mod moves;
pub mod span;
pub mod state;
pub mod testing_helpers;
pub mod types;

//! Context packing, answer composition and final validation

pub mod composer;
pub mod packer;
pub mod validator;

pub use composer::Composer;
pub use packer::{estimate_tokens, pack_context};
pub use validator::validate;

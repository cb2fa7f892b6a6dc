pub mod attribute;
pub mod deal;
pub mod overrides;

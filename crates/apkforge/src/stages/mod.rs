pub mod dex;
pub mod package;
pub mod resources;
pub mod sign;
pub mod sources;

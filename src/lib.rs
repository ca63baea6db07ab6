pub use geo;
pub use pansharpen;

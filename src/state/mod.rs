pub mod registry;

pub use registry::{ClientRegistry, ViewerId};

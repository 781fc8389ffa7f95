pub mod logging;
pub mod timestamps;

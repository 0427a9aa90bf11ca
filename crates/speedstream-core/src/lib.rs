pub mod config;
pub mod logging;

pub mod accel;
pub mod buffer;
pub mod http;
pub mod proxy;
pub mod segmenter;

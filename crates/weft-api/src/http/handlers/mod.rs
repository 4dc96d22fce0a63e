pub mod stream;
pub mod thread;

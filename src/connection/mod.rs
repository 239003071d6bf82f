pub mod driver;
pub mod pipeline;

pub use driver::ConnectionState;
pub use pipeline::Pipeline;

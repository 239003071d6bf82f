pub mod buffer;
pub mod decoder;
pub mod types;
pub mod writer;

pub use buffer::ReceiveBuffer;
pub use decoder::RespStateMachine;
pub use types::RespValue;
pub use writer::encode_command;

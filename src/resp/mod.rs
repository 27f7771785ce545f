pub mod buffer;
pub mod parser;
pub mod types;
pub mod writer;

pub use buffer::GrowableBuffer;
pub use parser::{parse_slice, ProtocolReader};
pub use types::Reply;
pub use writer::{encode_command, ProtocolWriter};

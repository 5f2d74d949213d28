//! Request head decoding and response head encoding.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_decoder::MAX_HEADER_BYTES;
pub use header_decoder::MAX_HEADER_NUM;
pub use header_encoder::HeaderEncoder;

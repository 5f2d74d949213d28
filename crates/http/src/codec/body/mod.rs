//! Body framing: `Content-Length` and chunked decoders for requests, and the
//! matching encoders for responses.

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;

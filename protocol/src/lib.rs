//! Wire types and codec shared by the stand controller, the ground router and
//! any clients of the ground router.
//!
//! The logical schema (frames, commands, acknowledgements) is the
//! compatibility contract; the byte encoding is postcard with COBS framing,
//! one zero-delimited message per wire record.

pub mod message;
pub mod types;
pub mod wire;

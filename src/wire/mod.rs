//! NDJSON stream handling shared by both ends of a bridge channel.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   with a maximum line length.
//! - `reader`: read task that parses inbound lines into
//!   [`Envelope`](crate::models::Envelope)s and forwards them as [`Inbound`]
//!   items, ending with [`Inbound::Closed`].
//! - `writer`: write task that serialises outbound envelopes.

pub mod codec;
pub mod reader;
pub mod writer;

pub use reader::Inbound;

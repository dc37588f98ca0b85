//! RESP wire protocol and a single-connection client.
//!
//! Only what the query layer needs: encoding command arrays, decoding
//! RESP2/RESP3 replies, and one TCP connection that implements
//! [`Executor`](crate::executor::Executor).

pub mod connection;
pub mod decoder;
pub mod encoder;

pub use connection::Connection;

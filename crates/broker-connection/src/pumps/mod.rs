//! Background tasks that drive a [`StompClient`](crate::client::StompClient).

pub(crate) mod heartbeat;
pub(crate) mod read;
pub(crate) mod write;

//! WebSocket gateway dispatching SSH command and file transfer jobs.

pub mod gateway;

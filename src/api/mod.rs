//! HTTP surface: camera management, push ingestion, frame retrieval,
//! live MJPEG streaming, snapshots, metrics and health.

pub mod handlers;
pub mod server;


pub use server::{ApiServer, ServerState};

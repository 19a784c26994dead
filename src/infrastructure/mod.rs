// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod framed_stream;
pub mod http_backend;
pub mod logging;
pub mod payload_codec;
pub mod ws_transport;

// Flight booking gateway: an HTTP API in front of an encrypted, multi-stage vendor booking flow

pub mod api;
pub mod codec;
pub mod config;
pub mod dto;
pub mod error;
pub mod json_path;
pub mod middleware;
pub mod pipeline;
pub mod plugin;
pub mod request;
pub mod server;
pub mod service;
pub mod session;
pub mod stages;
pub mod telemetry;
pub mod transport;

// Re-export key types for convenience
pub use api::{ApiError, AppState};
pub use codec::PayloadCodec;
pub use config::{AppConfig, ConfigError};
pub use error::{CodecError, PipelineError};
pub use pipeline::{OrderPipeline, PipelineOutcome};
pub use server::{build_router, serve};
pub use service::{FlightService, ServiceError, VendorFlightService};
pub use session::{SessionState, VendorCredentials};
pub use stages::Stage;
pub use telemetry::init_tracing;
pub use transport::{HttpTransport, VendorTransport};

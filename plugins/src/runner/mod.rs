pub mod aiservice;
pub mod dry_run;
pub mod http_client;

pub use aiservice::{AiServiceAgents, AiServiceTaskRunner};
pub use dry_run::DryRunTaskRunner;
pub use http_client::{AiServiceClient, ServiceHttpError, ServiceHttpErrorKind};

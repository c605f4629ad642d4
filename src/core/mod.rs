pub mod attrs;
pub mod binding;
pub mod chain;
pub mod context;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod fallback;
pub mod filter;
pub mod message;
pub mod once;
pub mod pipeline;
pub(crate) mod resumer;
pub mod runner;

pub use attrs::{AttrKey, Attrs};
pub use chain::ChainRunner;
pub use context::{ExchangeContext, SessionContext};
pub use endpoint::{EndpointRunner, RegistryEndpointResolver, ResolvedEndpoint};
pub use engine::{FilterEngine, RunnerServices, Stage};
pub use error::{FilterError, FilterResult, PipelineError};
pub use event_loop::EventLoop;
pub use filter::{ExecutionStatus, Filter, FilterMeta, FilterRef, FilterSyncType, FilterType};
pub use message::{HttpContent, HttpRequestMessage, HttpResponseMessage, Message, PipelineMessage};
pub use pipeline::Pipeline;
pub use runner::{FilterOutcome, FilterRunner, NextStage};

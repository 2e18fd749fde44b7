//! `govwatch-core`: governance proposal polling and notification engine.
//!
//! A run pulls a page of proposals from the upstream feed, narrows it to the
//! configured topics and statuses, drops everything already announced, groups
//! the remainder by recipient list, sends one email per group and records the
//! delivered ids.
//!
//! ## Modules
//! - [`proposal`]: canonical `Proposal` entity and page shapes
//! - [`filter`]: topic/status filter and id ordering
//! - [`fetch`]: two-phase anchored feed client
//! - [`store`]: persistent, capacity-bounded sent-id store
//! - [`router`]: topic → recipient group fan-out
//! - [`notify`]: message composition and dispatch
//! - [`pipeline`]: one complete run
//! - [`config`]: TOML + environment configuration

pub mod config;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod notify;
pub mod pipeline;
pub mod proposal;
pub mod router;
pub mod store;

pub use config::GovwatchConfig;
pub use config::TopicMapping;
pub use error::PipelineError;
pub use fetch::FeedClient;
pub use fetch::ProposalQuery;
pub use fetch::ProposalSource;
pub use filter::FilterCriteria;
pub use notify::MailTransport;
pub use notify::Notifier;
pub use pipeline::Pipeline;
pub use pipeline::RunReport;
pub use proposal::Proposal;
pub use proposal::ProposalPage;
pub use proposal::ProposalStatus;
pub use router::RecipientGroup;
pub use store::JsonSentStore;
pub use store::SentStore;

//! Domain model and configuration for the waypoint decision core: guidelines,
//! journeys, sessions, relationship indices, and the engine's settings. No
//! async and no model calls live here.

pub mod config;
pub mod domain;
pub mod errors;

pub use config::{
    ConfigError, ConfigOverrides, EngineConfig, LoadOptions, LogFormat, LoggingConfig,
    MatchingConfig, ModelConfig, ModelProvider,
};
pub use domain::guideline::{
    Guideline, GuidelineContent, GuidelineId, GuidelineMetadata, GuidelineTag, JourneyNodeRef,
};
pub use domain::journey::{ActiveJourney, Journey, JourneyId, JourneyNode, JourneyNodeId, JourneyPath};
pub use domain::relationships::{DependencyIndex, DisambiguationIndex};
pub use domain::session::{
    Agent, AgentId, Capability, ContextVariable, Customer, CustomerId, Event, EventKind,
    EventSource, Session, SessionId, Term,
};
pub use errors::DomainError;

// ruleflow-core/src/core/mod.rs
// ============================================================================
// Module: Ruleflow Core Types
// Description: Canonical data model shared by the runtime and interfaces.
// Purpose: Wire together identifiers, records, rule documents, and errors.
// Dependencies: crate::core::*
// ============================================================================

//! ## Overview
//! The core module holds the data model: identifiers, events, facts, timers,
//! rule documents with validation, version history, configuration, errors,
//! templates, and the notification shapes exchanged with the runtime.

// ============================================================================
// SECTION: Core Modules
// ============================================================================

pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod fact;
pub mod identifiers;
pub mod notification;
pub mod observe;
pub mod rule;
pub mod template;
pub mod time;
pub mod timer;
pub mod version;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use condition::BaselineComparison;
pub use condition::Condition;
pub use condition::ConditionGroup;
pub use condition::ConditionLeaf;
pub use condition::ConditionSource;
pub use condition::ConditionValue;
pub use condition::GroupOperator;
pub use condition::Operator;
pub use condition::ValueReference;
pub use config::EngineConfig;
pub use config::MetricsConfig;
pub use config::StopMode;
pub use config::WebhookRetryConfig;
pub use error::EngineError;
pub use event::Event;
pub use fact::Fact;
pub use fact::FactChange;
pub use identifiers::CorrelationId;
pub use identifiers::EventId;
pub use identifiers::GroupId;
pub use identifiers::RuleId;
pub use identifiers::SubscriptionId;
pub use identifiers::TimerName;
pub use notification::Notification;
pub use notification::StreamKind;
pub use notification::StreamNotification;
pub use notification::TemporalKind;
pub use notification::TemporalMatch;
pub use observe::MetricsSnapshot;
pub use observe::Observation;
pub use rule::Action;
pub use rule::Aggregator;
pub use rule::CompareOp;
pub use rule::CountOp;
pub use rule::EventPattern;
pub use rule::FACT_SEPARATOR;
pub use rule::Group;
pub use rule::HttpMethod;
pub use rule::LogLevel;
pub use rule::Rule;
pub use rule::RuleOptions;
pub use rule::RuleSpecError;
pub use rule::TOPIC_SEPARATOR;
pub use rule::TemporalPattern;
pub use rule::Trigger;
pub use rule::ValidationWarning;
pub use self::time::Clock;
pub use self::time::ManualClock;
pub use self::time::SharedClock;
pub use self::time::SystemClock;
pub use self::time::Timestamp;
pub use timer::Timer;
pub use timer::TimerFire;
pub use version::ChangeType;
pub use version::DiffField;
pub use version::FieldDiff;
pub use version::RuleVersionEntry;
pub use version::diff_rules;

//! Write authorization
//!
//! A write is accepted only when:
//! - the query parses and every statement starts with an allowed verb
//! - this host holds the write lock for the segment, i.e. an assignment
//!   from this host to the segment exists in the store

use crate::common::Result;
use crate::coordinator::registry::HostRegistry;
use crate::coordinator::segment::Segment;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

/// Why a write was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    #[error("No query provided")]
    EmptyQuery,

    #[error("No segment id in the Host header")]
    MissingSegment,

    #[error("Unparseable query: {0}")]
    Unparseable(String),

    #[error("This server only accepts \"Write\" queries that begin with {allowed:?}, got {verb}")]
    DisallowedVerb { verb: String, allowed: Vec<String> },

    #[error("This node cannot write to segment '{segment}'. There is no write lock set")]
    NoWriteLock { segment: String },

    #[error("This node cannot write to segment '{segment}'. The write lock is held by {holders:?}")]
    HeldElsewhere {
        segment: String,
        holders: Vec<String>,
    },
}

/// Leading keyword of every statement in `query`, uppercased
pub fn statement_verbs(query: &str) -> std::result::Result<Vec<String>, Denial> {
    if query.trim().is_empty() {
        return Err(Denial::EmptyQuery);
    }
    let statements = Parser::parse_sql(&SQLiteDialect {}, query)
        .map_err(|e| Denial::Unparseable(e.to_string()))?;
    if statements.is_empty() {
        return Err(Denial::EmptyQuery);
    }

    // The rendered statement always leads with its keyword, which is steadier
    // than matching on the AST variant set.
    Ok(statements
        .iter()
        .filter_map(|stmt| {
            stmt.to_string()
                .split_whitespace()
                .next()
                .map(str::to_uppercase)
        })
        .collect())
}

pub struct WriteAuthorizer {
    registry: HostRegistry,
    allowed_verbs: Vec<String>,
}

impl WriteAuthorizer {
    pub fn new(registry: HostRegistry, allowed_verbs: &[String]) -> Self {
        Self {
            registry,
            allowed_verbs: allowed_verbs.iter().map(|v| v.to_uppercase()).collect(),
        }
    }

    pub fn allowed_verbs(&self) -> &[String] {
        &self.allowed_verbs
    }

    /// Reject anything that is not a plain mutation
    pub fn validate(&self, query: &str) -> std::result::Result<(), Denial> {
        for verb in statement_verbs(query)? {
            if !self.allowed_verbs.contains(&verb) {
                return Err(Denial::DisallowedVerb {
                    verb,
                    allowed: self.allowed_verbs.clone(),
                });
            }
        }
        Ok(())
    }

    /// Allow iff `host` holds the assignment for `segment`
    pub async fn authorize(&self, segment: &Segment, host: &str) -> Result<()> {
        if self.registry.is_assigned_to_host(segment, host).await? {
            tracing::debug!("{} holds the write lock for {}", host, segment.id);
            return Ok(());
        }

        let holders: Vec<String> = self
            .registry
            .all_copies(segment)
            .await?
            .into_iter()
            .map(|a| a.host)
            .collect();
        let denial = if holders.is_empty() {
            Denial::NoWriteLock {
                segment: segment.id.clone(),
            }
        } else {
            Denial::HeldElsewhere {
                segment: segment.id.clone(),
                holders,
            }
        };
        tracing::warn!("Refusing write from {}: {}", host, denial);
        Err(denial.into())
    }
}

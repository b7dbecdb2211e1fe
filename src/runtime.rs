//! # Runtime Environment
//!
//! Source of the environment variables scanned by [`crate::auto::import`].
//! Platform detection lives outside this crate; implementations only need to
//! produce a name to value mapping.

use crate::context::Context;
use crate::provider::ApiError;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

/// Produces the environment variables of the hosting platform
#[async_trait]
pub trait RuntimeEnvironment: Send + Sync + fmt::Debug {
    /// Current variables, name to value
    async fn env_vars(&self, ctx: &Context) -> Result<BTreeMap<String, String>, ApiError>;
}

/// Variables of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

#[async_trait]
impl RuntimeEnvironment for ProcessEnvironment {
    async fn env_vars(&self, _ctx: &Context) -> Result<BTreeMap<String, String>, ApiError> {
        Ok(std::env::vars().collect())
    }
}

/// Fixed set of variables, optionally failing a number of times first
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    vars: BTreeMap<String, String>,
    failures: Mutex<VecDeque<u16>>,
}

impl StaticEnvironment {
    #[must_use]
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the next calls with these HTTP status codes, in order
    #[must_use]
    pub fn with_failures(self, codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            failures: Mutex::new(codes.into_iter().collect()),
            ..self
        }
    }
}

#[async_trait]
impl RuntimeEnvironment for StaticEnvironment {
    async fn env_vars(&self, _ctx: &Context) -> Result<BTreeMap<String, String>, ApiError> {
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        match failure {
            Some(code) => Err(ApiError::status(
                "runtime",
                code,
                crate::provider::canonical_status(code),
                "environment lookup failed",
            )),
            None => Ok(self.vars.clone()),
        }
    }
}

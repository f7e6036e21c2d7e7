//! Request dispatch
//!
//! Pipeline: look up operation → validate target → resolve arguments →
//! execute → wrap result. Every failure becomes a [`Response`] carrying an
//! error message; nothing escapes `handle`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ConfigLookup;
use crate::executor::CommandExecutor;
use crate::registry::Registry;
use crate::resolve::resolve;
use crate::validate::TargetValidator;

pub const INVALID_TYPE: &str = "Invalid type";
pub const INVALID_TARGET: &str = "Invalid target";

/// A decoded diagnostic request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub target: String,
}

impl Request {
    pub fn new(kind: &str, target: &str) -> Self {
        Self {
            kind: kind.to_string(),
            target: target.to_string(),
        }
    }
}

/// Reply payload. Exactly one of `error` / `data` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = "unknown error".to_string();
        }
        Self {
            error: Some(message),
            data: None,
        }
    }

    pub fn data(data: impl Into<String>) -> Self {
        Self {
            error: None,
            data: Some(data.into()),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn data_text(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs one request at a time against shared, read-only state
pub struct Dispatcher<E> {
    registry: Arc<Registry>,
    validator: Arc<TargetValidator>,
    config: Arc<dyn ConfigLookup>,
    executor: E,
}

impl<E: CommandExecutor> Dispatcher<E> {
    pub fn new(
        registry: Arc<Registry>,
        validator: Arc<TargetValidator>,
        config: Arc<dyn ConfigLookup>,
        executor: E,
    ) -> Self {
        Self {
            registry,
            validator,
            config,
            executor,
        }
    }

    /// Decode a JSON body and handle it. Decode failures are reported as
    /// an error response carrying the decoder's message.
    pub async fn handle_json(&self, body: &[u8]) -> Response {
        match serde_json::from_slice::<Request>(body) {
            Ok(request) => self.handle(&request).await,
            Err(e) => {
                warn!("Malformed request: {e}");
                Response::error(e.to_string())
            }
        }
    }

    pub async fn handle(&self, request: &Request) -> Response {
        let span = info_span!("dispatch", id = %Uuid::new_v4(), op = %request.kind);
        self.dispatch(request).instrument(span).await
    }

    async fn dispatch(&self, request: &Request) -> Response {
        let Some(op) = self.registry.lookup(&request.kind) else {
            warn!("Unknown operation: {:?}", request.kind);
            return Response::error(INVALID_TYPE);
        };

        if !self
            .validator
            .is_valid(&request.target, op.validation_classes())
        {
            warn!("Rejected target: {:?}", request.target);
            return Response::error(INVALID_TARGET);
        }

        info!("Dispatching {} for {}", op.name(), request.target);
        let command = resolve(op, &request.target, self.config.as_ref());

        match self.executor.execute(&command).await {
            Ok(output) => Response::data(String::from_utf8_lossy(&output).into_owned()),
            Err(e) => {
                warn!("{} failed: {e}", op.name());
                Response::error(e.to_string())
            }
        }
    }
}

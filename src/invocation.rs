//! One method call and its outcome.
//!
//! An [`Invocation`] carries the method name, dynamic arguments and a
//! string-keyed attachment map used as a side channel by codecs and filters
//! (payload sizes, generic-call marker, trace context). An [`RpcOutcome`] is
//! what an invoker produces: either a value or a business fault carried
//! in-band from the remote side, plus its own attachments.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RpcError};

/// Attachment key marking a generic (schema-less) call.
pub const GENERIC_KEY: &str = "generic";
/// Attachment key recording decoded request bytes.
pub const INPUT_KEY: &str = "input";
/// Attachment key recording decoded response bytes.
pub const OUTPUT_KEY: &str = "output";

/// One method call: name, typed argument descriptors, argument values and
/// side-channel attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    method: String,
    arg_types: Vec<String>,
    args: Vec<Value>,
    attachments: HashMap<String, String>,
    /// Whether the called method produces a value. `false` models a void
    /// method; the cluster merge path returns an empty outcome for those.
    returns_value: bool,
}

impl Invocation {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            arg_types: Vec::new(),
            args,
            attachments: HashMap::new(),
            returns_value: true,
        }
    }

    pub fn with_arg_types(mut self, arg_types: Vec<String>) -> Self {
        self.arg_types = arg_types;
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn returning_nothing(mut self) -> Self {
        self.returns_value = false;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arg_types(&self) -> &[String] {
        &self.arg_types
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    /// Attachments are the mutable side channel of an otherwise by-value
    /// call description.
    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attachments.insert(key.into(), value.into());
    }

    pub fn is_generic(&self) -> bool {
        self.attachment(GENERIC_KEY).is_some_and(|v| v == "true")
    }
}

/// A business fault raised by the remote implementation and carried in-band
/// through the result, as opposed to a transport-level [`RpcError`]. Matched
/// against a transport's expected-fault kinds by its `kind` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub kind: String,
    pub message: String,
}

impl RemoteFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one invocation. Exactly one of `value`/`fault` is meaningful;
/// both carry attachments. Immutable once produced, except for the
/// observability attachments set by the codec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcOutcome {
    value: Option<Value>,
    fault: Option<RemoteFault>,
    attachments: HashMap<String, String>,
}

impl RpcOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn from_fault(fault: RemoteFault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn fault(&self) -> Option<&RemoteFault> {
        self.fault.as_ref()
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// Collapse into the carried value, surfacing the carried fault as an
    /// unclassified error for callers that do not translate faults
    /// themselves.
    pub fn into_value(self) -> Result<Option<Value>> {
        match self.fault {
            Some(fault) => Err(RpcError::unknown(fault.to_string())),
            None => Ok(self.value),
        }
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attachments.insert(key.into(), value.into());
    }
}

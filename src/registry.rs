//! Operation registry: named, schema-described handlers.
//!
//! A [`Registry`] is built once at startup and then shared read-only between
//! whichever transports serve it. Validation of the declared input shape
//! happens in [`Registry::dispatch`] before a handler ever runs, so handlers
//! can rely on required parameters being present and typed as declared.

use std::{any::Any, collections::HashMap, future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    arguments::Arguments,
    error::{Error, ErrorKind, Result},
    invocation::{Invocation, InvocationResult},
    schema::{Tool, ToolInputSchema},
};

/// Primitive types an operation parameter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    StringArray,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::StringArray => "array of strings",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }

    /// Models sometimes send `7.0` for an integer; hand handlers `7`.
    fn normalize(&self, value: Value) -> Value {
        match (self, value.as_f64()) {
            (ParamType::Integer, Some(f)) if !value.is_i64() && !value.is_u64() => {
                json!(f as i64)
            }
            _ => value,
        }
    }

    fn schema(&self) -> Map<String, Value> {
        let mut schema = Map::new();
        match self {
            ParamType::StringArray => {
                schema.insert("type".into(), json!("array"));
                schema.insert("items".into(), json!({"type": "string"}));
            }
            other => {
                schema.insert("type".into(), json!(other.as_str()));
            }
        }
        schema
    }

    fn from_schema(schema: &Value) -> Option<Self> {
        match schema.get("type")?.as_str()? {
            "string" => Some(ParamType::String),
            "integer" => Some(ParamType::Integer),
            "number" => Some(ParamType::Number),
            "boolean" => Some(ParamType::Boolean),
            "array" => Some(ParamType::StringArray),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl Parameter {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Name, description and ordered input shape of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// JSON Schema object describing the parameters, in declaration order.
    pub fn input_schema(&self) -> Value {
        let tool = self.to_tool();
        let mut schema = json!({
            "type": tool.input_schema.schema_type,
            "properties": tool.input_schema.properties.unwrap_or_default(),
        });
        if let Some(required) = tool.input_schema.required {
            schema["required"] = json!(required);
        }
        schema
    }

    pub fn to_tool(&self) -> Tool {
        let mut properties = Map::new();
        for p in &self.parameters {
            let mut schema = p.param_type.schema();
            if let Some(description) = &p.description {
                schema.insert("description".into(), json!(description));
            }
            if let Some(default) = &p.default {
                schema.insert("default".into(), default.clone());
            }
            properties.insert(p.name.clone(), Value::Object(schema));
        }
        let required: Vec<String> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.clone())
            .collect();

        Tool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: Some(properties),
                required: (!required.is_empty()).then_some(required),
            },
        }
    }

    /// Rebuild a descriptor from an advertised tool. Properties with a type
    /// we cannot represent are kept as strings.
    pub fn from_tool(tool: &Tool) -> Self {
        let required = tool.input_schema.required.clone().unwrap_or_default();
        let parameters = tool
            .input_schema
            .properties
            .iter()
            .flatten()
            .map(|(name, schema)| Parameter {
                name: name.clone(),
                param_type: ParamType::from_schema(schema).unwrap_or(ParamType::String),
                required: required.contains(name),
                default: schema.get("default").cloned(),
                description: schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect();

        Self {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters,
        }
    }

    /// Check `arguments` against the declared shape and fill defaults for
    /// absent optional parameters.
    pub fn validate(&self, mut arguments: Arguments) -> Result<Arguments> {
        for p in &self.parameters {
            match arguments.0.remove(&p.name).filter(|v| !v.is_null()) {
                None if p.required => {
                    return Err(Error::MissingArgument {
                        operation: self.name.clone(),
                        parameter: p.name.clone(),
                    });
                }
                None => {
                    if let Some(default) = &p.default {
                        arguments.insert(p.name.clone(), default.clone());
                    }
                }
                Some(value) if !p.param_type.matches(&value) => {
                    return Err(Error::InvalidArgument {
                        operation: self.name.clone(),
                        parameter: p.name.clone(),
                        message: format!("expected {}, got {}", p.param_type.as_str(), value),
                    });
                }
                Some(value) => {
                    arguments.insert(p.name.clone(), p.param_type.normalize(value));
                }
            }
        }
        for key in arguments.0.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                debug!("Ignoring undeclared argument '{}' for {}", key, self.name);
            }
        }
        Ok(arguments)
    }
}

/// Handler for a registered operation.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, arguments: Arguments) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, arguments: Arguments) -> Result<Value> {
        (self)(arguments).await
    }
}

struct Entry {
    descriptor: OperationDescriptor,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: OperationDescriptor,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        if self.index.contains_key(&descriptor.name) {
            return Err(Error::DuplicateOperation(descriptor.name));
        }
        self.index
            .insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(Entry {
            descriptor,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Validate `arguments` and run the named operation. Handler failures
    /// that are not already provider or validation errors are reported as
    /// handler errors, as are panics.
    pub async fn dispatch(&self, name: &str, arguments: Arguments) -> Result<Value> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))?;

        let arguments = entry.descriptor.validate(arguments)?;
        debug!("Dispatching {} with {:?}", name, arguments);

        match AssertUnwindSafe(entry.handler.call(arguments))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => match e.kind() {
                ErrorKind::Provider | ErrorKind::Validation => Err(e),
                _ => Err(Error::handler(name, e.to_string())),
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Handler for {} panicked: {}", name, message);
                Err(Error::handler(name, format!("handler panicked: {message}")))
            }
        }
    }

    /// Dispatch an [`Invocation`], folding any failure into the result.
    pub async fn invoke(&self, invocation: Invocation) -> InvocationResult {
        let result = self
            .dispatch(&invocation.name, invocation.arguments)
            .await;
        InvocationResult::from_result(invocation.id, result)
    }

    /// Descriptors in registration order.
    pub fn describe_all(&self) -> Vec<OperationDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! MethodRegistry — maps qualified method names to handler descriptors.
//!
//! A handler descriptor is built once at registration time: it records the
//! parameter names the handler binds, whether it is synchronous or
//! asynchronous, and an optional description. Dispatch never re-inspects the
//! handler; it binds `params` against the recorded signature and calls it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use relay_protocol::{HandlerError, HandlerResult, Params, RpcError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

/// Reserved for protocol extensions, never registrable.
const RESERVED_PREFIX: &str = "rpc.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("method name must not be empty")]
    EmptyName,

    #[error("method name {0:?} uses the reserved \"rpc.\" prefix")]
    Reserved(String),

    #[error("method not found: {0}")]
    NotFound(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Signatures and argument binding
// ─────────────────────────────────────────────────────────────────────────────

/// One declared handler parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
}

/// The parameter list a handler binds against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// Positional or named binding against a fixed parameter list.
    Named(Vec<ParamSpec>),
    /// Params are handed to the handler unbound.
    Raw,
}

impl Signature {
    /// All parameters required, in declaration order.
    pub fn new(names: &[&str]) -> Self {
        Self::Named(
            names
                .iter()
                .map(|name| ParamSpec {
                    name: (*name).to_string(),
                    required: true,
                })
                .collect(),
        )
    }

    pub fn raw() -> Self {
        Self::Raw
    }

    /// Append an optional parameter. Optional parameters that are not
    /// supplied bind to `null`.
    pub fn optional(self, name: &str) -> Self {
        let mut specs = match self {
            Self::Named(specs) => specs,
            Self::Raw => Vec::new(),
        };
        specs.push(ParamSpec {
            name: name.to_string(),
            required: false,
        });
        Self::Named(specs)
    }

    pub fn param_names(&self) -> Vec<String> {
        match self {
            Self::Named(specs) => specs.iter().map(|s| s.name.clone()).collect(),
            Self::Raw => Vec::new(),
        }
    }

    /// Bind request params to this signature.
    ///
    /// Arrays bind positionally, objects bind by name. Too many positional
    /// values, unknown names, and missing required parameters are all
    /// `Invalid params`.
    pub fn bind(&self, params: Option<Params>) -> Result<Args, RpcError> {
        let specs = match self {
            Self::Raw => return Ok(Args::raw(params)),
            Self::Named(specs) => specs,
        };

        let mut slots: Vec<Option<Value>> = vec![None; specs.len()];

        match params {
            None => {}
            Some(Params::Array(values)) => {
                if values.len() > specs.len() {
                    return Err(RpcError::invalid_params(format!(
                        "expected at most {} positional params, got {}",
                        specs.len(),
                        values.len()
                    )));
                }
                for (slot, value) in slots.iter_mut().zip(values) {
                    *slot = Some(value);
                }
            }
            Some(Params::Object(map)) => {
                for (name, value) in map {
                    let index = specs
                        .iter()
                        .position(|s| s.name == name)
                        .ok_or_else(|| RpcError::invalid_params(format!("unknown param: {name}")))?;
                    slots[index] = Some(value);
                }
            }
        }

        let mut values = Vec::with_capacity(specs.len());
        for (spec, slot) in specs.iter().zip(slots) {
            match slot {
                Some(value) => values.push(value),
                None if spec.required => {
                    return Err(RpcError::invalid_params(format!(
                        "missing required param: {}",
                        spec.name
                    )));
                }
                None => values.push(Value::Null),
            }
        }

        Ok(Args {
            names: specs.iter().map(|s| s.name.clone()).collect(),
            values,
            raw: None,
        })
    }
}

/// Arguments bound for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    names: Vec<String>,
    values: Vec<Value>,
    raw: Option<Params>,
}

impl Args {
    fn raw(params: Option<Params>) -> Self {
        Self {
            names: Vec::new(),
            values: Vec::new(),
            raw: params,
        }
    }

    /// Bound value at a declared position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Bound value by declared parameter name.
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
    }

    /// Deserialize the bound value at `index`.
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self.values.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            let name = self.names.get(index).map(String::as_str).unwrap_or("?");
            HandlerError::invalid_params(format!("param {name}: {e}"))
        })
    }

    /// Deserialize all bound values as one tuple (or any type that reads
    /// from a JSON array).
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, HandlerError> {
        // `()` reads from null, not from an empty array
        if self.values.is_empty() {
            if let Ok(unit) = serde_json::from_value(Value::Null) {
                return Ok(unit);
            }
        }
        serde_json::from_value(Value::Array(self.values))
            .map_err(|e| HandlerError::invalid_params(e.to_string()))
    }

    /// Unbound params, for handlers registered with `Signature::Raw`.
    pub fn raw_params(&self) -> Option<&Params> {
        self.raw.as_ref()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler descriptors
// ─────────────────────────────────────────────────────────────────────────────

type SyncHandlerFn = dyn Fn(Args) -> HandlerResult + Send + Sync;
type AsyncHandlerFn = dyn Fn(Args) -> BoxFuture<'static, HandlerResult> + Send + Sync;

#[derive(Clone)]
enum HandlerFn {
    Sync(Arc<SyncHandlerFn>),
    Async(Arc<AsyncHandlerFn>),
}

/// A callable plus the metadata needed to bind and describe it.
#[derive(Clone)]
pub struct HandlerDescriptor {
    signature: Signature,
    func: HandlerFn,
    description: Option<String>,
}

fn to_result<R: Serialize>(value: R) -> HandlerResult {
    serde_json::to_value(value).map_err(HandlerError::fault)
}

impl HandlerDescriptor {
    /// Synchronous handler taking its bound params as a tuple.
    ///
    /// ```ignore
    /// HandlerDescriptor::sync_fn(&["a", "b"], |(a, b): (i64, i64)| Ok(a + b))
    /// ```
    pub fn sync_fn<F, P, R>(params: &[&str], f: F) -> Self
    where
        F: Fn(P) -> Result<R, HandlerError> + Send + Sync + 'static,
        P: DeserializeOwned,
        R: Serialize,
    {
        Self::sync_args(Signature::new(params), move |args: Args| {
            let parsed: P = args.deserialize()?;
            to_result(f(parsed)?)
        })
    }

    /// Asynchronous handler taking its bound params as a tuple.
    pub fn async_fn<F, Fut, P, R>(params: &[&str], f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
    {
        let f = Arc::new(f);
        Self::async_args(Signature::new(params), move |args: Args| {
            let f = f.clone();
            async move {
                let parsed: P = args.deserialize()?;
                to_result(f(parsed).await?)
            }
        })
    }

    /// Synchronous handler working on `Args` directly.
    pub fn sync_args<F>(signature: Signature, f: F) -> Self
    where
        F: Fn(Args) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            signature,
            func: HandlerFn::Sync(Arc::new(f)),
            description: None,
        }
    }

    /// Asynchronous handler working on `Args` directly.
    pub fn async_args<F, Fut>(signature: Signature, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let func: Arc<AsyncHandlerFn> =
            Arc::new(move |args: Args| -> BoxFuture<'static, HandlerResult> { Box::pin(f(args)) });
        Self {
            signature,
            func: HandlerFn::Async(func),
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_async(&self) -> bool {
        matches!(self.func, HandlerFn::Async(_))
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("signature", &self.signature)
            .field("is_async", &self.is_async())
            .field("description", &self.description)
            .finish()
    }
}

/// A registered method.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub name: String,
    pub handler: HandlerDescriptor,
}

impl MethodEntry {
    pub fn is_async(&self) -> bool {
        self.handler.is_async()
    }

    pub fn description(&self) -> Option<&str> {
        self.handler.description()
    }

    /// Bind `params` and run the handler. Synchronous handlers run to
    /// completion without yielding.
    pub async fn invoke(&self, params: Option<Params>) -> HandlerResult {
        let args = self.handler.signature.bind(params)?;
        match &self.handler.func {
            HandlerFn::Sync(f) => f(args),
            HandlerFn::Async(f) => f(args).await,
        }
    }
}

/// Public description of a method, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub params: Vec<String>,
    #[serde(rename = "isAsync")]
    pub is_async: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit bare-name → descriptor mapping for a namespace.
#[derive(Debug, Clone, Default)]
pub struct ServiceMethods {
    entries: Vec<(String, HandlerDescriptor)>,
}

impl ServiceMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: impl Into<String>, handler: HandlerDescriptor) -> Self {
        self.entries.push((name.into(), handler));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A service object that declares its public operations.
///
/// Registered under a namespace, each operation becomes
/// `namespace.operation`.
pub trait Service: Send + Sync + 'static {
    fn methods(self: Arc<Self>) -> ServiceMethods;
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Method table. Mutated only through `&mut self`, so registration happens
/// before the dispatcher is shared (or under the owner's own lock).
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<MethodEntry>>,
    /// namespace → qualified names registered through it
    services: HashMap<String, Vec<String>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method, overwriting any previous entry with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: HandlerDescriptor,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        validate_name(&name)?;
        debug!("Registered method: {name}");
        let entry = MethodEntry {
            name: name.clone(),
            handler,
        };
        self.methods.insert(name, Arc::new(entry));
        Ok(())
    }

    /// Register every operation of `methods` as `namespace.name`.
    ///
    /// Re-registering a namespace replaces the methods it previously added.
    /// Returns the number of methods registered.
    pub fn register_methods(
        &mut self,
        namespace: &str,
        methods: ServiceMethods,
    ) -> Result<usize, RegistryError> {
        validate_name(namespace)?;
        let entries = methods
            .entries
            .into_iter()
            .map(|(bare, handler)| -> Result<_, RegistryError> {
                validate_name(&bare)?;
                let qualified = format!("{namespace}.{bare}");
                validate_name(&qualified)?;
                Ok((qualified, handler))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.unregister_service(namespace);

        let mut names = Vec::with_capacity(entries.len());
        for (qualified, handler) in entries {
            self.register(qualified.clone(), handler)?;
            names.push(qualified);
        }

        let count = names.len();
        info!("Registered service: {namespace} ({count} methods)");
        self.services.insert(namespace.to_string(), names);
        Ok(count)
    }

    /// Register a service object's declared operations under `namespace`.
    pub fn register_service<S: Service>(
        &mut self,
        namespace: &str,
        service: S,
    ) -> Result<usize, RegistryError> {
        self.register_methods(namespace, Arc::new(service).methods())
    }

    /// Remove a method. Returns whether it existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    /// Remove every method added through `namespace`. Returns whether the
    /// namespace was registered.
    pub fn unregister_service(&mut self, namespace: &str) -> bool {
        match self.services.remove(namespace) {
            Some(names) => {
                for name in &names {
                    self.methods.remove(name);
                }
                info!("Unregistered service: {namespace}");
                true
            }
            None => false,
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<MethodEntry>, RegistryError> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// All registered methods, sorted by name.
    pub fn list_methods(&self) -> Vec<MethodInfo> {
        let mut infos: Vec<MethodInfo> = self
            .methods
            .values()
            .map(|entry| MethodInfo {
                name: entry.name.clone(),
                description: entry.description().map(str::to_string),
                params: entry.handler.signature.param_names(),
                is_async: entry.is_async(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(RegistryError::Reserved(name.to_string()));
    }
    Ok(())
}

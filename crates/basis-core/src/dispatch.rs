//! Dynamic dispatch for plugin-supplied functions
//!
//! A plugin hands the core a [`DynFunc`] declaring the inputs it needs. The
//! caller builds a [`Scope`] of bindings, each level of the
//! target → project → basis chain adds its own, and the basis performs the
//! call. Inputs are matched against bindings by name or by [`TypeTag`]; a
//! typed input with no binding is derived through the registered converters,
//! which may chain.
//!
//! Bindings are searched in insertion order, so values added by inner levels
//! (caller arguments first, then target, project, basis) shadow outer ones.

use basis_types::Status;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Longest converter chain tried when deriving a value
pub const MAX_CONVERSION_DEPTH: usize = 8;

/// Semantic type of a bound value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// The current basis
    Basis,
    /// The current project
    Project,
    /// The current target
    Target,
    /// A machine specialization
    Machine,
    /// The execution context
    Context,
    /// The terminal UI
    Ui,
    /// Raw CLI arguments
    CliArgs,
    /// Job metadata
    JobInfo,
    /// Command exit code (`i32`)
    ExitCode,
    /// A plugin-defined type
    Custom(&'static str),
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Basis => "basis",
            Self::Project => "project",
            Self::Target => "target",
            Self::Machine => "machine",
            Self::Context => "context",
            Self::Ui => "ui",
            Self::CliArgs => "cli_args",
            Self::JobInfo => "job_info",
            Self::ExitCode => "exit_code",
            Self::Custom(name) => name,
        };
        f.write_str(name)
    }
}

/// Dispatch failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No binding or converter chain produced a required input
    #[error("{func}: no value satisfies argument `{input}`")]
    Unsatisfied {
        /// Function being resolved
        func: String,
        /// The unresolved input
        input: String,
    },

    /// A value did not hold the expected type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type
        found: String,
    },

    /// The invoked function reported a failure
    #[error("{func} failed: {message}")]
    Failed {
        /// Function name
        func: String,
        /// Failure message
        message: String,
    },

    /// The invoked function failed with a remote status
    #[error("{func} failed: {status}")]
    Remote {
        /// Function name
        func: String,
        /// Remote status
        status: Status,
    },
}

impl DispatchError {
    /// Create a plain failure
    #[inline]
    pub fn failed(func: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            func: func.into(),
            message: message.into(),
        }
    }

    /// Create a failure carrying a remote status
    #[inline]
    pub fn remote(func: impl Into<String>, status: Status) -> Self {
        Self::Remote {
            func: func.into(),
            status,
        }
    }

    /// Remote status, if any
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Remote { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// A type-tagged, shareable value
#[derive(Clone)]
pub struct Value {
    tag: TypeTag,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Value {
    /// Wrap `value` under `tag`
    pub fn new<T: Any + Send + Sync>(tag: TypeTag, value: T) -> Self {
        Self {
            tag,
            inner: Arc::new(value),
        }
    }

    /// Exit code value
    #[inline]
    #[must_use]
    pub fn exit_code(code: i32) -> Self {
        Self::new(TypeTag::ExitCode, code)
    }

    /// Semantic type
    #[inline]
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Borrow the payload as `T`
    #[inline]
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Clone the payload out as `T`
    pub fn get<T: Any + Clone>(&self) -> Result<T, DispatchError> {
        self.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| DispatchError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                found: self.tag.to_string(),
            })
    }

    /// Check whether both values share one payload
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value").field("tag", &self.tag).finish()
    }
}

/// Key under which a value is bound
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingKey {
    /// Bound under a string key
    Named(String),
    /// Bound under its semantic type
    Typed(TypeTag),
}

/// An argument a function declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    name: Option<String>,
    tag: TypeTag,
}

impl Input {
    /// Request any value of type `tag`
    #[inline]
    #[must_use]
    pub fn typed(tag: TypeTag) -> Self {
        Self { name: None, tag }
    }

    /// Request the value bound as `name`, which must be of type `tag`
    #[inline]
    pub fn named(name: impl Into<String>, tag: TypeTag) -> Self {
        Self {
            name: Some(name.into()),
            tag,
        }
    }

    /// Requested name, if any
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Requested type
    #[inline]
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    fn matches(&self, key: &BindingKey, value: &Value) -> bool {
        if value.tag() != self.tag {
            return false;
        }
        match (key, self.name.as_deref()) {
            (BindingKey::Named(bound), Some(wanted)) => bound == wanted,
            (BindingKey::Typed(_), None) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}: {}", self.tag),
            None => write!(f, "{}", self.tag),
        }
    }
}

/// Resolved arguments handed to a function body
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<(Input, Value)>,
}

impl Args {
    /// Number of resolved arguments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no arguments were declared
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Argument at `index`, in declaration order
    #[inline]
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index).map(|(_, v)| v)
    }

    /// Argument at `index` as `T`
    pub fn get<T: Any + Clone>(&self, index: usize) -> Result<T, DispatchError> {
        self.value(index)
            .ok_or_else(|| DispatchError::Unsatisfied {
                func: "args".to_string(),
                input: format!("#{index}"),
            })?
            .get()
    }

    /// First typed argument of `tag` as `T`
    pub fn typed<T: Any + Clone>(&self, tag: TypeTag) -> Result<T, DispatchError> {
        self.find(|input| input.name.is_none() && input.tag == tag, &tag.to_string())
    }

    /// Argument declared as `name` as `T`
    pub fn named<T: Any + Clone>(&self, name: &str) -> Result<T, DispatchError> {
        self.find(|input| input.name.as_deref() == Some(name), name)
    }

    fn find<T: Any + Clone>(
        &self,
        pred: impl Fn(&Input) -> bool,
        label: &str,
    ) -> Result<T, DispatchError> {
        self.values
            .iter()
            .find(|(input, _)| pred(input))
            .ok_or_else(|| DispatchError::Unsatisfied {
                func: "args".to_string(),
                input: label.to_string(),
            })?
            .1
            .get()
    }
}

type Body = dyn Fn(&Args) -> Result<Value, DispatchError> + Send + Sync;

/// A dynamically invoked function with declared inputs and output type
#[derive(Clone)]
pub struct DynFunc {
    name: String,
    inputs: Vec<Input>,
    output: TypeTag,
    body: Arc<Body>,
}

/// A function deriving one type from others
pub type Converter = DynFunc;

impl DynFunc {
    /// Create a function producing `output`
    pub fn new<F>(name: impl Into<String>, output: TypeTag, body: F) -> Self
    where
        F: Fn(&Args) -> Result<Value, DispatchError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            output,
            body: Arc::new(body),
        }
    }

    /// Declare an input
    #[inline]
    #[must_use]
    pub fn with_input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    /// Function name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared inputs
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Declared output type
    #[inline]
    #[must_use]
    pub fn output(&self) -> TypeTag {
        self.output
    }

    /// Run the body on resolved arguments, checking the output type
    pub fn invoke(&self, args: &Args) -> Result<Value, DispatchError> {
        let value = (self.body)(args)?;
        if value.tag() != self.output {
            return Err(DispatchError::TypeMismatch {
                expected: self.output.to_string(),
                found: value.tag().to_string(),
            });
        }
        Ok(value)
    }
}

impl fmt::Debug for DynFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynFunc")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// Bindings and converters available to one call
#[derive(Clone, Default)]
pub struct Scope {
    bindings: Vec<(BindingKey, Value)>,
    converters: Vec<Converter>,
}

impl Scope {
    /// Create empty scope
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name`
    pub fn add_named(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.push((BindingKey::Named(name.into()), value));
    }

    /// Bind `value` under its type
    pub fn add_typed(&mut self, value: Value) {
        self.bindings.push((BindingKey::Typed(value.tag()), value));
    }

    /// With named binding
    #[inline]
    #[must_use]
    pub fn with_named(mut self, name: impl Into<String>, value: Value) -> Self {
        self.add_named(name, value);
        self
    }

    /// With typed binding
    #[inline]
    #[must_use]
    pub fn with_typed(mut self, value: Value) -> Self {
        self.add_typed(value);
        self
    }

    /// Register converters, searched in registration order
    pub fn add_converters<I: IntoIterator<Item = Converter>>(&mut self, converters: I) {
        self.converters.extend(converters);
    }

    /// Bound keys, in search order
    pub fn keys(&self) -> impl Iterator<Item = &BindingKey> {
        self.bindings.iter().map(|(k, _)| k)
    }

    /// Directly bound value for `input`
    #[must_use]
    pub fn lookup(&self, input: &Input) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(key, value)| input.matches(key, value))
            .map(|(_, value)| value)
    }

    /// Value for `input`, derived through converters when not bound
    pub fn resolve(&self, func: &str, input: &Input) -> Result<Value, DispatchError> {
        if let Some(value) = self.lookup(input) {
            return Ok(value.clone());
        }
        if input.name().is_none() {
            let mut visiting = Vec::new();
            if let Some(value) = self.derive(input.tag(), &mut visiting)? {
                return Ok(value);
            }
        }
        Err(DispatchError::Unsatisfied {
            func: func.to_string(),
            input: input.to_string(),
        })
    }

    /// Resolve every input of `func` and invoke it
    pub fn call(&self, func: &DynFunc) -> Result<Value, DispatchError> {
        let mut args = Args::default();
        for input in func.inputs() {
            let value = self.resolve(func.name(), input)?;
            args.values.push((input.clone(), value));
        }
        func.invoke(&args)
    }

    fn derive(
        &self,
        tag: TypeTag,
        visiting: &mut Vec<TypeTag>,
    ) -> Result<Option<Value>, DispatchError> {
        if visiting.contains(&tag) || visiting.len() >= MAX_CONVERSION_DEPTH {
            return Ok(None);
        }
        visiting.push(tag);
        let derived = self.derive_with_converters(tag, visiting);
        visiting.pop();
        derived
    }

    fn derive_with_converters(
        &self,
        tag: TypeTag,
        visiting: &mut Vec<TypeTag>,
    ) -> Result<Option<Value>, DispatchError> {
        'converters: for converter in self.converters.iter().filter(|c| c.output() == tag) {
            let mut args = Args::default();
            for input in converter.inputs() {
                let value = match self.lookup(input) {
                    Some(value) => value.clone(),
                    None if input.name().is_none() => match self.derive(input.tag(), visiting)? {
                        Some(value) => value,
                        None => continue 'converters,
                    },
                    None => continue 'converters,
                };
                args.values.push((input.clone(), value));
            }
            tracing::trace!(converter = converter.name(), output = %tag, "applying converter");
            return converter.invoke(&args).map(Some);
        }
        Ok(None)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("bindings", &self.bindings)
            .field("converters", &self.converters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAGS: TypeTag = TypeTag::Custom("flags");
    const VERBOSE: TypeTag = TypeTag::Custom("verbose");

    fn echo_string(name: &str, input: Input) -> DynFunc {
        DynFunc::new(name, TypeTag::Custom("string"), |args| {
            Ok(Value::new(TypeTag::Custom("string"), args.get::<String>(0)?))
        })
        .with_input(input)
    }

    #[test]
    fn named_input_ignores_typed_bindings() {
        let scope =
            Scope::new().with_typed(Value::new(TypeTag::Custom("string"), "typed".to_string()));
        let func = echo_string("f", Input::named("greeting", TypeTag::Custom("string")));

        let err = scope.call(&func).unwrap_err();
        assert!(matches!(err, DispatchError::Unsatisfied { .. }));
    }

    #[test]
    fn named_input_requires_matching_type() {
        let scope = Scope::new().with_named("greeting", Value::exit_code(0));
        let func = echo_string("f", Input::named("greeting", TypeTag::Custom("string")));

        assert!(scope.call(&func).is_err());
    }

    #[test]
    fn first_binding_shadows_later_ones() {
        let scope = Scope::new()
            .with_named(
                "greeting",
                Value::new(TypeTag::Custom("string"), "inner".to_string()),
            )
            .with_named(
                "greeting",
                Value::new(TypeTag::Custom("string"), "outer".to_string()),
            );
        let func = echo_string("f", Input::named("greeting", TypeTag::Custom("string")));

        let out = scope.call(&func).unwrap();
        assert_eq!(out.get::<String>().unwrap(), "inner");
    }

    #[test]
    fn converter_derives_missing_type() {
        let mut scope =
            Scope::new().with_typed(Value::new(TypeTag::CliArgs, vec!["-v".to_string()]));
        scope.add_converters([DynFunc::new("flags_from_args", FLAGS, |args| {
            let raw: Vec<String> = args.typed(TypeTag::CliArgs)?;
            Ok(Value::new(FLAGS, raw.len()))
        })
        .with_input(Input::typed(TypeTag::CliArgs))]);

        let func = DynFunc::new("count", TypeTag::ExitCode, |args| {
            let n: usize = args.typed(FLAGS)?;
            Ok(Value::exit_code(i32::try_from(n).unwrap_or(i32::MAX)))
        })
        .with_input(Input::typed(FLAGS));

        let out = scope.call(&func).unwrap();
        assert_eq!(out.get::<i32>().unwrap(), 1);
    }

    #[test]
    fn converters_compose() {
        let mut scope = Scope::new().with_typed(Value::new(TypeTag::CliArgs, 3usize));
        scope.add_converters([
            DynFunc::new("verbose_from_flags", VERBOSE, |args| {
                Ok(Value::new(VERBOSE, args.get::<usize>(0)? > 2))
            })
            .with_input(Input::typed(FLAGS)),
            DynFunc::new("flags_from_args", FLAGS, |args| {
                Ok(Value::new(FLAGS, args.get::<usize>(0)?))
            })
            .with_input(Input::typed(TypeTag::CliArgs)),
        ]);

        let func = DynFunc::new("check", TypeTag::ExitCode, |args| {
            Ok(Value::exit_code(i32::from(args.get::<bool>(0)?)))
        })
        .with_input(Input::typed(VERBOSE));

        assert_eq!(scope.call(&func).unwrap().get::<i32>().unwrap(), 1);
    }

    #[test]
    fn converter_cycles_terminate() {
        let mut scope = Scope::new();
        scope.add_converters([
            DynFunc::new("a_from_b", FLAGS, |_| Ok(Value::new(FLAGS, 0usize)))
                .with_input(Input::typed(VERBOSE)),
            DynFunc::new("b_from_a", VERBOSE, |_| Ok(Value::new(VERBOSE, false)))
                .with_input(Input::typed(FLAGS)),
        ]);
        let func = DynFunc::new("needs_flags", TypeTag::ExitCode, |_| Ok(Value::exit_code(0)))
            .with_input(Input::typed(FLAGS));

        let err = scope.call(&func).unwrap_err();
        assert!(matches!(err, DispatchError::Unsatisfied { .. }));
    }

    #[test]
    fn unsatisfied_converter_is_skipped_for_next() {
        let mut scope = Scope::new().with_typed(Value::new(TypeTag::JobInfo, "job".to_string()));
        scope.add_converters([
            DynFunc::new("from_args", FLAGS, |_| Ok(Value::new(FLAGS, 1usize)))
                .with_input(Input::typed(TypeTag::CliArgs)),
            DynFunc::new("from_job", FLAGS, |_| Ok(Value::new(FLAGS, 2usize)))
                .with_input(Input::typed(TypeTag::JobInfo)),
        ]);
        let func = DynFunc::new("f", FLAGS, |args| Ok(Value::new(FLAGS, args.get::<usize>(0)?)))
            .with_input(Input::typed(FLAGS));

        assert_eq!(scope.call(&func).unwrap().get::<usize>().unwrap(), 2);
    }

    #[test]
    fn output_type_is_checked() {
        let func = DynFunc::new("lies", TypeTag::ExitCode, |_| {
            Ok(Value::new(FLAGS, 0usize))
        });
        let err = Scope::new().call(&func).unwrap_err();
        assert!(matches!(err, DispatchError::TypeMismatch { .. }));
    }

    #[test]
    fn remote_failure_keeps_status() {
        let err = DispatchError::remote("up", Status::new(14, "unavailable"));
        assert_eq!(err.status().map(|s| s.code), Some(14));
        assert!(err.to_string().contains("unavailable"));
    }
}

//! Explicit declarations of job types, methods, and their policy markers.
//!
//! The catalog is filled once at startup and is read-only afterwards. A
//! declaring process and a worker process each build their own; only the
//! worker needs handlers attached.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use dynjob_core::{
    BoxError, DeclarationError, DeclarationResult, ExecutionError, ExecutionResult,
};

use crate::codec::{ArgType, JobArg};
use crate::descriptor::MethodRef;
use crate::policy::{Policy, PolicySource, ensure_valid_queues};
use crate::resolver::{Arguments, InvocationContext, JobHandler, MethodResolver, ResolvedMethod};

/// A job type and the policies declared on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    name: String,
    parent: Option<String>,
    policies: Vec<Policy>,
}

impl TypeDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            policies: Vec::new(),
        }
    }

    /// Inherit policies and methods from `parent`.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }
}

/// A job method: signature, policy markers, display name, and optionally
/// its implementation.
#[derive(Clone)]
pub struct MethodDecl {
    type_name: String,
    method_name: String,
    parameter_types: Vec<ArgType>,
    policies: Vec<Policy>,
    display_name: Option<String>,
    handler: Option<JobHandler>,
}

impl MethodDecl {
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
            parameter_types: Vec::new(),
            policies: Vec::new(),
            display_name: None,
            handler: None,
        }
    }

    pub fn param(mut self, ty: ArgType) -> Self {
        self.parameter_types.push(ty);
        self
    }

    pub fn param_of<T: JobArg>(self) -> Self {
        self.param(T::arg_type())
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Template such as `"Send digest to {0}"`; placeholders index arguments.
    pub fn display_name(mut self, template: impl Into<String>) -> Self {
        self.display_name = Some(template.into());
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InvocationContext, Arguments) -> Result<JsonValue, BoxError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn method_ref(&self) -> MethodRef {
        MethodRef::new(
            self.type_name.clone(),
            self.method_name.clone(),
            self.parameter_types.clone(),
        )
    }

    fn key(&self) -> MethodKey {
        (
            self.type_name.clone(),
            self.method_name.clone(),
            self.parameter_types.iter().map(ArgType::name).collect(),
        )
    }
}

impl fmt::Debug for MethodDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDecl")
            .field("method", &self.method_ref())
            .field("policies", &self.policies)
            .field("display_name", &self.display_name)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

type MethodKey = (String, String, Vec<String>);

#[derive(Debug)]
enum LineageError {
    Undeclared(String),
    MissingAncestor { type_name: String, ancestor: String },
    Cycle(String),
}

impl fmt::Display for LineageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineageError::Undeclared(name) => write!(f, "type {name} is not declared"),
            LineageError::MissingAncestor { type_name, ancestor } => {
                write!(f, "ancestor {ancestor} of {type_name} is not declared")
            }
            LineageError::Cycle(name) => write!(f, "inheritance cycle through {name}"),
        }
    }
}

/// Registry of job declarations.
///
/// Serves as the [`PolicySource`] on the declaring side and as the
/// [`MethodResolver`] on the worker side.
#[derive(Debug, Default)]
pub struct JobCatalog {
    types: HashMap<String, TypeDecl>,
    methods: HashMap<MethodKey, MethodDecl>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_type(&mut self, decl: TypeDecl) -> DeclarationResult<&mut Self> {
        if decl.name.trim().is_empty() {
            return Err(DeclarationError::invalid_argument("type name is required"));
        }
        ensure_valid_queues(&decl.policies)?;
        if self.types.contains_key(&decl.name) {
            return Err(DeclarationError::invalid_argument(format!(
                "type {} is already declared",
                decl.name
            )));
        }
        self.types.insert(decl.name.clone(), decl);
        Ok(self)
    }

    pub fn declare_method(&mut self, decl: MethodDecl) -> DeclarationResult<&mut Self> {
        if decl.method_name.trim().is_empty() {
            return Err(DeclarationError::invalid_argument("method name is required"));
        }
        ensure_valid_queues(&decl.policies)?;
        if !self.types.contains_key(&decl.type_name) {
            return Err(DeclarationError::invalid_argument(format!(
                "type {} must be declared before its methods",
                decl.type_name
            )));
        }
        let key = decl.key();
        if self.methods.contains_key(&key) {
            return Err(DeclarationError::invalid_argument(format!(
                "method {} is already declared",
                decl.method_ref()
            )));
        }
        self.methods.insert(key, decl);
        Ok(self)
    }

    pub fn type_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// The type followed by its ancestors, nearest first.
    fn lineage<'a>(&'a self, type_name: &'a str) -> Result<Vec<&'a TypeDecl>, LineageError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(type_name);

        while let Some(name) = next {
            if !seen.insert(name) {
                return Err(LineageError::Cycle(name.to_string()));
            }
            let decl = self.types.get(name).ok_or_else(|| {
                if chain.is_empty() {
                    LineageError::Undeclared(name.to_string())
                } else {
                    LineageError::MissingAncestor {
                        type_name: type_name.to_string(),
                        ancestor: name.to_string(),
                    }
                }
            })?;
            chain.push(decl);
            next = decl.parent.as_deref();
        }

        Ok(chain)
    }

    /// Declarations of `method_name(signature)` along the lineage, nearest first.
    fn method_chain<'a>(
        &'a self,
        lineage: &[&'a TypeDecl],
        method_name: &str,
        signature: &[String],
    ) -> Vec<&'a MethodDecl> {
        lineage
            .iter()
            .filter_map(|t| {
                self.methods
                    .get(&(t.name.clone(), method_name.to_string(), signature.to_vec()))
            })
            .collect()
    }

    fn declared_methods<'a>(&'a self, method: &'a MethodRef) -> DeclarationResult<Vec<&'a MethodDecl>> {
        let lineage = self
            .lineage(method.type_name())
            .map_err(|e| DeclarationError::policy_resolution(e.to_string()))?;
        let chain = self.method_chain(&lineage, method.method_name(), &method.signature());
        if chain.is_empty() {
            return Err(DeclarationError::policy_resolution(format!(
                "method {method} is not declared"
            )));
        }
        Ok(chain)
    }
}

impl PolicySource for JobCatalog {
    fn type_policies(&self, type_name: &str) -> DeclarationResult<Vec<Policy>> {
        let lineage = self
            .lineage(type_name)
            .map_err(|e| DeclarationError::policy_resolution(e.to_string()))?;
        Ok(lineage
            .iter()
            .flat_map(|t| t.policies.iter().cloned())
            .collect())
    }

    fn method_policies(&self, method: &MethodRef) -> DeclarationResult<Vec<Policy>> {
        Ok(self
            .declared_methods(method)?
            .iter()
            .flat_map(|m| m.policies.iter().cloned())
            .collect())
    }

    fn display_name(&self, method: &MethodRef) -> DeclarationResult<Option<String>> {
        Ok(self
            .declared_methods(method)?
            .iter()
            .find_map(|m| m.display_name.clone()))
    }
}

impl MethodResolver for JobCatalog {
    fn resolve(
        &self,
        type_name: &str,
        method_name: &str,
        parameter_types: &[String],
    ) -> ExecutionResult<ResolvedMethod> {
        let lineage = self
            .lineage(type_name)
            .map_err(|e| ExecutionError::target_resolution(e.to_string()))?;

        self.method_chain(&lineage, method_name, parameter_types)
            .into_iter()
            .find_map(|decl| {
                decl.handler.as_ref().map(|handler| {
                    ResolvedMethod::new(
                        MethodRef::new(type_name, method_name, decl.parameter_types.clone()),
                        handler.clone(),
                    )
                })
            })
            .ok_or_else(|| {
                ExecutionError::target_resolution(format!(
                    "no implementation of {type_name}.{method_name}({}) in this process",
                    parameter_types.join(", ")
                ))
            })
    }
}

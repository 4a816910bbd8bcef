//! Queries and their builder.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use trellis_foundation::{Error, ErrorContext, Result};

use super::body::PBody;
use super::constraint::ConstraintKind;
use crate::context::{InputKey, MetaContext};
use crate::normalizer::{NormalizationTrace, Normalizer, NormalizerOptions};

/// A parameter of a query signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PParameter {
    name: String,
    key: Option<InputKey>,
}

impl PParameter {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, key: Option<InputKey>) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared unary type, if any.
    #[must_use]
    pub fn key(&self) -> Option<InputKey> {
        self.key
    }
}

/// A normalized, immutable query: a disjunction of bodies over a common
/// parameter list.
pub struct PQuery {
    fqn: String,
    parameters: Vec<PParameter>,
    bodies: Vec<PBody>,
    trace: NormalizationTrace,
}

impl PQuery {
    /// Fully qualified name.
    #[must_use]
    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    /// The signature.
    #[must_use]
    pub fn parameters(&self) -> &[PParameter] {
        &self.parameters
    }

    /// Number of parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Parameter names, in order.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Position of a parameter.
    #[must_use]
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    /// Parameter name to position.
    #[must_use]
    pub fn pos_mapping(&self) -> HashMap<String, usize> {
        self.parameters
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect()
    }

    /// The normalized bodies.
    #[must_use]
    pub fn bodies(&self) -> &[PBody] {
        &self.bodies
    }

    /// What normalization removed and derived.
    #[must_use]
    pub fn trace(&self) -> &NormalizationTrace {
        &self.trace
    }

    /// Queries called from any body, without duplicates, in first-use order.
    #[must_use]
    pub fn direct_callees(&self) -> Vec<Rc<PQuery>> {
        let mut callees: Vec<Rc<PQuery>> = Vec::new();
        for body in &self.bodies {
            for c in body.constraints() {
                if let Some(q) = c.kind().callee() {
                    if !callees.iter().any(|known| Rc::ptr_eq(known, q)) {
                        callees.push(Rc::clone(q));
                    }
                }
            }
        }
        callees
    }
}

impl fmt::Debug for PQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PQuery")
            .field("fqn", &self.fqn)
            .field("parameters", &self.parameters)
            .field("bodies", &self.bodies.len())
            .finish()
    }
}

impl fmt::Display for PQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.fqn)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.name)?;
        }
        write!(f, ")")
    }
}

/// Builds a query body by body, then normalizes it.
///
/// Every body starts with one variable per parameter, exported under the
/// parameter's name and typed by its declared key.
///
/// ```ignore
/// let friends = PQueryBuilder::new("people.friends")
///     .parameter("a", Some(InputKey::Class(person)))
///     .parameter("b", None)
///     .body(|b| {
///         let a = b.variable_by_name("a")?;
///         let bb = b.variable_by_name("b")?;
///         b.type_constraint(InputKey::Feature(knows), &[a, bb])?;
///         Ok(())
///     })
///     .build(&context, &NormalizerOptions::default())?;
/// ```
pub struct PQueryBuilder {
    fqn: String,
    parameters: Vec<PParameter>,
    bodies: Vec<PBody>,
    error: Option<Error>,
}

impl PQueryBuilder {
    /// Starts a query.
    #[must_use]
    pub fn new(fqn: impl Into<String>) -> Self {
        Self {
            fqn: fqn.into(),
            parameters: Vec::new(),
            bodies: Vec::new(),
            error: None,
        }
    }

    /// Appends a parameter. Parameters must be declared before bodies.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, key: Option<InputKey>) -> Self {
        self.parameters.push(PParameter::new(name, key));
        self
    }

    /// Appends a body populated by `f`.
    #[must_use]
    pub fn body(mut self, f: impl FnOnce(&mut PBody) -> Result<()>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let mut body = PBody::new();
        let index = self.bodies.len();
        let outcome = self.export_parameters(&mut body).and_then(|()| f(&mut body));
        match outcome {
            Ok(()) => self.bodies.push(body),
            Err(e) => {
                self.error = Some(e.with_context(
                    ErrorContext::new().with_source(&self.fqn).with_body(index),
                ));
            }
        }
        self
    }

    fn export_parameters(&self, body: &mut PBody) -> Result<()> {
        for (position, p) in self.parameters.iter().enumerate() {
            let v = body.new_variable(&p.name);
            body.add_constraint(ConstraintKind::ExportedParameter {
                variable: v,
                parameter: p.name.clone(),
                position,
            })?;
            if let Some(key) = p.key {
                body.type_constraint(key, &[v])?;
            }
        }
        Ok(())
    }

    /// Normalizes every body and freezes the query.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while populating a body, or a
    /// `Rewriter` error if normalization fails. A failure fails the whole
    /// query.
    pub fn build(self, context: &dyn MetaContext, options: &NormalizerOptions) -> Result<Rc<PQuery>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let normalizer = Normalizer::new(context, options.clone());
        let mut trace = NormalizationTrace::default();
        let mut bodies = self.bodies;
        for (index, body) in bodies.iter_mut().enumerate() {
            normalizer.normalize(&self.fqn, index, body, &mut trace)?;
            body.freeze();
        }
        Ok(Rc::new(PQuery {
            fqn: self.fqn,
            parameters: self.parameters,
            bodies,
            trace,
        }))
    }
}

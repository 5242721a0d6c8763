//! Procedure definitions and the typed builder that produces them.
//!
//! ```ignore
//! let get = procedure::<Ctx>()
//!     .input::<GetPlan>()
//!     .query(|input, ctx| async move { ctx.plans.get(&input.plan_id) });
//! ```
//!
//! Input decoding and [`ValidateInput`] run before the resolver. When either
//! fails the resolver is never invoked.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;

/// Stream of serialized subscription items.
pub type ValueStream = BoxStream<'static, Result<Value, RpcError>>;

/// What a procedure does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    /// Read-only request/response.
    Query,
    /// State-changing request/response.
    Mutation,
    /// Stream of values until completion or cancellation.
    Subscription,
}

impl ProcedureKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic checks run after an input decodes and before the resolver.
///
/// The default accepts everything; structural checks are serde's job.
pub trait ValidateInput {
    /// Return a human-readable reason when the input is unacceptable.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

macro_rules! accept_all {
    ($($t:ty),* $(,)?) => {
        $(impl ValidateInput for $t {})*
    };
}

accept_all!((), bool, String, i32, i64, u32, u64, usize, f64, Value);

impl<T: ValidateInput> ValidateInput for Option<T> {
    fn validate(&self) -> Result<(), String> {
        self.as_ref().map_or(Ok(()), ValidateInput::validate)
    }
}

impl<T: ValidateInput> ValidateInput for Vec<T> {
    fn validate(&self) -> Result<(), String> {
        self.iter().try_for_each(ValidateInput::validate)
    }
}

/// Reject an empty or whitespace-only string field.
pub fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("'{field}' must not be empty"));
    }
    Ok(())
}

/// Reject a string field longer than `max_len` bytes.
pub fn require_max_len(field: &str, value: &str, max_len: usize) -> Result<(), String> {
    if value.len() > max_len {
        return Err(format!(
            "'{field}' exceeds maximum length ({} > {max_len})",
            value.len()
        ));
    }
    Ok(())
}

fn decode<I>(path: &str, input: Value) -> Result<I, RpcError>
where
    I: DeserializeOwned + ValidateInput,
{
    let parsed: I = serde_json::from_value(input).map_err(|e| RpcError::InputValidation {
        path: path.to_owned(),
        message: e.to_string(),
    })?;
    parsed
        .validate()
        .map_err(|message| RpcError::InputValidation {
            path: path.to_owned(),
            message,
        })?;
    Ok(parsed)
}

fn encode<O: Serialize>(path: &str, output: &O) -> Result<Value, RpcError> {
    serde_json::to_value(output).map_err(|e| RpcError::Internal {
        message: format!("failed to serialize output of {path}: {e}"),
    })
}

type CallFn<C> = dyn Fn(&str, Value, C) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync;
type StreamFn<C> =
    dyn Fn(&str, Value, C) -> BoxFuture<'static, Result<ValueStream, RpcError>> + Send + Sync;

enum Resolver<C> {
    Call(Arc<CallFn<C>>),
    Stream(Arc<StreamFn<C>>),
}

impl<C> Clone for Resolver<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Call(f) => Self::Call(Arc::clone(f)),
            Self::Stream(f) => Self::Stream(Arc::clone(f)),
        }
    }
}

/// A type-erased procedure: kind plus validating resolver.
pub struct Procedure<C> {
    kind: ProcedureKind,
    resolver: Resolver<C>,
}

impl<C> Clone for Procedure<C> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            resolver: self.resolver.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Procedure<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure").field("kind", &self.kind).finish()
    }
}

impl<C: Send + 'static> Procedure<C> {
    /// What this procedure does.
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// Run a query or mutation. `path` is used in error messages only.
    pub async fn call(&self, path: &str, input: Value, ctx: C) -> Result<Value, RpcError> {
        match &self.resolver {
            Resolver::Call(f) => f(path, input, ctx).await,
            Resolver::Stream(_) => Err(RpcError::KindMismatch {
                path: path.to_owned(),
                expected: ProcedureKind::Query,
                actual: self.kind,
            }),
        }
    }

    /// Open a subscription.
    pub async fn subscribe(&self, path: &str, input: Value, ctx: C) -> Result<ValueStream, RpcError> {
        match &self.resolver {
            Resolver::Stream(f) => f(path, input, ctx).await,
            Resolver::Call(_) => Err(RpcError::KindMismatch {
                path: path.to_owned(),
                expected: ProcedureKind::Subscription,
                actual: self.kind,
            }),
        }
    }
}

/// Start building a procedure over context type `C`.
pub fn procedure<C>() -> ProcedureBuilder<C, ()> {
    ProcedureBuilder {
        _marker: PhantomData,
    }
}

/// Typed builder; `I` is the input type.
pub struct ProcedureBuilder<C, I> {
    _marker: PhantomData<fn(C, I)>,
}

impl<C, I> ProcedureBuilder<C, I>
where
    C: Send + 'static,
    I: DeserializeOwned + ValidateInput + Send + 'static,
{
    /// Declare the input type.
    pub fn input<J>(self) -> ProcedureBuilder<C, J>
    where
        J: DeserializeOwned + ValidateInput + Send + 'static,
    {
        ProcedureBuilder {
            _marker: PhantomData,
        }
    }

    /// Finish as a query.
    pub fn query<O, F, Fut>(self, resolver: F) -> Procedure<C>
    where
        O: Serialize + Send + 'static,
        F: Fn(I, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        Self::call_procedure(ProcedureKind::Query, resolver)
    }

    /// Finish as a mutation.
    pub fn mutation<O, F, Fut>(self, resolver: F) -> Procedure<C>
    where
        O: Serialize + Send + 'static,
        F: Fn(I, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        Self::call_procedure(ProcedureKind::Mutation, resolver)
    }

    /// Finish as a subscription. The resolver returns the stream to forward;
    /// dropping it is how cancellation reaches the resolver's resources.
    pub fn subscription<O, S, F, Fut>(self, resolver: F) -> Procedure<C>
    where
        O: Serialize + Send + 'static,
        S: Stream<Item = Result<O, RpcError>> + Send + 'static,
        F: Fn(I, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, RpcError>> + Send + 'static,
    {
        let f = move |path: &str, input: Value, ctx: C| -> BoxFuture<'static, Result<ValueStream, RpcError>> {
            let input = match decode::<I>(path, input) {
                Ok(input) => input,
                Err(e) => return future::ready(Err(e)).boxed(),
            };
            let path = path.to_owned();
            let opened = resolver(input, ctx);
            async move {
                let stream = opened.await?;
                let items = stream.map(move |item| item.and_then(|o| encode(&path, &o)));
                Ok(items.boxed())
            }
            .boxed()
        };
        Procedure {
            kind: ProcedureKind::Subscription,
            resolver: Resolver::Stream(Arc::new(f)),
        }
    }

    fn call_procedure<O, F, Fut>(kind: ProcedureKind, resolver: F) -> Procedure<C>
    where
        O: Serialize + Send + 'static,
        F: Fn(I, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        let f = move |path: &str, input: Value, ctx: C| -> BoxFuture<'static, Result<Value, RpcError>> {
            let input = match decode::<I>(path, input) {
                Ok(input) => input,
                Err(e) => return future::ready(Err(e)).boxed(),
            };
            let path = path.to_owned();
            let running = resolver(input, ctx);
            async move { encode(&path, &running.await?) }.boxed()
        };
        Procedure {
            kind,
            resolver: Resolver::Call(Arc::new(f)),
        }
    }
}

use crate::core::{Record, Result, Transform};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Passes every record through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

#[async_trait]
impl Transform for Identity {
    async fn transform(&self, record: Record) -> Result<Option<Record>> {
        Ok(Some(record))
    }
}

/// Adapts a synchronous closure.
pub struct FnTransform<F> {
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(Record) -> Result<Option<Record>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(Record) -> Result<Option<Record>> + Send + Sync,
{
    async fn transform(&self, record: Record) -> Result<Option<Record>> {
        (self.f)(record)
    }
}

/// Runs the closure over a deserialized domain struct. Record metadata
/// survives the round trip.
pub struct TypedTransform<T, F> {
    f: F,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, F> TypedTransform<T, F>
where
    T: DeserializeOwned + Serialize,
    F: Fn(T) -> Result<Option<T>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> Transform for TypedTransform<T, F>
where
    T: DeserializeOwned + Serialize,
    F: Fn(T) -> Result<Option<T>> + Send + Sync,
{
    async fn transform(&self, record: Record) -> Result<Option<Record>> {
        let item: T = record.to_typed()?;
        match (self.f)(item)? {
            Some(out) => {
                let mut mapped = Record::from_typed(&out)?;
                mapped.metadata = record.metadata;
                Ok(Some(mapped))
            }
            None => Ok(None),
        }
    }
}

/// Applies transforms in order; the first filter ends the chain.
pub struct Chain {
    transforms: Vec<Box<dyn Transform>>,
}

impl Chain {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }
}

#[async_trait]
impl Transform for Chain {
    async fn transform(&self, record: Record) -> Result<Option<Record>> {
        let mut current = record;
        for transform in &self.transforms {
            match transform.transform(current).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

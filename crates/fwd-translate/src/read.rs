//! Read transactions: assembling operational data from registered readers.
//!
//! A read of `path` resolves every wildcard in it through the list reader
//! of that list, then reads each concrete instance recursively: the node's
//! own attributes first, then its child readers in dependency order, whose
//! values are merged into the node.
//!
//! One [`ReadTransaction`] shares a [`ReadContext`], so bulk dumps done for
//! one instance are reused by its siblings and released together with the
//! transaction.

use crate::context::ReadContext;
use crate::customizer::Reader;
use crate::error::{CustomizerError, CustomizerResult, ReadError, ReadResult};
use crate::naming::MappingStore;
use crate::registry::ReaderRegistry;
use fwd_types::SchemaPath;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type NodeFuture<'a> = Pin<Box<dyn Future<Output = CustomizerResult<Option<Value>>> + Send + 'a>>;

/// One node returned by a read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadNode {
    pub path: SchemaPath,
    pub value: Value,
}

/// Nodes read plus the subtrees that could not be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOutput {
    pub nodes: Vec<ReadNode>,
    pub failures: Vec<ReadError>,
}

impl ReadOutput {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the value read at `path`, if any.
    pub fn get(&self, path: &SchemaPath) -> Option<&Value> {
        self.nodes.iter().find(|n| n.path == *path).map(|n| &n.value)
    }

    /// Returns the single node of a non-wildcarded read.
    pub fn single(&self) -> Option<&Value> {
        match self.nodes.as_slice() {
            [node] => Some(&node.value),
            _ => None,
        }
    }
}

/// Creates read transactions over the registered readers.
pub struct ReadEngine {
    registry: Arc<ReaderRegistry>,
    mappings: Arc<MappingStore>,
}

impl ReadEngine {
    pub fn new(registry: Arc<ReaderRegistry>, mappings: Arc<MappingStore>) -> Self {
        Self { registry, mappings }
    }

    pub fn registry(&self) -> &Arc<ReaderRegistry> {
        &self.registry
    }

    /// Starts a read transaction with a fresh context.
    pub fn begin(&self) -> ReadTransaction {
        ReadTransaction {
            registry: Arc::clone(&self.registry),
            ctx: ReadContext::new(Arc::clone(&self.mappings)),
        }
    }

    /// Reads `path` in a transaction of its own.
    pub async fn read(&self, path: &SchemaPath) -> ReadResult<ReadOutput> {
        self.begin().read(path).await
    }
}

/// A read transaction. Dropping it releases every cached dump.
pub struct ReadTransaction {
    registry: Arc<ReaderRegistry>,
    ctx: ReadContext,
}

impl ReadTransaction {
    pub fn context(&self) -> &ReadContext {
        &self.ctx
    }

    /// Reads every instance matching `path`.
    ///
    /// A failure of a non-wildcarded read is returned as an error. For
    /// wildcarded reads the instances that failed are reported in
    /// [`ReadOutput::failures`] and the others are still returned.
    pub async fn read(&self, path: &SchemaPath) -> ReadResult<ReadOutput> {
        if self.registry.lookup(path).is_none() {
            return Err(ReadError::NoReader { path: path.clone() });
        }

        let mut output = ReadOutput::default();
        let instances = self.expand(path, &mut output.failures).await?;
        log::debug!("reading {} ({} instances)", path, instances.len());

        for instance in instances {
            let mut failures = Vec::new();
            match self.read_node(&instance, &mut failures).await {
                Ok(Some(value)) => output.nodes.push(ReadNode {
                    path: instance,
                    value,
                }),
                Ok(None) => log::trace!("{} is not present", instance),
                Err(source) if !path.is_wildcarded() => {
                    return Err(ReadError::ReadFailed {
                        path: instance,
                        source,
                    })
                }
                Err(source) => {
                    log::warn!("read of {} failed: {}", instance, source);
                    failures.push(ReadError::ReadFailed {
                        path: instance,
                        source,
                    });
                }
            }
            output.failures.extend(failures);
        }
        Ok(output)
    }

    /// Replaces the wildcards of `path` by the keys of the existing
    /// instances, left to right.
    async fn expand(&self, path: &SchemaPath, failures: &mut Vec<ReadError>) -> ReadResult<Vec<SchemaPath>> {
        let mut pending = vec![path.clone()];
        let mut concrete = Vec::new();
        while let Some(candidate) = pending.pop() {
            let Some(index) = candidate.first_wildcard() else {
                concrete.push(candidate);
                continue;
            };
            let list = candidate.truncate(index + 1);
            let reader = match self.registry.lookup(&list).map(|r| r.handler()) {
                Some(Reader::List(reader)) => reader,
                Some(Reader::Scalar(_)) => {
                    failures.push(ReadError::ReadFailed {
                        path: list.clone(),
                        source: CustomizerError::internal(format!("{} has no list reader", list.schema())),
                    });
                    continue;
                }
                None => return Err(ReadError::NoReader { path: list }),
            };
            let ids = match reader.all_ids(&list, &self.ctx).await {
                Ok(ids) => ids,
                Err(e) if e.is_empty_dump() => Vec::new(),
                Err(source) => {
                    log::warn!("listing {} failed: {}", list, source);
                    failures.push(ReadError::ReadFailed { path: list, source });
                    continue;
                }
            };
            // reversed so the stack pops instances in key order
            for id in ids.into_iter().rev() {
                if let Some(instance) = candidate.with_key(index, id) {
                    pending.push(instance);
                }
            }
        }
        Ok(concrete)
    }

    /// Reads the node at the concrete `path` and its children.
    ///
    /// Returns `None` if the node does not exist. Failures of child subtrees
    /// are collected in `failures` and leave the child out.
    fn read_node<'a>(&'a self, path: &'a SchemaPath, failures: &'a mut Vec<ReadError>) -> NodeFuture<'a> {
        Box::pin(async move {
            let reader = self
                .registry
                .lookup(path)
                .map(|r| r.handler())
                .ok_or_else(|| CustomizerError::internal(format!("no reader for {}", path.schema())))?;

            let mut builder = reader.builder(path);
            match reader.read_current_attributes(path, &mut builder, &self.ctx).await {
                Ok(()) => {}
                Err(e) if e.is_empty_dump() => return Ok(None),
                Err(e) => return Err(e),
            }

            for child in self.registry.children(path) {
                let Some(segment) = child.path().last() else {
                    continue;
                };
                let child_path = path.append(segment.clone());
                match child.handler() {
                    Reader::Scalar(_) => match self.read_node(&child_path, failures).await {
                        Ok(Some(value)) => child.handler().merge(&mut builder, &child_path, value),
                        Ok(None) => {}
                        Err(source) => {
                            log::warn!("read of {} failed: {}", child_path, source);
                            failures.push(ReadError::ReadFailed {
                                path: child_path,
                                source,
                            });
                        }
                    },
                    Reader::List(list) => {
                        let ids = match list.all_ids(&child_path, &self.ctx).await {
                            Ok(ids) => ids,
                            Err(e) if e.is_empty_dump() => Vec::new(),
                            Err(source) => {
                                log::warn!("listing {} failed: {}", child_path, source);
                                failures.push(ReadError::ReadFailed {
                                    path: child_path,
                                    source,
                                });
                                continue;
                            }
                        };
                        let mut values = Vec::with_capacity(ids.len());
                        for id in ids {
                            let Some(element) = child_path.with_key(child_path.len() - 1, id) else {
                                continue;
                            };
                            match self.read_node(&element, failures).await {
                                Ok(Some(value)) => values.push(value),
                                Ok(None) => {}
                                Err(source) => {
                                    log::warn!("read of {} failed: {}", element, source);
                                    failures.push(ReadError::ReadFailed {
                                        path: element,
                                        source,
                                    });
                                }
                            }
                        }
                        list.merge_list(&mut builder, &child_path, values);
                    }
                }
            }

            Ok(reader.is_present(&builder).then_some(builder))
        })
    }
}

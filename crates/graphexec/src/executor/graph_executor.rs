//! Graph execution driver.
//!
//! Two strategies share the same disposal bookkeeping: a static path that
//! walks a cached topological order (control-flow-free subgraphs only), and a
//! dynamic worklist driver that resolves execution order at runtime and is
//! the only place pending op results are awaited.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::error::ExecutorError;
use crate::executor::analysis::{get_execution_subgraph, get_nodes_in_topological_order};
use crate::executor::context::{ExecutionContext, ExecutionContextFrame};
use crate::executor::tensor_map::{node_name_with_context, TensorsMap};
use crate::graph::{is_control_flow, parse_node_name, AttrValue, Graph, Node, NodeId, OpCategory};
use crate::ops::{OpRegistry, OpResult};
use crate::profiling;
use crate::tensor::{shapes_equal_allow_undefined_size, Shape, Tensor};

/// Number of cached compiled orders retained before LRU eviction kicks in.
const DEFAULT_PLAN_CACHE_CAPACITY: usize = 64;

const SEPARATOR: &str = ",";

/// Worklist item: a node tagged with the frame stack that was active when it
/// became ready.
struct NodeWithContext {
    node: NodeId,
    contexts: Vec<ExecutionContextFrame>,
}

pub struct GraphExecutor {
    graph: Arc<Graph>,
    registry: Arc<OpRegistry>,
    compiled_plans: Mutex<LruCache<String, Arc<Vec<NodeId>>>>,
    weight_map: HashMap<String, Vec<Tensor>>,
    weight_ids: HashSet<usize>,
    compile_misses: AtomicUsize,
}

impl GraphExecutor {
    pub fn new(graph: Arc<Graph>, registry: Arc<OpRegistry>) -> Self {
        GraphExecutor {
            graph,
            registry,
            compiled_plans: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_PLAN_CACHE_CAPACITY).unwrap(),
            )),
            weight_map: HashMap::new(),
            weight_ids: HashSet::new(),
            compile_misses: AtomicUsize::new(0),
        }
    }

    /// Installs the stored weight tensors. Their ids join the frozen set and
    /// are never disposed by execution.
    pub fn set_weight_map(&mut self, weight_map: HashMap<String, Vec<Tensor>>) {
        self.weight_ids = weight_map
            .values()
            .flat_map(|tensors| tensors.iter().map(Tensor::id))
            .collect();
        self.weight_map = weight_map;
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// How many compile requests missed the plan cache; lets tests observe
    /// that repeated executions do not recompute the order.
    pub fn compile_misses(&self) -> usize {
        self.compile_misses.load(Ordering::SeqCst)
    }

    /// Releases the memory used by the weight tensors.
    pub fn dispose(&self) {
        for tensors in self.weight_map.values() {
            for tensor in tensors {
                tensor.dispose();
            }
        }
    }

    fn weight_names(&self) -> HashSet<String> {
        self.weight_map.keys().cloned().collect()
    }

    fn compilation_key(input_names: &[String], output_names: &[String]) -> String {
        let mut inputs = input_names.to_vec();
        let mut outputs = output_names.to_vec();
        inputs.sort();
        outputs.sort();
        format!("{}--{}", inputs.join(SEPARATOR), outputs.join(SEPARATOR))
    }

    fn resolve_node(&self, name: &str) -> Result<NodeId, ExecutorError> {
        let (base, _) = parse_node_name(name);
        self.graph.node_by_name(base).ok_or_else(|| {
            ExecutorError::GraphValidation(format!("the node '{name}' is not found in the graph"))
        })
    }

    fn check_inputs(&self, inputs: &HashMap<String, Tensor>) -> Result<(), ExecutorError> {
        let not_in_graph: Vec<&str> = inputs
            .keys()
            .filter(|name| {
                let (base, _) = parse_node_name(name);
                self.graph.node_by_name(base).is_none()
            })
            .map(String::as_str)
            .collect();
        if !not_in_graph.is_empty() {
            return Err(ExecutorError::GraphValidation(format!(
                "the dict provided in execute(dict) has keys [{}] that are \
                 not part of the graph",
                not_in_graph.join(SEPARATOR)
            )));
        }
        Ok(())
    }

    /// Validates supplied tensors against statically declared placeholder
    /// signatures, before any node runs.
    fn check_input_shape_and_type(
        &self,
        inputs: &HashMap<String, Tensor>,
    ) -> Result<(), ExecutorError> {
        for (name, tensor) in inputs {
            let (base, _) = parse_node_name(name);
            let id = self.resolve_node(base)?;
            let node = self.graph.node(id);
            if let Some(AttrValue::Shape(declared)) = node.attr("shape") {
                if !shapes_equal_allow_undefined_size(declared, tensor.shape().dims()) {
                    return Err(ExecutorError::ShapeMismatch(format!(
                        "the shape of dict['{}'] provided in execute(dict) \
                         must be {}, but was {}",
                        node.name,
                        Shape::new(declared.clone()),
                        tensor.shape()
                    )));
                }
            }
            if let Some(AttrValue::DType(declared)) = node.attr("dtype") {
                if tensor.dtype() != *declared {
                    return Err(ExecutorError::DtypeMismatch(format!(
                        "the dtype of dict['{}'] provided in execute(dict) \
                         must be {declared}, but was {}",
                        node.name,
                        tensor.dtype()
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_outputs(&self, outputs: &[&str]) -> Result<(), ExecutorError> {
        for name in outputs {
            let (base, _) = parse_node_name(name);
            if self.graph.node_by_name(base).is_none() {
                return Err(ExecutorError::GraphValidation(format!(
                    "the output '{name}' is not found in the graph"
                )));
            }
        }
        Ok(())
    }

    /// Compiles (or fetches from cache) the minimal ordered node set needed
    /// to produce `output_names` from `input_names`.
    pub fn compile(
        &self,
        input_names: &[&str],
        output_names: &[&str],
    ) -> Result<Arc<Vec<NodeId>>, ExecutorError> {
        self.check_outputs(output_names)?;
        let inputs: Vec<String> = input_names
            .iter()
            .map(|name| parse_node_name(name).0.to_string())
            .collect();
        let outputs: Vec<String> = output_names
            .iter()
            .map(|name| parse_node_name(name).0.to_string())
            .collect();
        let output_ids = outputs
            .iter()
            .map(|name| self.resolve_node(name))
            .collect::<Result<Vec<_>, _>>()?;
        let key = Self::compilation_key(&inputs, &outputs);
        self.compiled_order(key, &inputs.into_iter().collect(), &output_ids)
    }

    fn compiled_order(
        &self,
        key: String,
        input_names: &HashSet<String>,
        output_ids: &[NodeId],
    ) -> Result<Arc<Vec<NodeId>>, ExecutorError> {
        {
            let mut cache = self.compiled_plans.lock().expect("plan cache poisoned");
            if let Some(plan) = cache.get(&key) {
                profiling::cache_event("plan_cache_hit");
                return Ok(Arc::clone(plan));
            }
        }
        profiling::cache_event("plan_cache_miss");
        self.compile_misses.fetch_add(1, Ordering::SeqCst);
        let plan = self.compile_internal(input_names, output_ids)?;
        let mut cache = self.compiled_plans.lock().expect("plan cache poisoned");
        if cache.push(key, Arc::clone(&plan)).is_some() {
            profiling::cache_event("plan_cache_evict");
        }
        Ok(plan)
    }

    fn compile_internal(
        &self,
        input_names: &HashSet<String>,
        output_ids: &[NodeId],
    ) -> Result<Arc<Vec<NodeId>>, ExecutorError> {
        let weight_names = self.weight_names();
        let input_ids: Vec<NodeId> = input_names
            .iter()
            .filter_map(|name| self.graph.node_by_name(name))
            .collect();
        let info = get_execution_subgraph(
            &self.graph,
            input_names,
            &weight_names,
            &input_ids,
            output_ids,
        );

        if let Some(dynamic) = info.dynamic_node {
            let node = self.graph.node(dynamic);
            return Err(ExecutorError::DynamicExecutionRequired {
                node: node.name.clone(),
                op: node.op.clone(),
                sync_inputs: info.sync_inputs.join(SEPARATOR),
            });
        }
        if !info.missing_inputs.is_empty() {
            let mut inputs: Vec<&str> = input_names.iter().map(String::as_str).collect();
            inputs.sort_unstable();
            return Err(ExecutorError::Compile {
                inputs: inputs.join(SEPARATOR),
                outputs: output_ids
                    .iter()
                    .map(|id| self.graph.node(*id).name.as_str())
                    .collect::<Vec<_>>()
                    .join(SEPARATOR),
                missing_inputs: info.missing_inputs.join(SEPARATOR),
            });
        }

        Ok(Arc::new(get_nodes_in_topological_order(&self.graph, &info)))
    }

    fn seed_tensor_map(&self, inputs: &HashMap<String, Tensor>) -> TensorsMap {
        let mut map = TensorsMap::new();
        for (name, tensors) in &self.weight_map {
            map.insert(name.clone(), tensors.iter().cloned().map(Some).collect());
        }
        for (name, tensor) in inputs {
            map.insert_named(name, tensor.clone());
        }
        map
    }

    fn frozen_tensor_ids(map: &TensorsMap) -> HashSet<usize> {
        map.values()
            .flat_map(|outputs| outputs.iter().flatten().map(Tensor::id))
            .collect()
    }

    fn collect_outputs(
        &self,
        names: &[&str],
        tensors_map: &TensorsMap,
        context: &ExecutionContext,
    ) -> Result<Vec<Tensor>, ExecutorError> {
        names
            .iter()
            .map(|name| {
                tensors_map.get_tensor(name, context).ok_or_else(|| {
                    ExecutorError::Internal(format!(
                        "the output '{name}' was not produced by the execution"
                    ))
                })
            })
            .collect()
    }

    /// Executes the inference for the given input tensors, synchronously.
    ///
    /// Fails with [`ExecutorError::DynamicExecutionRequired`] if the compiled
    /// subgraph contains control-flow or dynamic-shape nodes, and with
    /// [`ExecutorError::AsyncResultMisuse`] if a dispatcher unexpectedly
    /// returns a pending result.
    pub fn execute(
        &self,
        inputs: &HashMap<String, Tensor>,
        output_names: &[&str],
    ) -> Result<Vec<Tensor>, ExecutorError> {
        self.check_inputs(inputs)?;
        self.check_input_shape_and_type(inputs)?;
        self.check_outputs(output_names)?;

        let input_names: Vec<String> = inputs
            .keys()
            .map(|name| parse_node_name(name).0.to_string())
            .collect();
        let output_node_names: Vec<String> = output_names
            .iter()
            .map(|name| parse_node_name(name).0.to_string())
            .collect();
        let output_ids = output_node_names
            .iter()
            .map(|name| self.resolve_node(name))
            .collect::<Result<Vec<_>, _>>()?;

        let key = Self::compilation_key(&input_names, &output_node_names);
        let input_name_set: HashSet<String> = input_names.into_iter().collect();
        let plan = self.compiled_order(key, &input_name_set, &output_ids)?;

        let mut context = ExecutionContext::new();
        let mut tensors_map = self.seed_tensor_map(inputs);
        let frozen = Self::frozen_tensor_ids(&tensors_map);
        let mut consumer_counts: HashMap<usize, usize> = HashMap::new();

        for id in plan.iter() {
            let node = self.graph.node(*id);
            if tensors_map.contains_key(&node.name) {
                continue;
            }
            match self
                .registry
                .dispatch(node, &self.graph, &tensors_map, &mut context)?
            {
                OpResult::Ready(outputs) => {
                    tensors_map.insert(node.name.clone(), outputs);
                    self.check_tensor_for_disposal(
                        &node.name,
                        node,
                        &tensors_map,
                        &context,
                        &frozen,
                        &output_node_names,
                        &mut consumer_counts,
                    );
                }
                OpResult::Pending(_) => {
                    return Err(ExecutorError::AsyncResultMisuse {
                        op: node.op.clone(),
                    })
                }
            }
        }

        let results = self.collect_outputs(output_names, &tensors_map, &context)?;
        let mut keep_ids = frozen;
        keep_ids.extend(results.iter().map(Tensor::id));
        // Sweep any intermediates the counters did not reach (consumers
        // outside the compiled subgraph never decrement them).
        for outputs in tensors_map.values() {
            for tensor in outputs.iter().flatten() {
                if !tensor.is_disposed() && !keep_ids.contains(&tensor.id()) {
                    tensor.dispose();
                }
            }
        }
        context.dispose(&keep_ids);
        Ok(results)
    }

    /// Executes the inference for the given input tensors, resolving the
    /// execution order at runtime. Required whenever the graph contains
    /// control-flow or dynamic-shape nodes.
    pub async fn execute_async(
        &self,
        inputs: &HashMap<String, Tensor>,
        output_names: &[&str],
    ) -> Result<Vec<Tensor>, ExecutorError> {
        self.check_inputs(inputs)?;
        self.check_input_shape_and_type(inputs)?;
        self.check_outputs(output_names)?;

        let mut context = ExecutionContext::new();
        let tensors_map = self
            .execute_with_control_flow(inputs, &mut context, output_names)
            .await?;
        let results = self.collect_outputs(output_names, &tensors_map, &context)?;

        let mut keep_ids: HashSet<usize> = results.iter().map(Tensor::id).collect();
        keep_ids.extend(inputs.values().map(Tensor::id));
        keep_ids.extend(self.weight_ids.iter().copied());
        for outputs in tensors_map.values() {
            for tensor in outputs.iter().flatten() {
                if !tensor.is_disposed() && !keep_ids.contains(&tensor.id()) {
                    tensor.dispose();
                }
            }
        }
        context.dispose(&keep_ids);
        Ok(results)
    }

    async fn execute_with_control_flow(
        &self,
        inputs: &HashMap<String, Tensor>,
        context: &mut ExecutionContext,
        output_names: &[&str],
    ) -> Result<TensorsMap, ExecutorError> {
        let input_name_set: HashSet<String> = inputs
            .keys()
            .map(|name| parse_node_name(name).0.to_string())
            .collect();
        let input_ids: Vec<NodeId> = input_name_set
            .iter()
            .filter_map(|name| self.graph.node_by_name(name))
            .collect();
        let output_node_names: Vec<String> = output_names
            .iter()
            .map(|name| parse_node_name(name).0.to_string())
            .collect();
        let output_ids = output_node_names
            .iter()
            .map(|name| self.resolve_node(name))
            .collect::<Result<Vec<_>, _>>()?;
        let weight_names = self.weight_names();
        let info = get_execution_subgraph(
            &self.graph,
            &input_name_set,
            &weight_names,
            &input_ids,
            &output_ids,
        );

        let mut tensors_map = self.seed_tensor_map(inputs);
        let frozen = Self::frozen_tensor_ids(&tensors_map);
        let mut consumer_counts: HashMap<usize, usize> = HashMap::new();
        let mut added: HashSet<String> = HashSet::new();

        let mut stack: Vec<NodeWithContext> = input_ids
            .iter()
            .chain(self.graph.weights())
            .map(|id| NodeWithContext {
                node: *id,
                contexts: context.snapshot(),
            })
            .collect();

        while !stack.is_empty() {
            let mut pendings = Vec::new();
            while let Some(item) = stack.pop() {
                context.restore(item.contexts);
                let node = self.graph.node(item.node);

                // Seeded inputs and weights (and anything else already
                // materialized under this context) only propagate readiness.
                let node_key =
                    node_name_with_context(&node.name, &context.current_context_id());
                if tensors_map.contains_key(&node_key) {
                    self.process_child_nodes(
                        node,
                        &mut stack,
                        context,
                        &tensors_map,
                        &mut added,
                        &info.used_nodes,
                    );
                    continue;
                }

                // The value of an Enter op with is_constant set is stored in
                // the enclosing scope, so it stays visible as a constant for
                // every iteration of the loop.
                let constant_key = if node.op == "Enter" && super::attr_is_constant(node) {
                    Some(node_name_with_context(
                        &node.name,
                        &context.current_context_id(),
                    ))
                } else {
                    None
                };

                let result =
                    self.registry
                        .dispatch(node, &self.graph, &tensors_map, context)?;
                let key = constant_key.unwrap_or_else(|| {
                    node_name_with_context(&node.name, &context.current_context_id())
                });
                match result {
                    OpResult::Ready(outputs) => {
                        tensors_map.insert(key.clone(), outputs);
                        self.check_tensor_for_disposal(
                            &key,
                            node,
                            &tensors_map,
                            context,
                            &frozen,
                            &output_node_names,
                            &mut consumer_counts,
                        );
                        self.process_child_nodes(
                            node,
                            &mut stack,
                            context,
                            &tensors_map,
                            &mut added,
                            &info.used_nodes,
                        );
                    }
                    OpResult::Pending(future) => {
                        pendings.push((key, item.node, context.snapshot(), future));
                    }
                }
            }

            // The single suspension point: every pending result is awaited
            // before its children are pushed for the next round.
            let mut metadata = Vec::with_capacity(pendings.len());
            let mut pending_futures = Vec::with_capacity(pendings.len());
            for (key, node_id, contexts, future) in pendings {
                metadata.push((key, node_id, contexts));
                pending_futures.push(future);
            }
            let resolved = futures::future::join_all(pending_futures).await;
            for ((key, node_id, contexts), result) in metadata.into_iter().zip(resolved) {
                let outputs = result?;
                context.restore(contexts);
                let node = self.graph.node(node_id);
                tensors_map.insert(key.clone(), outputs);
                self.check_tensor_for_disposal(
                    &key,
                    node,
                    &tensors_map,
                    context,
                    &frozen,
                    &output_node_names,
                    &mut consumer_counts,
                );
                self.process_child_nodes(
                    node,
                    &mut stack,
                    context,
                    &tensors_map,
                    &mut added,
                    &info.used_nodes,
                );
            }
        }

        let missing_outputs: Vec<&str> = output_ids
            .iter()
            .map(|id| self.graph.node(*id))
            .filter(|node| {
                !is_control_flow(node) && tensors_map.get_tensor(&node.name, context).is_none()
            })
            .map(|node| node.name.as_str())
            .collect();
        if !missing_outputs.is_empty() {
            let alternative = if info.dynamic_node.is_some() {
                format!(
                    "; alternatively, to avoid the dynamic ops, use execute \
                     and specify the inputs [{}]",
                    info.sync_inputs.join(SEPARATOR)
                )
            } else {
                String::new()
            };
            let mut input_list: Vec<&str> = input_name_set.iter().map(String::as_str).collect();
            input_list.sort_unstable();
            return Err(ExecutorError::MissingOutputs {
                inputs: input_list.join(SEPARATOR),
                outputs: missing_outputs.join(SEPARATOR),
                missing_inputs: info.missing_inputs.join(SEPARATOR),
                alternative,
            });
        }

        Ok(tensors_map)
    }

    /// Pushes every not-yet-added child whose inputs are available under the
    /// current context. `Merge` nodes are pushable as soon as any single
    /// input is available; all other nodes need every input.
    fn process_child_nodes(
        &self,
        node: &Node,
        stack: &mut Vec<NodeWithContext>,
        context: &ExecutionContext,
        tensors_map: &TensorsMap,
        added: &mut HashSet<String>,
        used_nodes: &HashSet<String>,
    ) {
        for child_id in &node.children {
            let child = self.graph.node(*child_id);
            let child_key =
                node_name_with_context(&child.name, &context.current_context_id());
            if added.contains(&child_key) || !used_nodes.contains(&child.name) {
                continue;
            }
            let ready = if child.op == "Merge" {
                child
                    .input_names
                    .iter()
                    .any(|name| tensors_map.get_tensor(name, context).is_some())
            } else {
                child
                    .input_names
                    .iter()
                    .all(|name| tensors_map.get_tensor(name, context).is_some())
            };
            if ready {
                added.insert(child_key);
                stack.push(NodeWithContext {
                    node: *child_id,
                    contexts: context.snapshot(),
                });
            }
        }
    }

    /// Reference-counted disposal of intermediates, shared by both paths.
    ///
    /// Control-flow nodes and requested outputs are skipped; their
    /// dependencies are too tricky to track positionally. Each produced
    /// tensor is credited with the node's static child count, and each
    /// consumed input tensor is debited; a tensor whose count reaches zero is
    /// disposed on the spot. Tensors with no tracked count (caller inputs
    /// and weights) are left untouched.
    #[allow(clippy::too_many_arguments)]
    fn check_tensor_for_disposal(
        &self,
        node_key: &str,
        node: &Node,
        tensors_map: &TensorsMap,
        context: &ExecutionContext,
        frozen: &HashSet<usize>,
        output_names: &[String],
        consumer_counts: &mut HashMap<usize, usize>,
    ) {
        if node.category == OpCategory::Control
            || output_names.iter().any(|name| name == node_key)
        {
            return;
        }

        if let Some(outputs) = tensors_map.get(node_key) {
            for tensor in outputs.iter().flatten() {
                *consumer_counts.entry(tensor.id()).or_insert(0) += node.children.len();
            }
        }
        for input_id in &node.inputs {
            let input = self.graph.node(*input_id);
            if input.category == OpCategory::Control {
                continue;
            }
            let Some(tensors) = tensors_map.get_for_current_context(&input.name, context) else {
                continue;
            };
            for tensor in tensors.iter().flatten() {
                if frozen.contains(&tensor.id()) {
                    continue;
                }
                match consumer_counts.get(&tensor.id()).copied() {
                    Some(1) => {
                        tensor.dispose();
                        consumer_counts.remove(&tensor.id());
                    }
                    Some(count) if count > 1 => {
                        consumer_counts.insert(tensor.id(), count - 1);
                    }
                    // Only intermediates have counts; inputs and weights
                    // do not.
                    _ => {}
                }
            }
        }
    }
}

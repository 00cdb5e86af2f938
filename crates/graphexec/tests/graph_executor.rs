//! End-to-end tests for the synchronous execution path: validation, plan
//! caching, weight handling and custom op registration.

use std::collections::HashMap;
use std::sync::Arc;

use graphexec::executor::NodeOutputs;
use graphexec::graph::AttrValue;
use graphexec::ops::OpResult;
use graphexec::{
    DType, ExecutionContext, ExecutorError, Graph, GraphBuilder, GraphExecutor, OpExecutor,
    OpRegistry, Shape, Tensor, TensorsMap,
};

fn executor_for(graph: Graph) -> GraphExecutor {
    GraphExecutor::new(Arc::new(graph), Arc::new(OpRegistry::with_builtins()))
}

fn diamond() -> Graph {
    let mut builder = GraphBuilder::new();
    builder
        .op_with_attrs(
            "x",
            "Placeholder",
            &[],
            vec![
                ("dtype", AttrValue::DType(DType::F32)),
                ("shape", AttrValue::Shape(vec![-1])),
            ],
        )
        .op("a", "Relu", &["x"])
        .op("b", "Neg", &["x"])
        .op("c", "Add", &["a", "b"]);
    builder.build().unwrap()
}

fn feed(name: &str, tensor: Tensor) -> HashMap<String, Tensor> {
    HashMap::from([(name.to_string(), tensor)])
}

#[test]
fn executes_a_diamond_graph() -> anyhow::Result<()> {
    let executor = executor_for(diamond());
    let x = Tensor::from_f32(Shape::new(vec![3]), vec![1.0, -2.0, 3.0])?;
    let results = executor.execute(&feed("x", x), &["c"])?;
    assert_eq!(results.len(), 1);
    // relu(x) + neg(x)
    assert_eq!(results[0].f32_data()?, vec![0.0, 2.0, 0.0]);
    Ok(())
}

#[test]
fn repeated_executions_reuse_the_compiled_plan() -> anyhow::Result<()> {
    let executor = executor_for(diamond());
    for _ in 0..3 {
        let x = Tensor::from_f32(Shape::new(vec![2]), vec![1.0, 2.0])?;
        executor.execute(&feed("x", x), &["c"])?;
    }
    assert_eq!(executor.compile_misses(), 1);

    // A different output set is a different plan.
    let x = Tensor::from_f32(Shape::new(vec![2]), vec![1.0, 2.0])?;
    executor.execute(&feed("x", x), &["a"])?;
    assert_eq!(executor.compile_misses(), 2);
    Ok(())
}

#[test]
fn weights_are_fed_from_the_weight_map() -> anyhow::Result<()> {
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("w", "Const", &[])
        .weight("w")
        .op("sum", "Add", &["x", "w"]);
    let graph = builder.build()?;

    let mut executor = executor_for(graph);
    executor.set_weight_map(HashMap::from([(
        "w".to_string(),
        vec![Tensor::from_f32(Shape::new(vec![2]), vec![10.0, 20.0])?],
    )]));

    let x = Tensor::from_f32(Shape::new(vec![2]), vec![1.0, 2.0])?;
    let results = executor.execute(&feed("x", x), &["sum"])?;
    assert_eq!(results[0].f32_data()?, vec![11.0, 22.0]);
    executor.dispose();
    Ok(())
}

#[test]
fn placeholder_with_default_falls_back_to_its_input() -> anyhow::Result<()> {
    let mut builder = GraphBuilder::new();
    builder
        .op("d", "Const", &[])
        .weight("d")
        .op("p", "PlaceholderWithDefault", &["d"])
        .op("out", "Relu", &["p"]);
    let graph = builder.build()?;

    let mut executor = executor_for(graph);
    executor.set_weight_map(HashMap::from([(
        "d".to_string(),
        vec![Tensor::from_f32(Shape::new(vec![2]), vec![-1.0, 4.0])?],
    )]));

    // Not supplied: the stored default flows through.
    let results = executor.execute(&HashMap::new(), &["out"])?;
    assert_eq!(results[0].f32_data()?, vec![0.0, 4.0]);

    // Supplied: the caller's value wins.
    let p = Tensor::from_f32(Shape::new(vec![2]), vec![2.0, -3.0])?;
    let results = executor.execute(&feed("p", p), &["out"])?;
    assert_eq!(results[0].f32_data()?, vec![2.0, 0.0]);
    executor.dispose();
    Ok(())
}

#[test]
fn shape_op_reports_dimensions() -> anyhow::Result<()> {
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("s", "Shape", &["x"]);
    let executor = executor_for(builder.build()?);

    let x = Tensor::from_f32(Shape::new(vec![2, 3]), vec![0.0; 6])?;
    let results = executor.execute(&feed("x", x), &["s"])?;
    assert_eq!(results[0].dtype(), DType::I32);
    assert_eq!(results[0].i32_data()?, vec![2, 3]);
    Ok(())
}

#[test]
fn unreachable_outputs_fail_to_compile() {
    let executor = executor_for(diamond());
    let err = executor.execute(&HashMap::new(), &["c"]).unwrap_err();
    match err {
        ExecutorError::Compile { missing_inputs, .. } => {
            assert!(missing_inputs.contains('x'), "got: {missing_inputs}");
        }
        other => panic!("expected a compile error, got: {other}"),
    }
}

#[test]
fn unknown_input_names_are_rejected() {
    let executor = executor_for(diamond());
    let err = executor
        .execute(&feed("nope", Tensor::scalar_f32(1.0)), &["c"])
        .unwrap_err();
    assert!(matches!(err, ExecutorError::GraphValidation(_)));
}

#[test]
fn unknown_output_names_are_rejected() {
    let executor = executor_for(diamond());
    let x = Tensor::from_f32(Shape::new(vec![1]), vec![1.0]).unwrap();
    let err = executor.execute(&feed("x", x), &["ghost"]).unwrap_err();
    assert!(matches!(err, ExecutorError::GraphValidation(_)));
}

#[test]
fn declared_placeholder_signature_is_enforced() {
    let executor = executor_for(diamond());

    // Declared shape is [-1]: any length passes, but a scalar's rank does not.
    let err = executor
        .execute(&feed("x", Tensor::scalar_f32(1.0)), &["c"])
        .unwrap_err();
    assert!(matches!(err, ExecutorError::ShapeMismatch(_)));

    let x = Tensor::from_i32(Shape::new(vec![2]), vec![1, 2]).unwrap();
    let err = executor.execute(&feed("x", x), &["c"]).unwrap_err();
    assert!(matches!(err, ExecutorError::DtypeMismatch(_)));
}

#[test]
fn control_flow_graphs_require_the_dynamic_path() {
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("pred", "Placeholder", &[])
        .op("sw", "Switch", &["x", "pred"])
        .op("out", "Relu", &["sw:1"]);
    let executor = executor_for(builder.build().unwrap());

    let inputs = HashMap::from([
        ("x".to_string(), Tensor::scalar_f32(1.0)),
        ("pred".to_string(), Tensor::scalar_bool(true)),
    ]);
    let err = executor.execute(&inputs, &["out"]).unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::DynamicExecutionRequired { .. }
    ));
}

/// Doubles its single input; pending when constructed with `pending`.
struct DoubleOp {
    pending: bool,
}

impl OpExecutor for DoubleOp {
    fn dispatch(
        &self,
        node: &graphexec::Node,
        _graph: &Graph,
        tensors: &TensorsMap,
        context: &mut ExecutionContext,
    ) -> Result<OpResult, ExecutorError> {
        let input = tensors
            .get_tensor(&node.input_names[0], context)
            .ok_or_else(|| ExecutorError::Internal("input unavailable".to_string()))?;
        let data: Vec<f32> = input.f32_data()?.into_iter().map(|v| v * 2.0).collect();
        let result = Tensor::from_f32(input.shape().clone(), data)?;
        let mut outputs = NodeOutputs::new();
        outputs.push(Some(result));
        if self.pending {
            Ok(OpResult::pending_ready(outputs))
        } else {
            Ok(OpResult::ready(outputs))
        }
    }
}

fn custom_graph() -> Graph {
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("twice", "Double", &["x"]);
    builder.build().unwrap()
}

#[test]
fn custom_ops_dispatch_through_a_registered_executor() -> anyhow::Result<()> {
    let mut registry = OpRegistry::with_builtins();
    registry.register(
        graphexec::OpCategory::Custom,
        Arc::new(DoubleOp { pending: false }),
    );
    let executor = GraphExecutor::new(Arc::new(custom_graph()), Arc::new(registry));

    let x = Tensor::from_f32(Shape::new(vec![2]), vec![1.5, 2.0])?;
    let results = executor.execute(&feed("x", x), &["twice"])?;
    assert_eq!(results[0].f32_data()?, vec![3.0, 4.0]);
    Ok(())
}

#[test]
fn unregistered_categories_are_unimplemented() {
    let executor = GraphExecutor::new(
        Arc::new(custom_graph()),
        Arc::new(OpRegistry::with_builtins()),
    );
    let x = Tensor::from_f32(Shape::new(vec![1]), vec![1.0]).unwrap();
    let err = executor.execute(&feed("x", x), &["twice"]).unwrap_err();
    assert!(matches!(err, ExecutorError::UnimplementedOp { .. }));
}

#[test]
fn pending_results_abort_the_synchronous_path() {
    let mut registry = OpRegistry::with_builtins();
    registry.register(
        graphexec::OpCategory::Custom,
        Arc::new(DoubleOp { pending: true }),
    );
    let executor = GraphExecutor::new(Arc::new(custom_graph()), Arc::new(registry));

    let x = Tensor::from_f32(Shape::new(vec![1]), vec![1.0]).unwrap();
    let err = executor.execute(&feed("x", x), &["twice"]).unwrap_err();
    assert!(matches!(err, ExecutorError::AsyncResultMisuse { .. }));
}

//! Dynamic-path tests: Switch/Merge branching, while loops built from the
//! Enter/Merge/Switch/NextIteration/Exit quintet, and value-dependent ops.

use std::collections::HashMap;
use std::sync::Arc;

use futures::executor::block_on;
use graphexec::graph::AttrValue;
use graphexec::{
    DType, ExecutorError, Graph, GraphBuilder, GraphExecutor, OpRegistry, Shape, Tensor,
};

fn executor_for(graph: Graph) -> GraphExecutor {
    GraphExecutor::new(Arc::new(graph), Arc::new(OpRegistry::with_builtins()))
}

fn switch_graph() -> Graph {
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("pred", "Placeholder", &[])
        .op("sw", "Switch", &["x", "pred"])
        // Output 0 is the false branch, output 1 the true branch.
        .op("neg", "Neg", &["sw"])
        .op("pos", "Relu", &["sw:1"]);
    builder.build().unwrap()
}

fn switch_inputs(pred: bool) -> HashMap<String, Tensor> {
    HashMap::from([
        (
            "x".to_string(),
            Tensor::from_f32(Shape::new(vec![2]), vec![3.0, -4.0]).unwrap(),
        ),
        ("pred".to_string(), Tensor::scalar_bool(pred)),
    ])
}

#[test]
fn switch_routes_to_the_true_branch() -> anyhow::Result<()> {
    let executor = executor_for(switch_graph());
    let results = block_on(executor.execute_async(&switch_inputs(true), &["pos"]))?;
    assert_eq!(results[0].f32_data()?, vec![3.0, 0.0]);
    Ok(())
}

#[test]
fn switch_routes_to_the_false_branch() -> anyhow::Result<()> {
    let executor = executor_for(switch_graph());
    let results = block_on(executor.execute_async(&switch_inputs(false), &["neg"]))?;
    assert_eq!(results[0].f32_data()?, vec![-3.0, 4.0]);
    Ok(())
}

#[test]
fn requesting_the_dead_branch_reports_missing_outputs() {
    let executor = executor_for(switch_graph());
    let err = block_on(executor.execute_async(&switch_inputs(true), &["neg"])).unwrap_err();
    match err {
        ExecutorError::MissingOutputs { outputs, .. } => {
            assert!(outputs.contains("neg"), "got: {outputs}");
        }
        other => panic!("expected missing outputs, got: {other}"),
    }
}

#[test]
fn merge_takes_the_first_available_input() -> anyhow::Result<()> {
    // `y` is never supplied, so only the `a` side of the merge ever fires.
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("y", "Placeholder", &[])
        .op("a", "Relu", &["x"])
        .op("b", "Relu", &["y"])
        .op("m", "Merge", &["a", "b"]);
    let executor = executor_for(builder.build()?);

    let inputs = HashMap::from([(
        "x".to_string(),
        Tensor::from_f32(Shape::new(vec![2]), vec![-1.0, 5.0])?,
    )]);
    let results = block_on(executor.execute_async(&inputs, &["m"]))?;
    assert_eq!(results[0].f32_data()?, vec![0.0, 5.0]);
    Ok(())
}

/// Counts up from the fed value: `while (i < limit) i += 1`.
fn while_loop_graph() -> Graph {
    let frame = ("frame_name", AttrValue::Str("loop".to_string()));
    let constant = ("is_constant", AttrValue::Bool(true));
    let mut builder = GraphBuilder::new();
    builder
        .op("i", "Placeholder", &[])
        .op("limit", "Const", &[])
        .weight("limit")
        .op("one", "Const", &[])
        .weight("one")
        .op_with_attrs("enter_i", "Enter", &["i"], vec![frame.clone()])
        .op_with_attrs(
            "enter_limit",
            "Enter",
            &["limit"],
            vec![frame.clone(), constant.clone()],
        )
        .op_with_attrs("enter_one", "Enter", &["one"], vec![frame, constant])
        .op("merge", "Merge", &["enter_i", "next"])
        .op("less", "Less", &["merge", "enter_limit"])
        .op("cond", "LoopCond", &["less"])
        .op("sw", "Switch", &["merge", "cond"])
        .op("exit", "Exit", &["sw"])
        .op("body", "Add", &["sw:1", "enter_one"])
        .op("next", "NextIteration", &["body"]);
    builder.build().unwrap()
}

fn while_loop_executor(limit: f32) -> GraphExecutor {
    let mut executor = executor_for(while_loop_graph());
    executor.set_weight_map(HashMap::from([
        ("limit".to_string(), vec![Tensor::scalar_f32(limit)]),
        ("one".to_string(), vec![Tensor::scalar_f32(1.0)]),
    ]));
    executor
}

#[test]
fn while_loop_iterates_until_the_condition_fails() -> anyhow::Result<()> {
    let executor = while_loop_executor(5.0);
    let inputs = HashMap::from([("i".to_string(), Tensor::scalar_f32(0.0))]);
    let results = block_on(executor.execute_async(&inputs, &["exit"]))?;
    assert_eq!(results[0].f32_data()?, vec![5.0]);
    executor.dispose();
    Ok(())
}

#[test]
fn while_loop_with_a_false_condition_never_enters_the_body() -> anyhow::Result<()> {
    let executor = while_loop_executor(5.0);
    let inputs = HashMap::from([("i".to_string(), Tensor::scalar_f32(7.0))]);
    let results = block_on(executor.execute_async(&inputs, &["exit"]))?;
    assert_eq!(results[0].f32_data()?, vec![7.0]);
    executor.dispose();
    Ok(())
}

fn where_graph() -> Graph {
    let mut builder = GraphBuilder::new();
    builder
        .op("cond", "Placeholder", &[])
        .op("idx", "Where", &["cond"]);
    builder.build().unwrap()
}

#[test]
fn dynamic_shape_ops_refuse_the_synchronous_path() {
    let executor = executor_for(where_graph());
    let inputs = HashMap::from([(
        "cond".to_string(),
        Tensor::from_bool(Shape::new(vec![3]), vec![false, true, true]).unwrap(),
    )]);
    let err = executor.execute(&inputs, &["idx"]).unwrap_err();
    match err {
        ExecutorError::DynamicExecutionRequired { node, .. } => assert_eq!(node, "idx"),
        other => panic!("expected dynamic execution to be required, got: {other}"),
    }
}

#[test]
fn where_computes_coordinates_of_set_entries() -> anyhow::Result<()> {
    let executor = executor_for(where_graph());
    let inputs = HashMap::from([(
        "cond".to_string(),
        Tensor::from_bool(Shape::new(vec![3]), vec![false, true, true])?,
    )]);
    let results = block_on(executor.execute_async(&inputs, &["idx"]))?;
    assert_eq!(results[0].dtype(), DType::I32);
    assert_eq!(results[0].shape().dims(), &[2, 1]);
    assert_eq!(results[0].i32_data()?, vec![1, 2]);
    Ok(())
}

#[test]
fn the_dynamic_path_also_runs_static_graphs() -> anyhow::Result<()> {
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("a", "Relu", &["x"])
        .op("b", "Neg", &["x"])
        .op("c", "Add", &["a", "b"]);
    let executor = executor_for(builder.build()?);

    let inputs = HashMap::from([(
        "x".to_string(),
        Tensor::from_f32(Shape::new(vec![3]), vec![1.0, -2.0, 3.0])?,
    )]);
    let results = block_on(executor.execute_async(&inputs, &["c"]))?;
    assert_eq!(results[0].f32_data()?, vec![0.0, 2.0, 0.0]);
    Ok(())
}

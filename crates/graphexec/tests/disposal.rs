//! Lifecycle accounting: every intermediate tensor an execution creates must
//! be disposed before the call returns, on both execution paths.
//!
//! The live-tensor gauge is process-wide, so this file holds a single test.

use std::collections::HashMap;
use std::sync::Arc;

use futures::executor::block_on;
use graphexec::graph::AttrValue;
use graphexec::tensor::num_live_tensors;
use graphexec::{GraphBuilder, GraphExecutor, OpRegistry, Shape, Tensor};

#[test]
fn executions_release_every_intermediate_tensor() -> anyhow::Result<()> {
    let baseline = num_live_tensors();

    // Static path: x -> {relu, neg} -> add.
    let mut builder = GraphBuilder::new();
    builder
        .op("x", "Placeholder", &[])
        .op("a", "Relu", &["x"])
        .op("b", "Neg", &["x"])
        .op("c", "Add", &["a", "b"]);
    let executor = GraphExecutor::new(
        Arc::new(builder.build()?),
        Arc::new(OpRegistry::with_builtins()),
    );

    let x = Tensor::from_f32(Shape::new(vec![3]), vec![1.0, -2.0, 3.0])?;
    let results = executor.execute(&HashMap::from([("x".to_string(), x.clone())]), &["c"])?;
    // Only the caller's input and the requested output survive.
    assert_eq!(num_live_tensors(), baseline + 2);
    assert!(!x.is_disposed());
    for tensor in &results {
        tensor.dispose();
    }
    x.dispose();
    assert_eq!(num_live_tensors(), baseline);

    // Dynamic path: a five-iteration while loop with two stored weights.
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
    let mut executor = GraphExecutor::new(
        Arc::new(builder.build()?),
        Arc::new(OpRegistry::with_builtins()),
    );
    executor.set_weight_map(HashMap::from([
        ("limit".to_string(), vec![Tensor::scalar_f32(5.0)]),
        ("one".to_string(), vec![Tensor::scalar_f32(1.0)]),
    ]));
    // Two weights are now alive.
    assert_eq!(num_live_tensors(), baseline + 2);

    let i = Tensor::scalar_f32(0.0);
    let results = block_on(
        executor.execute_async(&HashMap::from([("i".to_string(), i.clone())]), &["exit"]),
    )?;
    assert_eq!(results[0].f32_data()?, vec![5.0]);
    // Weights, the input and the output remain; every loop intermediate and
    // frame-crossing copy is gone.
    assert_eq!(num_live_tensors(), baseline + 4);
    assert!(!i.is_disposed());

    // Weights survive repeated executions.
    let j = Tensor::scalar_f32(3.0);
    let second = block_on(
        executor.execute_async(&HashMap::from([("i".to_string(), j.clone())]), &["exit"]),
    )?;
    assert_eq!(second[0].f32_data()?, vec![5.0]);
    assert_eq!(num_live_tensors(), baseline + 6);

    for tensor in results.iter().chain(second.iter()) {
        tensor.dispose();
    }
    i.dispose();
    j.dispose();
    executor.dispose();
    assert_eq!(num_live_tensors(), baseline);
    Ok(())
}

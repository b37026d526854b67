//! End-to-end compositing scenarios across the task graph, dependencies and channels.

use cgmath::{Matrix4, Point3, Vector3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use web_time::Duration;

use super::*;
use crate::buffer::surface::DISTANCE;
use crate::buffer::{Buffer, FloatBuffer, Surface, VectorBuffer};
use crate::core::config::RuntimeConfig;
use crate::core::error::VoxelError;
use crate::core::message::MessageSeverity;
use crate::core::runtime::VoxelRuntime;
use crate::dependency::DependencyTracker;
use crate::math::{TransformRef, VoxelBox};
use crate::query::{BrushPriorityQueryParameter, PositionQueryParameter, Query, QueryParameters};
use crate::task::{start_async_task, try_run_synchronously, FutureValue, Promise, TaskPriority};
use crate::value::{Value, ValueType};

fn test_runtime(config: RuntimeConfig) -> VoxelRuntime {
    let _ = env_logger::builder().is_test(true).try_init();
    VoxelRuntime::new(RuntimeConfig {
        num_threads: 1,
        ..config
    })
    .unwrap()
}

fn float_channel(runtime: &VoxelRuntime, name: &str, default: f32) -> Arc<WorldChannelManager> {
    runtime
        .channel_registry()
        .register_channel(
            ChannelDefinition::new(
                name,
                ValueType::FloatBuffer,
                Value::constant_float_buffer(default),
            )
            .unwrap(),
        )
        .unwrap();
    runtime.create_world()
}

fn x_range(min: f64, max: f64) -> VoxelBox {
    VoxelBox::new(Point3::new(min, -1.0, -1.0), Point3::new(max, 1.0, 1.0))
}

fn parameters_at(xs: &[f32]) -> QueryParameters {
    let points: Vec<Point3<f32>> = xs.iter().map(|x| Point3::new(*x, 0.0, 0.0)).collect();
    let mut parameters = QueryParameters::new();
    parameters.add(PositionQueryParameter::new(VectorBuffer::from_points(&points)));
    parameters
}

fn query_at(xs: &[f32], tracker: &Arc<DependencyTracker>) -> Query {
    Query::new(parameters_at(xs), tracker.clone(), TransformRef::identity("Query"))
}

fn constant_brush(name: &str, priority: i32, bounds: VoxelBox, value: f32) -> Brush {
    Brush::new(
        name,
        BrushPriority::from_base(priority),
        bounds,
        TransformRef::identity(name),
        move |_, _| FutureValue::from_value(Value::constant_float_buffer(value)),
    )
}

/// Evaluates `channel` synchronously, returning the value and whether it is the default.
fn evaluate(runtime: &VoxelRuntime, channel: &Arc<RuntimeChannel>, query: &Query) -> (Value, bool) {
    let mut channel_future = None;
    let value = try_run_synchronously(runtime, |ctx| {
        let future = channel.get(ctx, query);
        let value = future.value.clone();
        channel_future = Some(future);
        value
    })
    .unwrap();
    let is_default = channel_future.and_then(|future| future.is_default()).unwrap();
    (value, is_default)
}

fn values(value: &Value, num: usize) -> Vec<f32> {
    let buffer = value.as_float_buffer().unwrap();
    (0..num).map(|index| buffer[index]).collect()
}

#[test]
fn test_default_value_without_brushes() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 1.0);
    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();

    let tracker = DependencyTracker::new("Query");
    let (value, is_default) = evaluate(
        &runtime,
        &channel,
        &query_at(&[-50.0, 0.0, 3.0, 8.0, 1000.0], &tracker),
    );

    assert!(is_default);
    assert!(value.as_float_buffer().unwrap().is_constant());
    assert_eq!(values(&value, 5), vec![1.0; 5]);
}

#[test]
fn test_infinite_brush_covers_everything() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    let _brush = register_brush(
        &world,
        "Density",
        constant_brush("Everywhere", 3, VoxelBox::INFINITE, 42.0),
        None,
    )
    .unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();
    let tracker = DependencyTracker::new("Query");
    let (value, is_default) = evaluate(&runtime, &channel, &query_at(&[1.0, -7.0, 300.0], &tracker));

    assert!(!is_default);
    assert!(value.as_float_buffer().unwrap().is_constant());
    assert_eq!(values(&value, 3), vec![42.0; 3]);
}

#[test]
fn test_partial_overlap_higher_priority_wins() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    // Registered in reverse priority order on purpose
    let _b = register_brush(&world, "Density", constant_brush("B", 1, x_range(5.0, 15.0), 2.0), None)
        .unwrap();
    let _a = register_brush(&world, "Density", constant_brush("A", 0, x_range(0.0, 10.0), 1.0), None)
        .unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();
    let tracker = DependencyTracker::new("Query");
    let (value, is_default) = evaluate(&runtime, &channel, &query_at(&[2.0, 7.0, 12.0], &tracker));

    assert!(!is_default);
    assert_eq!(values(&value, 3), vec![1.0, 2.0, 2.0]);
}

#[test]
fn test_brushes_only_see_positions_inside_their_bounds() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", -1.0);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let brush = Brush::new(
        "Recorder",
        BrushPriority::from_base(0),
        x_range(10.0, 20.0),
        TransformRef::identity("Recorder"),
        move |_, query| {
            let positions = query
                .parameters()
                .find::<PositionQueryParameter>()
                .unwrap()
                .positions()
                .clone();
            let mut output = FloatBuffer::new();
            for index in 0..positions.num() {
                let x = positions.get(index).x;
                recorded.lock().unwrap().push(x);
                output.push(x * 10.0);
            }
            FutureValue::from_value(Buffer::Float(output).into())
        },
    );
    let _brush = register_brush(&world, "Density", brush, None).unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();

    let mut rng = fastrand::Rng::with_seed(7);
    let xs: Vec<f32> = (0..200)
        .map(|_| rng.f32() * 40.0 - 5.0)
        .filter(|x| (x - 10.0).abs() > 0.01 && (x - 20.0).abs() > 0.01)
        .collect();
    let tracker = DependencyTracker::new("Query");
    let (value, _) = evaluate(&runtime, &channel, &query_at(&xs, &tracker));

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|x| (10.0..=20.0).contains(x)));

    for (index, x) in xs.iter().enumerate() {
        let inside = (10.0..=20.0).contains(x);
        let expected = if inside { x * 10.0 } else { -1.0 };
        assert_eq!(value.as_float_buffer().unwrap()[index], expected, "position {x}");
    }
}

#[test]
fn test_brush_outside_all_positions_is_never_invoked() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 5.0);

    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    // Intersects the query bounds but contains none of the positions
    let brush = Brush::new(
        "Between",
        BrushPriority::from_base(0),
        x_range(3.0, 4.0),
        TransformRef::identity("Between"),
        move |_, _| {
            flag.store(true, Ordering::SeqCst);
            FutureValue::from_value(Value::constant_float_buffer(0.0))
        },
    );
    let _brush = register_brush(&world, "Density", brush, None).unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();
    let tracker = DependencyTracker::new("Query");
    let (value, is_default) = evaluate(&runtime, &channel, &query_at(&[0.0, 10.0], &tracker));

    assert!(!invoked.load(Ordering::SeqCst));
    assert!(!is_default);
    assert_eq!(values(&value, 2), vec![5.0, 5.0]);
}

#[test]
fn test_surface_channel_composites_attributes() {
    let runtime = test_runtime(RuntimeConfig::default());
    runtime
        .channel_registry()
        .register_channel(ChannelDefinition::with_type_default("Surface", ValueType::Surface))
        .unwrap();
    let world = runtime.create_world();

    let brush = Brush::new(
        "Plane",
        BrushPriority::from_base(0),
        x_range(0.0, 10.0),
        TransformRef::identity("Plane"),
        |_, _| {
            let mut surface = Surface::default();
            surface.set(DISTANCE, Buffer::Float(FloatBuffer::constant(1.0)));
            FutureValue::from_value(surface.into())
        },
    );
    let _brush = register_brush(&world, "Surface", brush, None).unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Surface", &cache).unwrap();
    let tracker = DependencyTracker::new("Query");
    let (value, _) = evaluate(&runtime, &channel, &query_at(&[2.0, 12.0], &tracker));

    let surface = value.as_surface().unwrap();
    let distance = surface.get(DISTANCE).unwrap().as_float().unwrap();
    assert_eq!(distance[0], 1.0);
    assert_eq!(distance[1], f32::INFINITY);
}

#[test]
fn test_type_mismatch_is_reported_and_defaulted() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 3.0);
    let brush = Brush::new(
        "Wrong",
        BrushPriority::from_base(0),
        VoxelBox::INFINITE,
        TransformRef::identity("Wrong"),
        |_, _| FutureValue::from_value(Value::Int32(1)),
    );
    let _brush = register_brush(&world, "Density", brush, None).unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();
    let tracker = DependencyTracker::new("Query");
    let (value, _) = evaluate(&runtime, &channel, &query_at(&[0.0], &tracker));

    assert_eq!(value, ValueType::FloatBuffer.default_value());
    let messages = runtime.messages().messages();
    assert!(messages.iter().any(|message| {
        message.severity == MessageSeverity::Error
            && message.text.contains("expected FloatBuffer, got Int32")
    }));
}

#[test]
fn test_missing_positions_resolve_to_default() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 4.0);
    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();

    let query = Query::new(
        QueryParameters::new(),
        DependencyTracker::new("Query"),
        TransformRef::identity("Query"),
    );
    let (value, is_default) = evaluate(&runtime, &channel, &query);

    assert!(is_default);
    assert_eq!(value, Value::constant_float_buffer(4.0));
    assert_eq!(runtime.messages().len(), 1);
}

#[test]
fn test_nan_check_reports_warning() {
    let runtime = test_runtime(RuntimeConfig {
        check_nans: true,
        ..RuntimeConfig::default()
    });
    let world = float_channel(&runtime, "Density", 0.0);
    let _brush = register_brush(
        &world,
        "Density",
        constant_brush("NaN", 0, VoxelBox::INFINITE, f32::NAN),
        None,
    )
    .unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();
    let tracker = DependencyTracker::new("Query");
    evaluate(&runtime, &channel, &query_at(&[0.0], &tracker));

    assert!(runtime
        .messages()
        .messages()
        .iter()
        .any(|message| message.severity == MessageSeverity::Warning));
}

#[test]
fn test_synchronous_evaluation_reports_stuck_tasks() {
    let runtime = test_runtime(RuntimeConfig::default());
    let never = Promise::new(ValueType::Float, "Never");

    let result = try_run_synchronously(&runtime, |ctx| {
        ctx.task("Stuck")
            .dependency(&never.future())
            .execute_value(ValueType::Float, |_| Value::Float(1.0))
    });

    match result {
        Err(VoxelError::SynchronousEvaluation(message)) => {
            assert!(message.starts_with("Failed to process tasks synchronously"));
            assert!(message.contains("Stuck"));
        }
        other => panic!("unexpected result {other:?}"),
    }
    drop(never);
}

#[test]
fn test_brush_changes_invalidate_overlapping_queries() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    let brush_transform = TransformRef::identity("Moving");
    let brush = register_brush(
        &world,
        "Density",
        Brush::new(
            "Moving",
            BrushPriority::from_base(0),
            x_range(0.0, 10.0),
            brush_transform.clone(),
            |_, _| FutureValue::from_value(Value::constant_float_buffer(1.0)),
        ),
        None,
    )
    .unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();

    let near = DependencyTracker::new("Near");
    let destination = DependencyTracker::new("Destination");
    let far = DependencyTracker::new("Far");
    evaluate(&runtime, &channel, &query_at(&[5.0], &near));
    evaluate(&runtime, &channel, &query_at(&[100.0], &destination));
    evaluate(&runtime, &channel, &query_at(&[1000.0], &far));
    assert!(!near.is_invalidated() && !destination.is_invalidated() && !far.is_invalidated());

    brush_transform.set(Matrix4::from_translation(Vector3::new(95.0, 0.0, 0.0)));

    assert!(near.is_invalidated());
    assert!(destination.is_invalidated());
    assert!(!far.is_invalidated());

    let bounds = channel.brush_bounds(brush.id().unwrap()).unwrap();
    assert_eq!(bounds.min.x, 95.0);
    assert_eq!(bounds.max.x, 105.0);
}

#[test]
fn test_dropping_brush_invalidates_overlapping_queries() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    let brush = register_brush(
        &world,
        "Density",
        constant_brush("Removed", 0, x_range(0.0, 10.0), 1.0),
        None,
    )
    .unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();

    let near = DependencyTracker::new("Near");
    let far = DependencyTracker::new("Far");
    let (value, _) = evaluate(&runtime, &channel, &query_at(&[5.0], &near));
    assert_eq!(values(&value, 1), vec![1.0]);
    evaluate(&runtime, &channel, &query_at(&[1000.0], &far));
    assert!(!near.is_invalidated() && !far.is_invalidated());

    drop(brush);

    assert_eq!(channel.num_brushes(), 0);
    assert!(near.is_invalidated());
    assert!(!far.is_invalidated());

    let tracker = DependencyTracker::new("After removal");
    let (value, is_default) = evaluate(&runtime, &channel, &query_at(&[5.0], &tracker));
    assert!(is_default);
    assert_eq!(values(&value, 1), vec![0.0]);
}

#[test]
fn test_adding_brush_invalidates_evaluated_queries() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();

    let inside = DependencyTracker::new("Inside");
    let outside = DependencyTracker::new("Outside");
    let (_, is_default) = evaluate(&runtime, &channel, &query_at(&[5.0], &inside));
    assert!(is_default);
    evaluate(&runtime, &channel, &query_at(&[1000.0], &outside));

    let _brush = register_brush(
        &world,
        "Density",
        constant_brush("Added", 0, x_range(0.0, 10.0), 3.0),
        None,
    )
    .unwrap();

    assert!(inside.is_invalidated());
    assert!(!outside.is_invalidated());

    let tracker = DependencyTracker::new("After add");
    let (value, is_default) = evaluate(&runtime, &channel, &query_at(&[5.0], &tracker));
    assert!(!is_default);
    assert_eq!(values(&value, 1), vec![3.0]);
}

#[test]
fn test_priority_ceiling_ignores_higher_brushes() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();

    let tracker = DependencyTracker::new("Below zero");
    let mut parameters = parameters_at(&[0.0]);
    let mut ceiling = BrushPriorityQueryParameter::default();
    ceiling
        .channel_to_priority
        .insert("Density".to_string(), BrushPriority::from_base(0));
    parameters.add(ceiling);
    let query = Query::new(parameters, tracker.clone(), TransformRef::identity("Query"));
    evaluate(&runtime, &channel, &query);

    let _above = register_brush(
        &world,
        "Density",
        constant_brush("Above", 5, VoxelBox::INFINITE, 1.0),
        None,
    )
    .unwrap();
    assert!(!tracker.is_invalidated());

    let (value, _) = evaluate(&runtime, &channel, &query);
    assert_eq!(values(&value, 1), vec![0.0]);

    let _below = register_brush(
        &world,
        "Density",
        constant_brush("Below", -5, VoxelBox::INFINITE, 2.0),
        None,
    )
    .unwrap();
    assert!(tracker.is_invalidated());
}

#[test]
fn test_fold_order_is_deterministic() {
    let priorities: Vec<BrushPriority> = (0..2)
        .map(|_| BrushPriority::full(1, "/Graphs/Stamp", Some("Node_3"), "/Level/Stamp_0"))
        .collect();
    assert_eq!(priorities[0].raw(), priorities[1].raw());

    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    let stamp = |instance: &str, value: f32| {
        Brush::new(
            instance,
            BrushPriority::full(1, "/Graphs/Stamp", None, instance),
            VoxelBox::INFINITE,
            TransformRef::identity(instance),
            move |_, _| FutureValue::from_value(Value::constant_float_buffer(value)),
        )
    };
    let first = stamp("/Level/Stamp_0", 1.0);
    let second = stamp("/Level/Stamp_1", 2.0);
    let expected = if first.priority() > second.priority() { 1.0 } else { 2.0 };
    let _first = register_brush(&world, "Density", first, None).unwrap();
    let _second = register_brush(&world, "Density", second, None).unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();
    for _ in 0..3 {
        let tracker = DependencyTracker::new("Query");
        let (value, _) = evaluate(&runtime, &channel, &query_at(&[0.0], &tracker));
        assert_eq!(values(&value, 1), vec![expected]);
    }
}

#[test]
fn test_async_evaluation_on_workers() {
    let runtime = test_runtime(RuntimeConfig::default());
    let world = float_channel(&runtime, "Density", 0.0);
    let _brush = register_brush(
        &world,
        "Density",
        constant_brush("Everywhere", 0, VoxelBox::INFINITE, 8.0),
        None,
    )
    .unwrap();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Runtime"));
    let channel = world.find_runtime_channel("Density", &cache).unwrap();
    let query = query_at(&[1.0, 2.0], &DependencyTracker::new("Query"));

    let (sender, receiver) = mpsc::channel();
    start_async_task(
        &runtime,
        "Density query",
        TaskPriority::top(),
        ValueType::FloatBuffer,
        move |ctx| channel.get(ctx, &query).value,
        move |value| {
            let _ = sender.send(value);
        },
    );

    let value = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(value, Value::constant_float_buffer(8.0));
}

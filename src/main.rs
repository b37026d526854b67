//! # Voxel Graph Core Demo
//!
//! Builds a small world with a noise terrain brush and a crater brush on a `Height`
//! channel, evaluates it synchronously and on the worker threads, then moves the crater
//! and shows the cached query being invalidated.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release
//! ```

use cgmath::{EuclideanSpace, Matrix4, Point3, Vector3};
use log::{error, info};
use noise::{NoiseFn, Perlin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use web_time::Duration;

use voxel_graph_core::buffer::{Buffer, FloatBuffer, VectorBuffer};
use voxel_graph_core::channel::{
    register_brush, Brush, BrushPriority, ChannelDefinition, RuntimeChannelCache,
};
use voxel_graph_core::dependency::DependencyTracker;
use voxel_graph_core::math::{TransformRef, VoxelBox};
use voxel_graph_core::query::{PositionQueryParameter, Query, QueryParameters};
use voxel_graph_core::task::{start_async_task, try_run_synchronously, FutureValue, TaskPriority};
use voxel_graph_core::value::{Value, ValueType};
use voxel_graph_core::{RuntimeConfig, VoxelError, VoxelResult, VoxelRuntime};

const NUM_POSITIONS: usize = 4096;
const WORLD_SIZE: f32 = 256.0;
const CRATER_RADIUS: f64 = 24.0;

fn query_positions(query: &Query) -> VectorBuffer {
    query
        .parameters()
        .find::<PositionQueryParameter>()
        .map(|parameter| parameter.positions().clone())
        .unwrap_or_default()
}

fn terrain_brush(seed: u32) -> Brush {
    let perlin = Perlin::new(seed);
    Brush::new(
        "Terrain",
        BrushPriority::full(0, "/Graphs/Terrain", None, "/World/Terrain"),
        VoxelBox::INFINITE,
        TransformRef::identity("Terrain"),
        move |_, query| {
            let positions = query_positions(query);
            let mut heights = FloatBuffer::new();
            for index in 0..positions.num() {
                let position = positions.get(index);
                let sample = perlin.get([f64::from(position.x) / 64.0, f64::from(position.y) / 64.0]);
                heights.push((sample * 32.0) as f32);
            }
            FutureValue::from_value(Buffer::Float(heights).into())
        },
    )
}

fn crater_brush(transform: &TransformRef) -> Brush {
    let bounds = VoxelBox::new(
        Point3::new(-CRATER_RADIUS, -CRATER_RADIUS, -CRATER_RADIUS),
        Point3::new(CRATER_RADIUS, CRATER_RADIUS, CRATER_RADIUS),
    );
    let crater_to_world = transform.clone();
    Brush::new(
        "Crater",
        BrushPriority::full(1, "/Graphs/Crater", Some("Stamp"), "/World/Crater_0"),
        bounds,
        transform.clone(),
        move |_, query| {
            let positions = query_positions(query);
            let center = crater_to_world.matrix().w.truncate();
            let mut heights = FloatBuffer::new();
            for index in 0..positions.num() {
                let offset = positions.point(index).to_vec() - center;
                let distance = (offset.x * offset.x + offset.y * offset.y).sqrt();
                let depth = (CRATER_RADIUS - distance).max(0.0);
                heights.push(-depth as f32);
            }
            FutureValue::from_value(Buffer::Float(heights).into())
        },
    )
}

fn make_query(positions: &VectorBuffer, tracker: &Arc<DependencyTracker>) -> Query {
    let mut parameters = QueryParameters::new();
    parameters.add(PositionQueryParameter::new(positions.clone()));
    Query::new(parameters, tracker.clone(), TransformRef::identity("Query"))
}

fn summarize(label: &str, value: &Value) {
    let Some(heights) = value.as_float_buffer() else {
        error!("{label}: unexpected value {:?}", value.value_type());
        return;
    };
    let (min, max) = heights
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), height| {
            (min.min(height), max.max(height))
        });
    info!("{label}: {} heights in [{min:.2}, {max:.2}]", heights.num());
}

fn run() -> VoxelResult<()> {
    let runtime = VoxelRuntime::new(RuntimeConfig::default())?;
    runtime.channel_registry().register_channel(ChannelDefinition::new(
        "Height",
        ValueType::FloatBuffer,
        Value::constant_float_buffer(0.0),
    )?)?;

    let world = runtime.create_world();
    let crater_transform = TransformRef::new(
        "Crater",
        Matrix4::from_translation(Vector3::new(64.0, 64.0, 0.0)),
    );
    let _terrain = register_brush(&world, "Height", terrain_brush(fastrand::u32(..)), None)?;
    let _crater = register_brush(&world, "Height", crater_brush(&crater_transform), None)?;
    world.log_all_channels();

    let cache = RuntimeChannelCache::new(TransformRef::identity("Landscape"));
    let height = world
        .find_runtime_channel("Height", &cache)
        .ok_or_else(|| VoxelError::UnknownChannel("Height".to_string()))?;

    let mut rng = fastrand::Rng::with_seed(42);
    let points: Vec<Point3<f32>> = (0..NUM_POSITIONS)
        .map(|_| Point3::new(rng.f32() * WORLD_SIZE, rng.f32() * WORLD_SIZE, 0.0))
        .collect();
    let positions = VectorBuffer::from_points(&points);

    let tracker = DependencyTracker::new("Demo query");
    let invalidated = Arc::new(AtomicBool::new(false));
    let flag = invalidated.clone();
    tracker.set_on_invalidated(move || flag.store(true, Ordering::SeqCst));

    let query = make_query(&positions, &tracker);
    let value = try_run_synchronously(&runtime, |ctx| height.get(ctx, &query).value)?;
    summarize("Synchronous", &value);

    let (sender, receiver) = mpsc::channel();
    let async_channel = height.clone();
    let async_query = make_query(&positions, &DependencyTracker::new("Async demo query"));
    start_async_task(
        &runtime,
        "Async height",
        TaskPriority::top(),
        ValueType::FloatBuffer,
        move |ctx| async_channel.get(ctx, &async_query).value,
        move |value| {
            let _ = sender.send(value);
        },
    );
    match receiver.recv_timeout(Duration::from_secs(10)) {
        Ok(value) => summarize("Asynchronous", &value),
        Err(error) => error!("Asynchronous query failed: {error}"),
    }

    crater_transform.set(Matrix4::from_translation(Vector3::new(192.0, 192.0, 0.0)));
    info!(
        "Query invalidated after moving the crater: {}",
        invalidated.load(Ordering::SeqCst)
    );

    runtime.executor().log_all_tasks();
    for message in runtime.messages().drain() {
        info!("{}: {}", message.severity, message.text);
    }
    runtime.shutdown();
    Ok(())
}

fn main() {
    voxel_graph_core::init_logger();

    if let Err(error) = run() {
        error!("{error}");
        std::process::exit(1);
    }
}

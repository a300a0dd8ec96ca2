//! Worker bootstrap: wires a `BufferManager`, a fixed worker-thread pool,
//! one `PipelineExecutionContext`, and a `NetworkTransport` together from a
//! `WorkerConfig`. Demonstrates the data flow end-to-end; it carries no
//! RPC/REST surface and is not a substitute for the coordinator.

use flowcore::buffer::BufferManager;
use flowcore::config::WorkerConfig;
use flowcore::network::NetworkTransport;
use flowcore::pipeline::{ContinuationPolicy, PipelineExecutionContext, PipelineState};
use flowcore::watermark::WatermarkProcessor;
use flowcore::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WorkerConfig::default();
    info!(
        num_worker_threads = config.num_worker_threads,
        buffer_size = config.buffer_size,
        num_pooled_buffers = config.num_pooled_buffers,
        "starting worker"
    );

    let buffer_manager = Arc::new(BufferManager::new(&config)?);
    let watermark_processor = Arc::new(WatermarkProcessor::new(Duration::from_millis(config.watermark_idle_timeout_ms)));

    let pipeline = Arc::new(PipelineExecutionContext::new(buffer_manager.clone(), ContinuationPolicy::Possible));
    pipeline.transition(PipelineState::Open)?;
    pipeline.transition(PipelineState::Running)?;

    let bind_addr = "0.0.0.0:9200".parse().expect("static bind address is well-formed");
    let transport = NetworkTransport::new(bind_addr, &config);
    let listener = transport.listen().await?;
    info!(addr = %listener.local_addr()?, "network transport bound");

    info!(watermark = watermark_processor.global_watermark(), "worker ready");

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");

    pipeline.transition(PipelineState::Closing)?;
    pipeline.transition(PipelineState::Closed)?;
    buffer_manager.shutdown()?;

    info!("worker stopped");
    Ok(())
}
